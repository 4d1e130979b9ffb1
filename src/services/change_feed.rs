use tokio::{sync::mpsc, task::JoinHandle};

use super::deleted_reviews::{ChangeRecord, DeletedReviewArchiver};

/// In-process stream of review changes
///
/// Publishing never blocks the request that produced the change; a background
/// task forwards each record to the [`DeletedReviewArchiver`].
#[derive(Clone)]
pub struct ChangeFeed {
    tx: mpsc::UnboundedSender<ChangeRecord>,
}

/// Handle for gracefully shutting down the change feed task
pub struct ChangeFeedHandle {
    shutdown_tx: mpsc::Sender<()>,
    task: JoinHandle<()>,
}

impl ChangeFeedHandle {
    /// Stops the task after it has archived every record already published
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(()).await;
        if let Err(e) = self.task.await {
            tracing::error!(error = %e, "Change feed task panicked");
        }
        tracing::info!("Change feed stopped");
    }
}

impl ChangeFeed {
    /// Spawns the forwarding task
    pub fn spawn(archiver: DeletedReviewArchiver) -> (Self, ChangeFeedHandle) {
        let (tx, rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);

        let task = tokio::spawn(Self::run(archiver, rx, shutdown_rx));

        (Self { tx }, ChangeFeedHandle { shutdown_tx, task })
    }

    /// Queues a record for the archiver
    pub fn publish(&self, record: ChangeRecord) {
        if let Err(e) = self.tx.send(record) {
            tracing::error!(error = %e, "Failed to publish change record");
        }
    }

    async fn run(
        archiver: DeletedReviewArchiver,
        mut rx: mpsc::UnboundedReceiver<ChangeRecord>,
        mut shutdown_rx: mpsc::Receiver<()>,
    ) {
        tracing::info!("Change feed task started");

        loop {
            tokio::select! {
                Some(record) = rx.recv() => {
                    Self::forward(&archiver, record).await;
                }
                Some(()) = shutdown_rx.recv() => {
                    rx.close();
                    while let Some(record) = rx.recv().await {
                        Self::forward(&archiver, record).await;
                    }
                    break;
                }
                else => break,
            }
        }
    }

    async fn forward(archiver: &DeletedReviewArchiver, record: ChangeRecord) {
        match archiver.archive_change_batch(vec![record]).await {
            Ok(0) => {}
            Ok(archived) => tracing::debug!(archived, "Deleted review archived"),
            Err(e) => tracing::error!(error = %e, "Failed to write deleted review to archive"),
        }
    }
}
