use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::{
    db::{Store, WriteCondition},
    error::AppResult,
    models::{DeletedReview, Review},
};

/// Event name of a change record describing a removed review
pub const REMOVE_EVENT: &str = "REMOVE";

/// One entry of the review change stream
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ChangeRecord {
    pub event_name: String,
    /// The review as it was before the change, absent for inserts
    #[serde(default)]
    pub old_image: Option<Review>,
}

impl ChangeRecord {
    /// Record announcing that `review` was deleted
    pub fn removed(review: Review) -> Self {
        Self {
            event_name: REMOVE_EVENT.to_string(),
            old_image: Some(review),
        }
    }
}

/// Copies deleted reviews into the append-only archive
#[derive(Clone)]
pub struct DeletedReviewArchiver {
    store: Arc<dyn Store<DeletedReview>>,
}

impl DeletedReviewArchiver {
    pub fn new(store: Arc<dyn Store<DeletedReview>>) -> Self {
        Self { store }
    }

    /// Archives one deleted review. Delivering the same deletion twice
    /// rewrites an identical entry.
    pub async fn archive(&self, deleted: DeletedReview) -> AppResult<DeletedReview> {
        self.store.put(deleted, WriteCondition::Always).await
    }

    /// Archives the removals in a batch of change records, ignoring every
    /// other event, and returns how many were archived
    pub async fn archive_change_batch(&self, records: Vec<ChangeRecord>) -> AppResult<usize> {
        let removed: Vec<DeletedReview> = records
            .into_iter()
            .filter(|record| record.event_name == REMOVE_EVENT)
            .filter_map(|record| record.old_image)
            .map(DeletedReview::from)
            .collect();

        let archived = removed.len();
        for deleted in removed {
            self.archive(deleted).await?;
        }
        Ok(archived)
    }
}
