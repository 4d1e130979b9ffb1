use std::time::Duration;

use anyhow::Context;
use rand::{rngs::StdRng, SeedableRng};
use tokio::task::JoinHandle;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use critic_api::{
    api::{create_router, AppState},
    config::{Config, StorageBackend},
    db::{create_pool, create_redis_client, Cache, SeedData, Stores},
    error::AppError,
    services::{ChangeFeed, DeletedReviewArchiver, TopMovieRotator, MAX_TOP_MOVIES},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config = Config::from_env()?;

    let stores = match config.storage {
        StorageBackend::Memory => Stores::in_memory(),
        StorageBackend::Postgres => {
            let pool = create_pool(&config.database_url)
                .await
                .context("Failed to connect to PostgreSQL")?;
            Stores::postgres(pool)
        }
    };
    tracing::info!(storage = ?config.storage, "Storage ready");

    if let Some(path) = &config.seed_file {
        SeedData::from_file(path)?.apply(&stores).await?;
    }

    let (cache, cache_writer) = match &config.redis_url {
        Some(url) => {
            let (cache, handle) = Cache::new(create_redis_client(url)?).await?;
            tracing::info!("Top movie cache enabled");
            (Some(cache), Some(handle))
        }
        None => (None, None),
    };

    let (change_feed, change_feed_handle) =
        ChangeFeed::spawn(DeletedReviewArchiver::new(stores.deleted_reviews.clone()));

    let refresh = (config.top_movies_refresh_secs > 0).then(|| {
        spawn_top_movie_refresh(
            TopMovieRotator::new(&stores, cache.clone()),
            Duration::from_secs(config.top_movies_refresh_secs),
        )
    });

    let state = AppState::new(stores, cache, change_feed);
    let app = create_router(state);

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    tracing::info!(%addr, "Server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    if let Some(task) = refresh {
        task.abort();
    }
    change_feed_handle.shutdown().await;
    if let Some(handle) = cache_writer {
        handle.shutdown().await;
    }

    Ok(())
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("critic_api=debug,tower_http=debug")),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Rotates the top movies once per `period`, starting immediately
fn spawn_top_movie_refresh(rotator: TopMovieRotator, period: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        let mut rng = StdRng::from_os_rng();

        loop {
            interval.tick().await;
            match rotator.update_top_movies(MAX_TOP_MOVIES, &mut rng).await {
                Ok(rotation) => {
                    tracing::info!(
                        old = rotation.old.len(),
                        new = rotation.new.len(),
                        "Scheduled top movie rotation complete"
                    );
                    if let Some(error) = rotation.cache_error {
                        tracing::warn!(%error, "Cached top movies not replaced after rotation");
                    }
                }
                Err(AppError::PartialRotation { old, new, reason }) => tracing::error!(
                    ?old,
                    ?new,
                    %reason,
                    "Scheduled top movie rotation left the table partially updated"
                ),
                Err(e) => tracing::error!(error = %e, "Scheduled top movie rotation failed"),
            }
        }
    })
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Unable to install Ctrl+C handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Unable to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}
