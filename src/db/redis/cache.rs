use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use redis::Client;
use redis::Script;
use std::fmt::Display;
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::error::AppError;
use crate::error::AppResult;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CacheKey {
    TopMovies,
}

impl CacheKey {
    /// Counter bumped every time the value under this key is replaced
    pub fn generation_key(&self) -> String {
        format!("{}:gen", self)
    }
}

impl Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CacheKey::TopMovies => write!(f, "top-movies"),
        }
    }
}

/// Creates a Redis client for caching
pub fn create_redis_client(redis_url: &str) -> anyhow::Result<Client> {
    let client = Client::open(redis_url)?;
    Ok(client)
}

/// Raw key-value operations behind [`Cache`]
///
/// Every key carries a generation. `replace` bumps it together with the value;
/// `refill` lands only while the generation it was given is still current, so
/// a refill computed from data read before a replace is dropped.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CacheBackend: Send + Sync {
    async fn get(&self, key: &CacheKey) -> AppResult<Option<String>>;

    async fn generation(&self, key: &CacheKey) -> AppResult<u64>;

    /// Queues a conditional write without waiting for it
    fn refill(&self, key: &CacheKey, value: String, ttl: u64, generation: u64);

    /// Writes the value and bumps the generation, waiting for acknowledgement
    async fn replace(&self, key: &CacheKey, value: String, ttl: u64) -> AppResult<()>;
}

/// Sets KEYS[1] only while KEYS[2] still holds the generation in ARGV[1]
const REFILL_SCRIPT: &str = r#"
local current = tonumber(redis.call('GET', KEYS[2]) or '0')
if current == tonumber(ARGV[1]) then
    redis.call('SET', KEYS[1], ARGV[2], 'EX', ARGV[3])
    return 1
end
return 0
"#;

/// Pending refill handed to the background writer
struct PendingWrite {
    key: String,
    generation_key: String,
    value: String,
    ttl: u64,
    generation: u64,
}

/// Handle for gracefully shutting down the cache writer
pub struct CacheWriterHandle {
    shutdown_tx: mpsc::Sender<()>,
}

impl CacheWriterHandle {
    /// Signals the writer to flush queued writes and stop
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(()).await;
        tracing::info!("Cache writer shutdown signal sent");
    }
}

/// Redis-backed [`CacheBackend`]
///
/// Reads and replaces go straight to Redis over a shared
/// [`ConnectionManager`]; refills are queued to a background task so they
/// never delay the response that triggered them.
#[derive(Clone)]
pub struct RedisBackend {
    conn: ConnectionManager,
    write_tx: mpsc::UnboundedSender<PendingWrite>,
}

impl RedisBackend {
    /// Connects to Redis and spawns the background writer
    pub async fn connect(redis_client: Client) -> AppResult<(Self, CacheWriterHandle)> {
        let conn = ConnectionManager::new(redis_client).await?;
        let (write_tx, write_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);

        tokio::spawn(Self::writer(conn.clone(), write_rx, shutdown_rx));

        Ok((Self { conn, write_tx }, CacheWriterHandle { shutdown_tx }))
    }

    /// Drains queued writes until shutdown, then flushes whatever is left
    async fn writer(
        mut conn: ConnectionManager,
        mut write_rx: mpsc::UnboundedReceiver<PendingWrite>,
        mut shutdown_rx: mpsc::Receiver<()>,
    ) {
        tracing::info!("Cache writer task started");
        let script = Script::new(REFILL_SCRIPT);

        loop {
            tokio::select! {
                Some(write) = write_rx.recv() => {
                    if let Err(e) = Self::apply(&mut conn, &script, write).await {
                        tracing::error!(error = %e, "Failed to write to Redis cache");
                    }
                }
                _ = shutdown_rx.recv() => {
                    write_rx.close();
                    while let Some(write) = write_rx.recv().await {
                        if let Err(e) = Self::apply(&mut conn, &script, write).await {
                            tracing::error!(error = %e, "Failed to flush cache write during shutdown");
                        }
                    }
                    tracing::info!("Cache writer task stopped");
                    break;
                }
            }
        }
    }

    async fn apply(
        conn: &mut ConnectionManager,
        script: &Script,
        write: PendingWrite,
    ) -> AppResult<()> {
        let applied: i64 = script
            .key(&write.key)
            .key(&write.generation_key)
            .arg(write.generation)
            .arg(write.value)
            .arg(write.ttl)
            .invoke_async(conn)
            .await?;
        if applied == 0 {
            tracing::debug!(key = %write.key, "Dropped cache refill superseded by a newer value");
        }
        Ok(())
    }
}

#[async_trait]
impl CacheBackend for RedisBackend {
    async fn get(&self, key: &CacheKey) -> AppResult<Option<String>> {
        let mut conn = self.conn.clone();
        Ok(conn.get(key.to_string()).await?)
    }

    async fn generation(&self, key: &CacheKey) -> AppResult<u64> {
        let mut conn = self.conn.clone();
        let generation: Option<u64> = conn.get(key.generation_key()).await?;
        Ok(generation.unwrap_or(0))
    }

    fn refill(&self, key: &CacheKey, value: String, ttl: u64, generation: u64) {
        let write = PendingWrite {
            key: key.to_string(),
            generation_key: key.generation_key(),
            value,
            ttl,
            generation,
        };

        if let Err(e) = self.write_tx.send(write) {
            tracing::error!(error = %e, "Failed to send cache write message");
        }
    }

    async fn replace(&self, key: &CacheKey, value: String, ttl: u64) -> AppResult<()> {
        let mut conn = self.conn.clone();
        let _: () = redis::pipe()
            .atomic()
            .incr(key.generation_key(), 1)
            .ignore()
            .set_ex(key.to_string(), value, ttl)
            .ignore()
            .query_async(&mut conn)
            .await?;
        Ok(())
    }
}

/// Typed read-through cache in front of the store
#[derive(Clone)]
pub struct Cache {
    backend: Arc<dyn CacheBackend>,
}

impl Cache {
    /// Connects to Redis and spawns the background writer
    pub async fn new(redis_client: Client) -> AppResult<(Self, CacheWriterHandle)> {
        let (backend, handle) = RedisBackend::connect(redis_client).await?;
        Ok((Self::with_backend(Arc::new(backend)), handle))
    }

    pub fn with_backend(backend: Arc<dyn CacheBackend>) -> Self {
        Self { backend }
    }

    /// Returns the cached value for `key`, or `None` on a miss
    pub async fn get_from_cache<T: serde::de::DeserializeOwned>(
        &self,
        key: &CacheKey,
    ) -> AppResult<Option<T>> {
        self.backend
            .get(key)
            .await?
            .map(|json| {
                serde_json::from_str(&json).map_err(|e| {
                    AppError::Internal(format!("Cache deserialization error: {}", e))
                })
            })
            .transpose()
    }

    /// Current generation of `key`; read it before loading a refill
    pub async fn generation(&self, key: &CacheKey) -> AppResult<u64> {
        self.backend.generation(key).await
    }

    /// Queues a refill of `key` that is dropped if the value was replaced
    /// since `generation` was read
    pub fn set_in_background<T: serde::Serialize>(
        &self,
        key: &CacheKey,
        value: &T,
        ttl: u64,
        generation: u64,
    ) {
        match serde_json::to_string(value) {
            Ok(json) => self.backend.refill(key, json, ttl, generation),
            Err(e) => tracing::error!(error = %e, "Cache serialization error"),
        }
    }

    /// Overwrites `key` and supersedes every refill still in flight
    pub async fn replace<T: serde::Serialize>(
        &self,
        key: &CacheKey,
        value: &T,
        ttl: u64,
    ) -> AppResult<()> {
        let json = serde_json::to_string(value)?;
        self.backend.replace(key, json, ttl).await
    }
}
