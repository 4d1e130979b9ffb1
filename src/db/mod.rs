//! Storage collaborator contract
//!
//! Every entity lives in a key-value table addressed by a partition key and an
//! optional range key, with at most one secondary index per entity. Writes may
//! carry a [`WriteCondition`]; the store owns the version counter and fails
//! with [`AppError::Conflict`](crate::error::AppError::Conflict) when the
//! condition does not hold.

use std::cmp::Ordering;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use sqlx::PgPool;

use crate::error::AppResult;
use crate::models::{DeletedReview, Movie, Review, TopMovie, User};

pub mod memory;
pub mod postgres;
pub mod redis;
pub mod seed;

pub use memory::MemoryStore;
pub use postgres::{create_pool, PgStore};
pub use self::redis::create_redis_client;
pub use self::redis::Cache;
pub use self::redis::CacheKey;
pub use self::redis::{CacheBackend, RedisBackend};
pub use seed::SeedData;

/// Primary key of a stored item
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ItemKey {
    pub partition: String,
    pub sort: Option<String>,
}

impl ItemKey {
    /// Key of an entity without a range key
    pub fn new(partition: impl Into<String>) -> Self {
        Self {
            partition: partition.into(),
            sort: None,
        }
    }

    /// Key of an entity with a range key
    pub fn with_sort(partition: impl Into<String>, sort: impl Into<String>) -> Self {
        Self {
            partition: partition.into(),
            sort: Some(sort.into()),
        }
    }
}

/// Value a query orders its items by
#[derive(Debug, Clone, PartialEq)]
pub enum SortValue {
    Text(String),
    Number(f64),
}

impl SortValue {
    /// Total order; numbers sort before text.
    pub fn total_cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (SortValue::Number(a), SortValue::Number(b)) => a.total_cmp(b),
            (SortValue::Text(a), SortValue::Text(b)) => a.cmp(b),
            (SortValue::Number(_), SortValue::Text(_)) => Ordering::Less,
            (SortValue::Text(_), SortValue::Number(_)) => Ordering::Greater,
        }
    }
}

/// An entity's position in its secondary index
#[derive(Debug, Clone, PartialEq)]
pub struct IndexEntry {
    pub name: &'static str,
    pub partition: String,
    pub sort: SortValue,
}

/// Position after which a query resumes. Ties on `sort` are broken by `key`.
#[derive(Debug, Clone, PartialEq)]
pub struct ResumeKey {
    pub key: ItemKey,
    pub sort: SortValue,
}

/// Server-side filter applied to query results after key matching
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    AtLeast { attribute: &'static str, value: f64 },
    Equals { attribute: &'static str, value: bool },
}

impl Filter {
    /// Evaluates the filter against a serialized item. Missing or mistyped
    /// attributes never match.
    pub fn matches(&self, item: &serde_json::Value) -> bool {
        match self {
            Filter::AtLeast { attribute, value } => item
                .get(*attribute)
                .and_then(serde_json::Value::as_f64)
                .is_some_and(|v| v >= *value),
            Filter::Equals { attribute, value } => item
                .get(*attribute)
                .and_then(serde_json::Value::as_bool)
                .is_some_and(|v| v == *value),
        }
    }
}

/// Key-condition query over the primary key or a secondary index
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    /// `None` queries the table's own partition key, ordered by range key
    pub index: Option<&'static str>,
    pub partition: String,
    pub filter: Option<Filter>,
    pub limit: Option<usize>,
    pub start_after: Option<ResumeKey>,
    pub descending: bool,
}

impl Query {
    pub fn primary(partition: impl Into<String>) -> Self {
        Self {
            index: None,
            partition: partition.into(),
            filter: None,
            limit: None,
            start_after: None,
            descending: false,
        }
    }

    pub fn index(name: &'static str, partition: impl Into<String>) -> Self {
        Self {
            index: Some(name),
            ..Self::primary(partition)
        }
    }

    pub fn filter(mut self, filter: Filter) -> Self {
        self.filter = Some(filter);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn start_after(mut self, resume: Option<ResumeKey>) -> Self {
        self.start_after = resume;
        self
    }

    pub fn descending(mut self) -> Self {
        self.descending = true;
        self
    }
}

/// One page of query results
#[derive(Debug, Clone)]
pub struct Page<T> {
    pub items: Vec<T>,
    /// Set only when more matching items remain
    pub resume_key: Option<ResumeKey>,
}

/// Expectation a conditional write checks against the stored item
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteCondition {
    /// Unconditional upsert
    Always,
    /// The item must not exist yet
    NotExists,
    /// The stored item must carry exactly this version
    VersionIs(u64),
}

/// A typed entity the store knows how to key and index
pub trait Record: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    /// Table name
    const ENTITY: &'static str;

    fn key(&self) -> ItemKey;

    fn secondary_index(&self) -> Option<IndexEntry> {
        None
    }

    /// Receives the version the store holds for this record. Records that do
    /// not take part in conditional writes ignore it.
    fn set_version(&mut self, _version: u64) {}
}

/// Storage collaborator for one entity type
///
/// `put` assigns the next version (1 for a new item) and returns the record as
/// persisted. `batch_write` applies all deletes before any put.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Store<T: Record>: Send + Sync {
    async fn get(&self, key: &ItemKey) -> AppResult<Option<T>>;

    async fn put(&self, record: T, condition: WriteCondition) -> AppResult<T>;

    async fn delete(&self, key: &ItemKey) -> AppResult<Option<T>>;

    async fn query(&self, query: Query) -> AppResult<Page<T>>;

    async fn scan(&self, limit: Option<usize>) -> AppResult<Vec<T>>;

    async fn batch_write(&self, to_put: Vec<T>, to_delete: Vec<ItemKey>) -> AppResult<()>;
}

/// Handles to every table the service reads or writes
#[derive(Clone)]
pub struct Stores {
    pub users: Arc<dyn Store<User>>,
    pub movies: Arc<dyn Store<Movie>>,
    pub reviews: Arc<dyn Store<Review>>,
    pub top_movies: Arc<dyn Store<TopMovie>>,
    pub deleted_reviews: Arc<dyn Store<DeletedReview>>,
}

impl Stores {
    /// Fresh, empty in-process tables
    pub fn in_memory() -> Self {
        Self {
            users: Arc::new(MemoryStore::<User>::new()),
            movies: Arc::new(MemoryStore::<Movie>::new()),
            reviews: Arc::new(MemoryStore::<Review>::new()),
            top_movies: Arc::new(MemoryStore::<TopMovie>::new()),
            deleted_reviews: Arc::new(MemoryStore::<DeletedReview>::new()),
        }
    }

    /// All tables backed by one PostgreSQL pool
    pub fn postgres(pool: PgPool) -> Self {
        let store = PgStore::new(pool);
        Self {
            users: Arc::new(store.clone()),
            movies: Arc::new(store.clone()),
            reviews: Arc::new(store.clone()),
            top_movies: Arc::new(store.clone()),
            deleted_reviews: Arc::new(store),
        }
    }
}
