use std::cmp::Ordering;
use std::collections::BTreeMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{ItemKey, Page, Query, Record, ResumeKey, SortValue, Store, WriteCondition};
use crate::error::{AppError, AppResult};

/// A stored record together with the version the store assigned it
#[derive(Debug, Clone)]
struct Stored<T> {
    record: T,
    version: u64,
}

/// In-process store used for local runs and tests
///
/// Items are kept in key order, so scans and primary-key queries return them
/// sorted by (partition, range key).
pub struct MemoryStore<T> {
    items: RwLock<BTreeMap<ItemKey, Stored<T>>>,
}

impl<T: Record> Default for MemoryStore<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Record> MemoryStore<T> {
    /// Creates an empty store
    pub fn new() -> Self {
        Self {
            items: RwLock::new(BTreeMap::new()),
        }
    }

    /// Number of items currently stored
    pub async fn len(&self) -> usize {
        self.items.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.items.read().await.is_empty()
    }

    fn materialize(stored: &Stored<T>) -> T {
        let mut record = stored.record.clone();
        record.set_version(stored.version);
        record
    }

    /// Position of an item in the ordering requested by `query`, or `None`
    /// when the item is outside the queried partition.
    fn position(query: &Query, key: &ItemKey, record: &T) -> Option<SortValue> {
        match query.index {
            None => (key.partition == query.partition)
                .then(|| SortValue::Text(key.sort.clone().unwrap_or_default())),
            Some(name) => record
                .secondary_index()
                .filter(|entry| entry.name == name && entry.partition == query.partition)
                .map(|entry| entry.sort),
        }
    }
}

fn compare(a_sort: &SortValue, a_key: &ItemKey, b_sort: &SortValue, b_key: &ItemKey) -> Ordering {
    a_sort.total_cmp(b_sort).then_with(|| a_key.cmp(b_key))
}

#[async_trait]
impl<T: Record> Store<T> for MemoryStore<T> {
    async fn get(&self, key: &ItemKey) -> AppResult<Option<T>> {
        let items = self.items.read().await;
        Ok(items.get(key).map(Self::materialize))
    }

    async fn put(&self, record: T, condition: WriteCondition) -> AppResult<T> {
        let key = record.key();
        let mut items = self.items.write().await;
        let current = items.get(&key).map(|stored| stored.version);

        let version = match (condition, current) {
            (WriteCondition::Always, current) => current.unwrap_or(0) + 1,
            (WriteCondition::NotExists, None) => 1,
            (WriteCondition::NotExists, Some(_)) => {
                return Err(AppError::Conflict(format!(
                    "{} item {:?} already exists",
                    T::ENTITY,
                    key
                )));
            }
            (WriteCondition::VersionIs(expected), Some(stored)) if stored == expected => {
                stored + 1
            }
            (WriteCondition::VersionIs(expected), stored) => {
                return Err(AppError::Conflict(format!(
                    "{} item {:?} expected version {} but found {:?}",
                    T::ENTITY,
                    key,
                    expected,
                    stored
                )));
            }
        };

        let stored = Stored { record, version };
        let persisted = Self::materialize(&stored);
        items.insert(key, stored);
        Ok(persisted)
    }

    async fn delete(&self, key: &ItemKey) -> AppResult<Option<T>> {
        let mut items = self.items.write().await;
        Ok(items.remove(key).as_ref().map(Self::materialize))
    }

    async fn query(&self, query: Query) -> AppResult<Page<T>> {
        let items = self.items.read().await;

        let mut matched: Vec<(SortValue, &ItemKey, &Stored<T>)> = items
            .iter()
            .filter_map(|(key, stored)| {
                Self::position(&query, key, &stored.record).map(|sort| (sort, key, stored))
            })
            .collect();

        matched.sort_by(|a, b| compare(&a.0, a.1, &b.0, b.1));
        if query.descending {
            matched.reverse();
        }

        if let Some(start) = &query.start_after {
            let wanted = if query.descending {
                Ordering::Less
            } else {
                Ordering::Greater
            };
            matched.retain(|(sort, key, _)| compare(sort, key, &start.sort, &start.key) == wanted);
        }

        let mut results = Vec::new();
        let mut last: Option<ResumeKey> = None;
        let mut more = false;

        for (sort, key, stored) in matched {
            if let Some(filter) = &query.filter {
                if !filter.matches(&serde_json::to_value(&stored.record)?) {
                    continue;
                }
            }
            if query.limit.is_some_and(|limit| results.len() >= limit) {
                more = true;
                break;
            }
            last = Some(ResumeKey {
                key: key.clone(),
                sort,
            });
            results.push(Self::materialize(stored));
        }

        Ok(Page {
            items: results,
            resume_key: if more { last } else { None },
        })
    }

    async fn scan(&self, limit: Option<usize>) -> AppResult<Vec<T>> {
        let items = self.items.read().await;
        Ok(items
            .values()
            .take(limit.unwrap_or(usize::MAX))
            .map(Self::materialize)
            .collect())
    }

    async fn batch_write(&self, to_put: Vec<T>, to_delete: Vec<ItemKey>) -> AppResult<()> {
        let mut items = self.items.write().await;
        for key in &to_delete {
            items.remove(key);
        }
        for record in to_put {
            let key = record.key();
            let version = items.get(&key).map_or(0, |stored| stored.version) + 1;
            items.insert(key, Stored { record, version });
        }
        Ok(())
    }
}
