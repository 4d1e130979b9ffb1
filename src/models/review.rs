use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::db::{IndexEntry, ItemKey, Record, SortValue};

/// A user's rating of one movie. At most one review exists per
/// (`user_id`, `imdb_id`) pair.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Review {
    pub user_id: String,
    pub imdb_id: String,
    pub rating: f64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Assigned by the store on every write; never serialized
    #[serde(skip)]
    pub version: u64,
}

impl Review {
    /// Secondary index listing a user's reviews by creation time
    pub const USER_CREATED_AT_INDEX: &'static str = "userId-createdAt-index";

    /// Position of this review in the user's review index
    pub fn created_at_key(&self) -> String {
        timestamp_key(&self.created_at)
    }
}

/// Fixed-width UTC rendering, so lexical order matches chronological order
pub fn timestamp_key(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

impl Record for Review {
    const ENTITY: &'static str = "reviews";

    fn key(&self) -> ItemKey {
        ItemKey::with_sort(&self.user_id, &self.imdb_id)
    }

    fn secondary_index(&self) -> Option<IndexEntry> {
        Some(IndexEntry {
            name: Self::USER_CREATED_AT_INDEX,
            partition: self.user_id.clone(),
            sort: SortValue::Text(self.created_at_key()),
        })
    }

    fn set_version(&mut self, version: u64) {
        self.version = version;
    }
}

/// Archived copy of a review captured when it was removed
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DeletedReview {
    pub user_id: String,
    pub imdb_id: String,
    pub rating: f64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Record for DeletedReview {
    const ENTITY: &'static str = "deleted_reviews";

    /// Re-delivery of one deletion lands on the same key; deleting a
    /// re-created review later produces a separate entry.
    fn key(&self) -> ItemKey {
        ItemKey::with_sort(
            &self.user_id,
            format!("{}#{}", self.imdb_id, timestamp_key(&self.updated_at)),
        )
    }
}

impl From<Review> for DeletedReview {
    fn from(review: Review) -> Self {
        Self {
            user_id: review.user_id,
            imdb_id: review.imdb_id,
            rating: review.rating,
            created_at: review.created_at,
            updated_at: review.updated_at,
        }
    }
}

/// One page of a user's reviews
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ListReviewsResponse {
    pub reviews: Vec<Review>,
    /// Cursor for the next page, or the terminal marker when none remain
    pub pagination_token: String,
}
