use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use serde::Deserialize;

use crate::{
    db::{Filter, ItemKey, Query, Store, Stores, WriteCondition},
    error::{AppError, AppResult},
    models::{ListReviewsResponse, Review, User},
};

use super::{movies::MovieCatalog, pagination::PaginationCursor, users::UserLookup};

/// Lowest rating that marks a review as a favorite
pub const MIN_RATING: f64 = 4.0;

/// Largest page a review listing may request, also the default page size
pub const MAXIMUM_COUNT: usize = 500;

/// Pagination token returned with the last page
pub const NO_MORE_RESULTS: &str = "No more results.";

const MAXIMUM_RATING: f64 = 5.0;
const RATING_STEP: f64 = 0.5;
const EPSILON: f64 = 1e-7;

/// True iff `rating` is a multiple of 0.5 in [0.5, 5]
///
/// Only rounding noise above a step is tolerated; a value just below one, such
/// as `4.99999999`, is not a multiple of the step.
pub fn is_valid_rating(rating: f64) -> bool {
    rating >= RATING_STEP - EPSILON
        && (rating < MAXIMUM_RATING || (MAXIMUM_RATING - rating).abs() < EPSILON)
        && rating % RATING_STEP < EPSILON
}

/// Snaps an accepted rating onto its 0.5 step
fn normalize_rating(rating: f64) -> f64 {
    (rating / RATING_STEP).round() * RATING_STEP
}

/// Resolves the `count` parameter of a review listing
///
/// Missing means [`MAXIMUM_COUNT`]; anything that is not an integer in
/// `[1, MAXIMUM_COUNT]` is a `Validation` error.
pub fn parse_count(count: Option<&str>) -> AppResult<usize> {
    let Some(raw) = count else {
        return Ok(MAXIMUM_COUNT);
    };

    let out_of_range = || {
        AppError::Validation(format!(
            "The count given {{{}}} is less than 1 or greater than {}.",
            raw, MAXIMUM_COUNT
        ))
    };

    let parsed: i64 = raw.trim().parse().map_err(|_| out_of_range())?;
    if parsed < 1 || parsed > MAXIMUM_COUNT as i64 {
        return Err(out_of_range());
    }
    Ok(parsed as usize)
}

/// Review as submitted by a client. The rating is optional on the wire so a
/// missing one can be reported as a validation failure.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewDraft {
    pub user_id: String,
    pub imdb_id: String,
    pub rating: Option<f64>,
}

/// Review use cases for a single inbound request
///
/// Create a fresh instance per request; the embedded [`UserLookup`] remembers
/// the last user it fetched.
pub struct ReviewWorkflow {
    users: UserLookup,
    movies: MovieCatalog,
    reviews: Arc<dyn Store<Review>>,
}

impl ReviewWorkflow {
    pub fn new(stores: &Stores) -> Self {
        Self {
            users: UserLookup::new(stores.users.clone()),
            movies: MovieCatalog::new(stores.movies.clone()),
            reviews: stores.reviews.clone(),
        }
    }

    /// Fetches the user, failing with `NotFound` if they do not exist
    pub async fn verify_user(&mut self, user_id: &str) -> AppResult<User> {
        self.users.get_user(user_id).await
    }

    /// Creates the review, or updates the rating of the existing one
    ///
    /// Returns the review as persisted. A concurrent write to the same review
    /// surfaces as `Conflict`; nothing is retried.
    pub async fn put(&mut self, draft: ReviewDraft) -> AppResult<Review> {
        let rating = draft.rating.ok_or_else(|| {
            AppError::Validation("Review cannot contain empty or null rating.".to_string())
        })?;

        let key = ItemKey::with_sort(&draft.user_id, &draft.imdb_id);
        match self.reviews.get(&key).await? {
            Some(existing) => self.update(existing, rating).await,
            None => self.create(draft.user_id, draft.imdb_id, rating).await,
        }
    }

    async fn create(&mut self, user_id: String, imdb_id: String, rating: f64) -> AppResult<Review> {
        let rating = Self::validate_rating(rating)?;
        self.users.get_user(&user_id).await?;
        if !self.movies.movie_exists(&imdb_id).await? {
            return Err(AppError::NotFound(format!(
                "The specified movie: {{{}}} could not be found.",
                imdb_id
            )));
        }

        let now = Utc::now();
        let review = Review {
            user_id,
            imdb_id,
            rating,
            created_at: now,
            updated_at: now,
            version: 0,
        };
        self.reviews.put(review, WriteCondition::NotExists).await
    }

    // The user and movie were checked when this review was created and are
    // never removed, so only the rating is validated here.
    async fn update(&mut self, mut existing: Review, rating: f64) -> AppResult<Review> {
        let rating = Self::validate_rating(rating)?;

        let read_version = existing.version;
        existing.rating = rating;
        existing.updated_at = Utc::now();
        self.reviews
            .put(existing, WriteCondition::VersionIs(read_version))
            .await
    }

    /// The rating as it will be stored
    fn validate_rating(rating: f64) -> AppResult<f64> {
        if is_valid_rating(rating) {
            Ok(normalize_rating(rating))
        } else {
            Err(AppError::Validation(format!(
                "The provided rating: {{{}}} is not valid.",
                rating
            )))
        }
    }

    /// Deletes a review and returns it
    pub async fn delete(&mut self, user_id: &str, imdb_id: &str) -> AppResult<Review> {
        let not_found = || {
            AppError::NotFound(format!(
                "Review with given userId {{{}}} and imdbId {{{}}} could not be found",
                user_id, imdb_id
            ))
        };

        let key = ItemKey::with_sort(user_id, imdb_id);
        if self.reviews.get(&key).await?.is_none() {
            return Err(not_found());
        }
        self.reviews.delete(&key).await?.ok_or_else(not_found)
    }

    /// One page of the user's reviews, most recent first
    pub async fn list_reviews(
        &mut self,
        user_id: &str,
        count: Option<&str>,
        pagination_token: Option<&str>,
    ) -> AppResult<ListReviewsResponse> {
        let count = parse_count(count)?;
        let cursor = PaginationCursor::decode(pagination_token)?;
        self.users.get_user(user_id).await?;

        let query = Query::index(Review::USER_CREATED_AT_INDEX, user_id)
            .limit(count)
            .start_after(cursor.map(|c| c.resume_key(user_id)))
            .descending();
        let page = self.reviews.query(query).await?;

        let pagination_token = match page.resume_key {
            Some(resume) => PaginationCursor::from_resume_key(&resume)?.encode()?,
            None => NO_MORE_RESULTS.to_string(),
        };

        Ok(ListReviewsResponse {
            reviews: page.items,
            pagination_token,
        })
    }

    /// The user's most recent review rated at least [`MIN_RATING`]
    pub async fn fetch_latest_favorite(&mut self, user_id: &str) -> AppResult<Option<Review>> {
        self.users.get_user(user_id).await?;

        let query = Query::index(Review::USER_CREATED_AT_INDEX, user_id)
            .filter(Filter::AtLeast {
                attribute: "rating",
                value: MIN_RATING,
            })
            .limit(1)
            .descending();
        Ok(self.reviews.query(query).await?.items.into_iter().next())
    }

    /// Ids of every movie the user has reviewed
    pub async fn list_reviewed_movie_ids(&mut self, user_id: &str) -> AppResult<HashSet<String>> {
        self.users.get_user(user_id).await?;

        let mut ids = HashSet::new();
        let mut resume = None;
        loop {
            let page = self
                .reviews
                .query(Query::primary(user_id).start_after(resume))
                .await?;
            ids.extend(page.items.into_iter().map(|review| review.imdb_id));
            match page.resume_key {
                Some(next) => resume = Some(next),
                None => break,
            }
        }
        Ok(ids)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::db::{MemoryStore, MockStore, Page};
    use crate::services::movies::tests::movie;
    use async_trait::async_trait;
    use chrono::{DateTime, Duration, TimeZone};
    use std::sync::atomic::{AtomicBool, Ordering};

    pub(crate) async fn seeded_stores() -> Stores {
        let stores = Stores::in_memory();
        for login in ["larry", "moe"] {
            stores
                .users
                .put(
                    User {
                        login: login.to_string(),
                        name: login.to_uppercase(),
                        phone_number: "555-0100".to_string(),
                    },
                    WriteCondition::Always,
                )
                .await
                .unwrap();
        }
        for m in [
            movie("tt1", "Drama", 8.0, "rain", 2001),
            movie("tt2", "Drama", 7.5, "rain", 2005),
            movie("tt3", "Comedy", 6.0, "dog", 1999),
        ] {
            stores.movies.put(m, WriteCondition::Always).await.unwrap();
        }
        stores
    }

    fn draft(user_id: &str, imdb_id: &str, rating: Option<f64>) -> ReviewDraft {
        ReviewDraft {
            user_id: user_id.to_string(),
            imdb_id: imdb_id.to_string(),
            rating,
        }
    }

    pub(crate) fn at(minute: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + Duration::minutes(minute)
    }

    pub(crate) async fn insert_review(
        stores: &Stores,
        user_id: &str,
        imdb_id: &str,
        rating: f64,
        minute: i64,
    ) {
        stores
            .reviews
            .put(
                Review {
                    user_id: user_id.to_string(),
                    imdb_id: imdb_id.to_string(),
                    rating,
                    created_at: at(minute),
                    updated_at: at(minute),
                    version: 0,
                },
                WriteCondition::Always,
            )
            .await
            .unwrap();
    }

    #[test]
    fn test_rating_validity() {
        for valid in [0.5, 1.0, 4.5, 5.0, 5.0 + 1e-9, 3.5 + 1e-9] {
            assert!(is_valid_rating(valid), "{} should be valid", valid);
        }
        for invalid in [0.0, 1e-8, -0.5, 5.5, 4.3, 4.4999, 4.99999999, f64::NAN] {
            assert!(!is_valid_rating(invalid), "{} should be invalid", invalid);
        }
    }

    #[test]
    fn test_parse_count() {
        assert_eq!(parse_count(None).unwrap(), MAXIMUM_COUNT);
        assert_eq!(parse_count(Some("1")).unwrap(), 1);
        assert_eq!(parse_count(Some("500")).unwrap(), 500);
        for bad in ["0", "501", "-3", "ten", ""] {
            assert!(matches!(parse_count(Some(bad)), Err(AppError::Validation(_))));
        }
    }

    #[test]
    fn test_count_message_states_bound() {
        let Err(AppError::Validation(message)) = parse_count(Some("501")) else {
            panic!("expected a validation error");
        };
        assert!(message.contains("500"));
    }

    #[tokio::test]
    async fn test_create_review() {
        let stores = seeded_stores().await;
        let mut workflow = ReviewWorkflow::new(&stores);

        let review = workflow.put(draft("larry", "tt1", Some(4.5))).await.unwrap();
        assert_eq!(review.rating, 4.5);
        assert_eq!(review.version, 1);
        assert_eq!(review.created_at, review.updated_at);
    }

    #[tokio::test]
    async fn test_put_twice_updates_rating() {
        let stores = seeded_stores().await;
        let mut workflow = ReviewWorkflow::new(&stores);

        let first = workflow.put(draft("larry", "tt1", Some(3.0))).await.unwrap();
        let second = workflow.put(draft("larry", "tt1", Some(4.0))).await.unwrap();

        assert_eq!(second.rating, 4.0);
        assert!(second.version > first.version);
        assert_eq!(second.created_at, first.created_at);
        assert!(second.updated_at >= first.updated_at);

        let stored = stores
            .reviews
            .get(&ItemKey::with_sort("larry", "tt1"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.rating, 4.0);
    }

    #[tokio::test]
    async fn test_put_stores_rating_on_its_step() {
        let stores = seeded_stores().await;
        let mut workflow = ReviewWorkflow::new(&stores);

        let created = workflow
            .put(draft("larry", "tt1", Some(3.5 + 1e-9)))
            .await
            .unwrap();
        assert_eq!(created.rating, 3.5);

        let updated = workflow
            .put(draft("larry", "tt1", Some(5.0 + 1e-9)))
            .await
            .unwrap();
        assert_eq!(updated.rating, 5.0);

        for rating in [1e-8, 4.99999999] {
            let result = workflow.put(draft("larry", "tt1", Some(rating))).await;
            assert!(matches!(result, Err(AppError::Validation(_))));
        }
    }

    #[tokio::test]
    async fn test_put_rejects_missing_and_invalid_ratings() {
        let stores = seeded_stores().await;
        let mut workflow = ReviewWorkflow::new(&stores);

        for rating in [None, Some(0.0), Some(5.5), Some(4.3)] {
            let result = workflow.put(draft("larry", "tt1", rating)).await;
            assert!(matches!(result, Err(AppError::Validation(_))));
        }

        workflow.put(draft("larry", "tt1", Some(2.0))).await.unwrap();
        let result = workflow.put(draft("larry", "tt1", Some(7.0))).await;
        assert!(matches!(result, Err(AppError::Validation(_))));
    }

    #[tokio::test]
    async fn test_put_unknown_user_or_movie() {
        let stores = seeded_stores().await;
        let mut workflow = ReviewWorkflow::new(&stores);

        let result = workflow.put(draft("curly", "tt1", Some(3.0))).await;
        assert!(matches!(result, Err(AppError::NotFound(_))));

        let result = workflow.put(draft("larry", "tt404", Some(3.0))).await;
        assert!(matches!(result, Err(AppError::NotFound(_))));
    }

    /// Review store that lets a competing writer update the review right
    /// after this request has read it
    struct RacingStore {
        inner: MemoryStore<Review>,
        raced: AtomicBool,
    }

    #[async_trait]
    impl Store<Review> for RacingStore {
        async fn get(&self, key: &ItemKey) -> AppResult<Option<Review>> {
            let read = self.inner.get(key).await?;
            if let Some(review) = &read {
                if !self.raced.swap(true, Ordering::SeqCst) {
                    let mut competing = review.clone();
                    competing.rating = 1.0;
                    self.inner
                        .put(competing, WriteCondition::VersionIs(review.version))
                        .await?;
                }
            }
            Ok(read)
        }

        async fn put(&self, record: Review, condition: WriteCondition) -> AppResult<Review> {
            self.inner.put(record, condition).await
        }

        async fn delete(&self, key: &ItemKey) -> AppResult<Option<Review>> {
            self.inner.delete(key).await
        }

        async fn query(&self, query: Query) -> AppResult<Page<Review>> {
            self.inner.query(query).await
        }

        async fn scan(&self, limit: Option<usize>) -> AppResult<Vec<Review>> {
            self.inner.scan(limit).await
        }

        async fn batch_write(&self, to_put: Vec<Review>, to_delete: Vec<ItemKey>) -> AppResult<()> {
            self.inner.batch_write(to_put, to_delete).await
        }
    }

    #[tokio::test]
    async fn test_concurrent_update_loses_with_conflict() {
        let stores = seeded_stores().await;
        insert_review(&stores, "larry", "tt1", 3.0, 0).await;
        let existing = stores
            .reviews
            .get(&ItemKey::with_sort("larry", "tt1"))
            .await
            .unwrap()
            .unwrap();

        let racing = RacingStore {
            inner: MemoryStore::new(),
            raced: AtomicBool::new(false),
        };
        racing
            .inner
            .put(existing, WriteCondition::Always)
            .await
            .unwrap();
        let reviews: Arc<dyn Store<Review>> = Arc::new(racing);
        let stores = Stores {
            reviews: reviews.clone(),
            ..stores
        };

        let mut workflow = ReviewWorkflow::new(&stores);
        let result = workflow.put(draft("larry", "tt1", Some(4.5))).await;
        assert!(matches!(result, Err(AppError::Conflict(_))));

        let stored = reviews
            .get(&ItemKey::with_sort("larry", "tt1"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.rating, 1.0);
    }

    #[tokio::test]
    async fn test_delete_review() {
        let stores = seeded_stores().await;
        insert_review(&stores, "larry", "tt1", 3.0, 0).await;
        let mut workflow = ReviewWorkflow::new(&stores);

        let deleted = workflow.delete("larry", "tt1").await.unwrap();
        assert_eq!(deleted.imdb_id, "tt1");

        let result = workflow.delete("larry", "tt1").await;
        assert!(matches!(result, Err(AppError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_list_reviews_pages_most_recent_first() {
        let stores = seeded_stores().await;
        insert_review(&stores, "larry", "tt1", 3.0, 10).await;
        insert_review(&stores, "larry", "tt2", 4.0, 30).await;
        insert_review(&stores, "larry", "tt3", 5.0, 20).await;
        insert_review(&stores, "moe", "tt1", 2.0, 40).await;
        let mut workflow = ReviewWorkflow::new(&stores);

        let first = workflow
            .list_reviews("larry", Some("2"), None)
            .await
            .unwrap();
        let ids: Vec<_> = first.reviews.iter().map(|r| r.imdb_id.as_str()).collect();
        assert_eq!(ids, vec!["tt2", "tt3"]);
        assert_ne!(first.pagination_token, NO_MORE_RESULTS);

        let second = workflow
            .list_reviews("larry", Some("2"), Some(&first.pagination_token))
            .await
            .unwrap();
        let ids: Vec<_> = second.reviews.iter().map(|r| r.imdb_id.as_str()).collect();
        assert_eq!(ids, vec!["tt1"]);
        assert_eq!(second.pagination_token, NO_MORE_RESULTS);
    }

    #[tokio::test]
    async fn test_list_reviews_default_count_and_errors() {
        let stores = seeded_stores().await;
        insert_review(&stores, "larry", "tt1", 3.0, 10).await;
        let mut workflow = ReviewWorkflow::new(&stores);

        let all = workflow.list_reviews("larry", None, None).await.unwrap();
        assert_eq!(all.reviews.len(), 1);
        assert_eq!(all.pagination_token, NO_MORE_RESULTS);

        assert!(matches!(
            workflow.list_reviews("larry", Some("0"), None).await,
            Err(AppError::Validation(_))
        ));
        assert!(matches!(
            workflow.list_reviews("larry", None, Some("a#b#c")).await,
            Err(AppError::Validation(_))
        ));
        assert!(matches!(
            workflow.list_reviews("curly", None, None).await,
            Err(AppError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_latest_favorite() {
        let stores = seeded_stores().await;
        insert_review(&stores, "larry", "tt1", 4.0, 10).await;
        insert_review(&stores, "larry", "tt2", 4.5, 20).await;
        insert_review(&stores, "larry", "tt3", 2.0, 30).await;
        let mut workflow = ReviewWorkflow::new(&stores);

        let favorite = workflow.fetch_latest_favorite("larry").await.unwrap();
        assert_eq!(favorite.unwrap().imdb_id, "tt2");
        assert!(workflow.fetch_latest_favorite("moe").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_reviewed_movie_ids() {
        let stores = seeded_stores().await;
        insert_review(&stores, "larry", "tt1", 4.0, 10).await;
        insert_review(&stores, "larry", "tt3", 2.0, 30).await;
        insert_review(&stores, "moe", "tt2", 2.0, 30).await;
        let mut workflow = ReviewWorkflow::new(&stores);

        let ids = workflow.list_reviewed_movie_ids("larry").await.unwrap();
        assert_eq!(
            ids,
            HashSet::from(["tt1".to_string(), "tt3".to_string()])
        );
    }

    #[tokio::test]
    async fn test_store_failure_propagates() {
        let stores = seeded_stores().await;
        let mut reviews = MockStore::<Review>::new();
        reviews
            .expect_get()
            .returning(|_| Err(AppError::Internal("store unavailable".to_string())));
        let stores = Stores {
            reviews: Arc::new(reviews),
            ..stores
        };

        let mut workflow = ReviewWorkflow::new(&stores);
        let result = workflow.put(draft("larry", "tt1", Some(4.0))).await;
        assert!(matches!(result, Err(AppError::Internal(_))));
    }
}
