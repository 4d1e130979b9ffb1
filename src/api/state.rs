use crate::{
    db::{Cache, Stores},
    services::{
        ChangeFeed, DeletedReviewArchiver, RecommendationEngine, ReviewWorkflow, TopMovieRotator,
    },
};

/// Shared application state
///
/// Holds only shareable handles. Workflows that carry per-request state are
/// built fresh by the handlers from these.
#[derive(Clone)]
pub struct AppState {
    pub stores: Stores,
    pub cache: Option<Cache>,
    pub change_feed: ChangeFeed,
}

impl AppState {
    pub fn new(stores: Stores, cache: Option<Cache>, change_feed: ChangeFeed) -> Self {
        Self {
            stores,
            cache,
            change_feed,
        }
    }

    pub fn review_workflow(&self) -> ReviewWorkflow {
        ReviewWorkflow::new(&self.stores)
    }

    pub fn recommendation_engine(&self) -> RecommendationEngine {
        RecommendationEngine::new(&self.stores, self.cache.clone())
    }

    pub fn top_movie_rotator(&self) -> TopMovieRotator {
        TopMovieRotator::new(&self.stores, self.cache.clone())
    }

    pub fn archiver(&self) -> DeletedReviewArchiver {
        DeletedReviewArchiver::new(self.stores.deleted_reviews.clone())
    }
}
