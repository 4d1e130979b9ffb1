use crate::{
    db::{Cache, Stores},
    error::{AppError, AppResult},
    models::{Movie, Review},
};

use super::{
    movies::MovieCatalog,
    reviews::ReviewWorkflow,
    top_movies::{TopMovieRotator, MAX_TOP_MOVIES},
};

/// Number of recommendations returned by default
pub const MAX_RECOMMENDATIONS: usize = 10;

/// Generates personalized watch recommendations
///
/// Recommendations are seeded by the user's latest favorite review: unseen
/// movies of the favorite's genre whose keyword contains the favorite's
/// keyword. Users without a favorite get the current top movies instead.
pub struct RecommendationEngine {
    reviews: ReviewWorkflow,
    movies: MovieCatalog,
    top_movies: TopMovieRotator,
}

impl RecommendationEngine {
    pub fn new(stores: &Stores, cache: Option<Cache>) -> Self {
        Self {
            reviews: ReviewWorkflow::new(stores),
            movies: MovieCatalog::new(stores.movies.clone()),
            top_movies: TopMovieRotator::new(stores, cache),
        }
    }

    /// Lists up to `limit` movies for the user, newest releases first when
    /// derived from a favorite
    pub async fn list_recommendations(&mut self, user_id: &str, limit: usize) -> AppResult<Vec<Movie>> {
        self.reviews.verify_user(user_id).await?;

        match self.reviews.fetch_latest_favorite(user_id).await? {
            Some(favorite) => self.from_favorite(favorite, limit).await,
            None => {
                let mut top = self.top_movies.list_top_movies(MAX_TOP_MOVIES).await?;
                top.truncate(limit);
                Ok(top.into_iter().map(Movie::from).collect())
            }
        }
    }

    async fn from_favorite(&mut self, favorite: Review, limit: usize) -> AppResult<Vec<Movie>> {
        let seed = self.movies.fetch(&favorite.imdb_id).await?.ok_or_else(|| {
            AppError::Internal(format!(
                "Reviewed movie {} is missing from the catalog",
                favorite.imdb_id
            ))
        })?;

        let seen = self.reviews.list_reviewed_movie_ids(&favorite.user_id).await?;

        let mut picks: Vec<Movie> = self
            .movies
            .list_movies(&seed.most_frequent_genre)
            .await?
            .into_iter()
            .filter(|movie| !seen.contains(&movie.imdb_id))
            .filter(|movie| movie.most_frequent_keyword.contains(&seed.most_frequent_keyword))
            .take(limit)
            .collect();

        picks.sort_by(|a, b| b.release_year.cmp(&a.release_year));
        Ok(picks)
    }
}
