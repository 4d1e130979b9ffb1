use std::sync::Arc;

use rand::Rng;
use serde::Serialize;

use crate::{
    cached,
    db::{Cache, CacheKey, Record, Store, Stores},
    error::{AppError, AppResult},
    models::TopMovie,
};

use super::movies::MovieCatalog;

/// Size of the top-movies table
pub const MAX_TOP_MOVIES: usize = 10;

/// Seconds a cached top-movies list stays valid
pub const TOP_MOVIES_TTL: u64 = 300;

/// Outcome of one rotation
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Rotation {
    pub old: Vec<TopMovie>,
    pub new: Vec<TopMovie>,
    /// Set when the table was swapped but the cached list could not be
    /// replaced; readers may see the old list until it expires.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_error: Option<String>,
}

/// Maintains the rotating table of top movies
#[derive(Clone)]
pub struct TopMovieRotator {
    movies: MovieCatalog,
    top_movies: Arc<dyn Store<TopMovie>>,
    cache: Option<Cache>,
}

fn ensure_max(max: usize) -> AppResult<()> {
    if max > MAX_TOP_MOVIES {
        return Err(AppError::Validation(format!(
            "Max cannot be greater than {}.",
            MAX_TOP_MOVIES
        )));
    }
    Ok(())
}

fn ids(movies: &[TopMovie]) -> Vec<String> {
    movies.iter().map(|m| m.imdb_id.clone()).collect()
}

impl TopMovieRotator {
    pub fn new(stores: &Stores, cache: Option<Cache>) -> Self {
        Self {
            movies: MovieCatalog::new(stores.movies.clone()),
            top_movies: stores.top_movies.clone(),
            cache,
        }
    }

    /// Replaces the current top movies with the best movie of each of `max`
    /// randomly drawn genres
    ///
    /// Stale entries are deleted before the new ones are written, so a movie
    /// drawn again survives the swap. The swap is not atomic: if the batch
    /// write fails the error carries the ids of both halves. Once the batch has
    /// committed the rotation is reported as done, even if the cached list
    /// could not be replaced.
    pub async fn update_top_movies<R>(&self, max: usize, rng: &mut R) -> AppResult<Rotation>
    where
        R: Rng + Send + ?Sized,
    {
        ensure_max(max)?;

        let old = self.top_movies.scan(Some(max)).await?;
        let new: Vec<TopMovie> = self
            .movies
            .fetch_top_rated_random_genres(max, rng)
            .await?
            .into_iter()
            .map(TopMovie::from)
            .collect();

        let stale = old.iter().map(Record::key).collect();
        if let Err(e) = self.top_movies.batch_write(new.clone(), stale).await {
            return Err(AppError::PartialRotation {
                old: ids(&old),
                new: ids(&new),
                reason: e.to_string(),
            });
        }

        let cache_error = match &self.cache {
            Some(cache) => self.write_through(cache).await.err().map(|e| e.to_string()),
            None => None,
        };

        Ok(Rotation {
            old,
            new,
            cache_error,
        })
    }

    async fn write_through(&self, cache: &Cache) -> AppResult<()> {
        let current = self.load().await?;
        cache
            .replace(&CacheKey::TopMovies, &current, TOP_MOVIES_TTL)
            .await
    }

    /// Up to `max` top movies, highest rated first
    pub async fn list_top_movies(&self, max: usize) -> AppResult<Vec<TopMovie>> {
        ensure_max(max)?;

        let mut top: Vec<TopMovie> = match &self.cache {
            Some(cache) => cached!(cache, CacheKey::TopMovies, TOP_MOVIES_TTL, self.load())?,
            None => self.load().await?,
        };
        top.truncate(max);
        Ok(top)
    }

    async fn load(&self) -> AppResult<Vec<TopMovie>> {
        let mut top = self.top_movies.scan(Some(MAX_TOP_MOVIES)).await?;
        top.sort_by(|a, b| b.imdb_rating.total_cmp(&a.imdb_rating));
        Ok(top)
    }
}
