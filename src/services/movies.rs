use std::sync::Arc;

use rand::{seq::SliceRandom, Rng};

use crate::{
    db::{Filter, ItemKey, Query, Store},
    error::{AppError, AppResult},
    models::{Genre, Movie},
};

/// Upper bound on movies returned by one genre listing
pub const MAX_MOVIES_RETRIEVED: usize = 500;

/// Read-only access to the movie catalog
#[derive(Clone)]
pub struct MovieCatalog {
    store: Arc<dyn Store<Movie>>,
}

impl MovieCatalog {
    pub fn new(store: Arc<dyn Store<Movie>>) -> Self {
        Self { store }
    }

    /// Fetches a movie by its IMDb id. A blank id is a `Validation` error.
    pub async fn fetch(&self, imdb_id: &str) -> AppResult<Option<Movie>> {
        if imdb_id.trim().is_empty() {
            return Err(AppError::Validation(format!(
                "Cannot look up movie by invalid imdbId. {{imdbId: {}}}",
                imdb_id
            )));
        }
        self.store.get(&ItemKey::new(imdb_id)).await
    }

    pub async fn movie_exists(&self, imdb_id: &str) -> AppResult<bool> {
        Ok(self.fetch(imdb_id).await?.is_some())
    }

    /// Non-adult movies whose most frequent genre is `genre`, highest rated
    /// first, capped at [`MAX_MOVIES_RETRIEVED`]
    pub async fn list_movies(&self, genre: &str) -> AppResult<Vec<Movie>> {
        let query = Query::index(Movie::GENRE_RATING_INDEX, genre)
            .filter(Filter::Equals {
                attribute: "isAdult",
                value: false,
            })
            .limit(MAX_MOVIES_RETRIEVED)
            .descending();

        Ok(self.store.query(query).await?.items)
    }

    /// Highest-rated movie of each of `max` randomly chosen genres
    ///
    /// Genres without movies contribute nothing, so the result may be shorter
    /// than `max`.
    pub async fn fetch_top_rated_random_genres<R>(
        &self,
        max: usize,
        rng: &mut R,
    ) -> AppResult<Vec<Movie>>
    where
        R: Rng + Send + ?Sized,
    {
        let mut genres = Genre::ALL;
        genres.shuffle(rng);

        let mut fetched = Vec::with_capacity(max);
        for genre in genres.iter().take(max) {
            let query = Query::index(Movie::GENRE_RATING_INDEX, genre.as_str())
                .limit(1)
                .descending();
            fetched.extend(self.store.query(query).await?.items);
        }

        Ok(fetched)
    }
}
