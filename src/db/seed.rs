use std::path::Path;

use anyhow::Context;
use serde::Deserialize;

use super::{Store, Stores};
use crate::error::AppResult;
use crate::models::{Movie, User};

/// Catalog fixture loaded at startup
#[derive(Debug, Default, Deserialize)]
pub struct SeedData {
    #[serde(default)]
    pub users: Vec<User>,
    #[serde(default)]
    pub movies: Vec<Movie>,
}

impl SeedData {
    /// Reads a JSON file of the form `{"users": [...], "movies": [...]}`
    pub fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read seed file {}", path.display()))?;
        serde_json::from_str(&raw)
            .with_context(|| format!("Failed to parse seed file {}", path.display()))
    }

    /// Upserts every user and movie
    pub async fn apply(self, stores: &Stores) -> AppResult<()> {
        let users = self.users.len();
        let movies = self.movies.len();

        stores.users.batch_write(self.users, Vec::new()).await?;
        stores.movies.batch_write(self.movies, Vec::new()).await?;

        tracing::info!(users, movies, "Seed data loaded");
        Ok(())
    }
}
