use crate::{
    db::{ItemKey, ResumeKey, SortValue},
    error::{AppError, AppResult},
};

const SEPARATOR: char = '#';

/// Resume point of a user's review listing, exchanged with clients as
/// `imdbId#createdAt`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaginationCursor {
    pub imdb_id: String,
    pub created_at: String,
}

impl PaginationCursor {
    pub fn new(imdb_id: impl Into<String>, created_at: impl Into<String>) -> Self {
        Self {
            imdb_id: imdb_id.into(),
            created_at: created_at.into(),
        }
    }

    /// Renders the opaque token handed to clients
    pub fn encode(&self) -> AppResult<String> {
        for part in [&self.imdb_id, &self.created_at] {
            if part.is_empty() || part.contains(SEPARATOR) {
                return Err(AppError::Validation(format!(
                    "Cannot build pagination token from {{imdbId: {}, createdAt: {}}}",
                    self.imdb_id, self.created_at
                )));
            }
        }
        Ok(format!("{}{}{}", self.imdb_id, SEPARATOR, self.created_at))
    }

    /// Parses a client token. A missing or blank token means "start from the
    /// beginning" and yields `None`.
    pub fn decode(token: Option<&str>) -> AppResult<Option<Self>> {
        let token = match token {
            Some(t) if !t.trim().is_empty() => t,
            _ => return Ok(None),
        };

        let parts: Vec<&str> = token.split(SEPARATOR).collect();
        match parts.as_slice() {
            [imdb_id, created_at] if !imdb_id.is_empty() && !created_at.is_empty() => {
                Ok(Some(Self::new(*imdb_id, *created_at)))
            }
            _ => Err(AppError::Validation(format!(
                "Invalid pagination token: {}",
                token
            ))),
        }
    }

    /// Store resume key inside `user_id`'s review index
    pub fn resume_key(&self, user_id: &str) -> ResumeKey {
        ResumeKey {
            key: ItemKey::with_sort(user_id, &self.imdb_id),
            sort: SortValue::Text(self.created_at.clone()),
        }
    }

    /// Inverse of [`resume_key`](Self::resume_key)
    pub fn from_resume_key(resume: &ResumeKey) -> AppResult<Self> {
        match (&resume.key.sort, &resume.sort) {
            (Some(imdb_id), SortValue::Text(created_at)) => {
                Ok(Self::new(imdb_id.clone(), created_at.clone()))
            }
            _ => Err(AppError::Internal(format!(
                "Review resume key has unexpected shape: {:?}",
                resume
            ))),
        }
    }
}
