use std::sync::Arc;

use crate::{
    db::{ItemKey, Store},
    error::{AppError, AppResult},
    models::User,
};

/// Fetches users, remembering the most recent one
///
/// One lookup lives as long as the workflow that owns it, so the remembered
/// user is never shared across requests.
pub struct UserLookup {
    store: Arc<dyn Store<User>>,
    cached: Option<User>,
}

impl UserLookup {
    pub fn new(store: Arc<dyn Store<User>>) -> Self {
        Self {
            store,
            cached: None,
        }
    }

    /// Returns the user with login `user_id`
    ///
    /// Fails with `NotFound` if no such user exists and `Validation` for a
    /// blank id.
    pub async fn get_user(&mut self, user_id: &str) -> AppResult<User> {
        if user_id.trim().is_empty() {
            return Err(AppError::Validation(
                "Cannot look up user by a blank userId".to_string(),
            ));
        }

        if let Some(user) = self.cached.as_ref().filter(|u| u.login == user_id) {
            return Ok(user.clone());
        }

        let user = self
            .store
            .get(&ItemKey::new(user_id))
            .await?
            .ok_or_else(|| {
                AppError::NotFound(format!("The specified user: {{{}}} could not be found.", user_id))
            })?;

        self.cached = Some(user.clone());
        Ok(user)
    }
}
