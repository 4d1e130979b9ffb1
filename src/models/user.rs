use serde::{Deserialize, Serialize};

use crate::db::{ItemKey, Record};

/// A catalog user, identified by their login
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub login: String,
    pub name: String,
    pub phone_number: String,
}

impl Record for User {
    const ENTITY: &'static str = "users";

    fn key(&self) -> ItemKey {
        ItemKey::new(&self.login)
    }
}
