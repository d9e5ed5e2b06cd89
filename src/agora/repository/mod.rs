//! Narrow repository contracts consumed by the auth core. Post and comment
//! storage live behind their own services and never touch the session path.

pub mod sqlite;

#[cfg(test)]
pub mod mock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

pub const ROLE_USER: &str = "user";
pub const ROLE_MODERATOR: &str = "moderator";
pub const ROLE_ADMIN: &str = "admin";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub email: String,
    pub role: String,
    pub created: DateTime<Utc>,
}

#[derive(Clone, Debug)]
pub struct NewUser {
    pub username: String,
    pub email: String,
    pub password: String,
}

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("record not found")]
    NotFound,
    #[error("invalid credentials")]
    InvalidCredentials,
    #[error("{0} is already taken")]
    Conflict(&'static str),
    #[error(transparent)]
    Database(#[from] sqlx::Error),
    #[error("password hashing failed: {0}")]
    PasswordHash(String),
}

/// User lookups and account creation. `get_by_id` is the only call on the
/// per-request path; the rest serve the login/signup handlers.
#[async_trait]
pub trait UserRepository: Send + Sync {
    async fn get_by_id(&self, id: i64) -> Result<User, RepositoryError>;

    async fn get_by_credentials(
        &self,
        username: &str,
        password: &str,
    ) -> Result<User, RepositoryError>;

    async fn insert(&self, user: NewUser) -> Result<i64, RepositoryError>;

    async fn find_oauth(&self, provider: &str, account_id: &str)
        -> Result<User, RepositoryError>;

    async fn link_oauth(
        &self,
        user_id: i64,
        provider: &str,
        account_id: &str,
    ) -> Result<(), RepositoryError>;
}
