//! Route handlers. These stay thin: the interesting work happens in the
//! session store, the limiter, and the middleware chain.

pub mod admin;
pub mod health;
pub mod home;
pub mod oauth_login;
pub mod users;

pub use self::health::health;
pub use self::home::home;

use axum::{http::StatusCode, response::IntoResponse};
use regex::Regex;

pub async fn not_found() -> impl IntoResponse {
    (StatusCode::NOT_FOUND, "Not Found")
}

pub(crate) fn valid_email(email: &str) -> bool {
    Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").map_or(false, |re| re.is_match(email))
}

pub(crate) fn valid_username(username: &str) -> bool {
    !username.is_empty()
        && username.len() <= 32
        && username
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

pub(crate) fn valid_password(password: &str) -> bool {
    password.len() >= 8
}
