//! Request middleware: authentication, authorization decorators, and route
//! binding.

pub mod auth;
pub mod dynamic;

use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{request::Parts, Extensions, StatusCode},
};

use crate::agora::repository::User;

// Module-private key for the identity attached by the auth middleware.
// Downstream code reads it through the accessors below, never directly.
#[derive(Clone, Debug)]
pub(crate) struct CurrentUser(pub(crate) User);

/// Read-only view of the identity on a request.
pub(crate) fn auth_user(extensions: &Extensions) -> Option<&User> {
    extensions.get::<CurrentUser>().map(|current| &current.0)
}

/// Extractor for routes guarded by `require_authenticated`; rejects with 401
/// if the guard was somehow bypassed.
#[derive(Clone, Debug)]
pub struct AuthUser(pub User);

#[async_trait]
impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
{
    type Rejection = StatusCode;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        auth_user(&parts.extensions)
            .cloned()
            .map(Self)
            .ok_or(StatusCode::UNAUTHORIZED)
    }
}

/// Extractor for routes open to both visitors and signed-in users.
#[derive(Clone, Debug)]
pub struct MaybeUser(pub Option<User>);

#[async_trait]
impl<S> FromRequestParts<S> for MaybeUser
where
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(Self(auth_user(&parts.extensions).cloned()))
    }
}
