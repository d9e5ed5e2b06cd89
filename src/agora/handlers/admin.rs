//! Administration surface. The role gate lives in the route chain; by the
//! time this runs the identity is known to hold the admin role.

use axum::response::{IntoResponse, Json};
use serde_json::json;

use crate::agora::middleware::AuthUser;

pub async fn panel(AuthUser(user): AuthUser) -> impl IntoResponse {
    Json(json!({
        "panel": "admin",
        "user": user.username,
    }))
}
