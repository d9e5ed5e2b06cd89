//! Landing page data: the signed-in identity plus any one-shot flash.

use axum::{
    extract::Extension,
    http::HeaderMap,
    response::{IntoResponse, Json},
};
use serde_json::json;

use crate::agora::middleware::{auth, MaybeUser};
use crate::agora::AppState;

pub async fn home(
    Extension(state): Extension<AppState>,
    MaybeUser(user): MaybeUser,
    headers: HeaderMap,
) -> impl IntoResponse {
    // The flash pops even when the session was just retired: the request
    // still carries the old cookie, and this is its one chance to be read.
    let flash = match auth::session_id_from_headers(&headers) {
        Some(session_id) => state.sessions.pop_flash(&session_id).await,
        None => None,
    };

    Json(json!({
        "user": user.map(|user| json!({
            "id": user.id,
            "username": user.username,
            "role": user.role,
        })),
        "flash": flash,
    }))
}
