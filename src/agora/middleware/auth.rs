//! Per-request authentication: session resolution, sliding expiration, and
//! admission control, in that order.

use axum::{
    extract::{Extension, Request},
    http::{
        header::{InvalidHeaderValue, COOKIE, SET_COOKIE},
        HeaderMap, HeaderValue, StatusCode,
    },
    middleware::Next,
    response::{IntoResponse, Response},
};
use tracing::error;

use super::CurrentUser;
use crate::agora::{
    limiter::Admission,
    repository::{RepositoryError, UserRepository},
    session::{ActivityCheck, SessionUpdate, FLASH_SESSION_EXPIRED},
    AppState,
};

pub const SESSION_COOKIE_NAME: &str = "session_id";

/// Flash staged on every session of a user whose admission block lapsed.
pub const FLASH_TOO_MANY_REQUESTS: &str =
    "You have been signed out after sending too many requests. Please sign in again.";

/// The authentication gate. Resolves the cookie to a session, applies the
/// sliding idle window, asks the limiter for admission, and attaches the
/// user to the request. Every failure path is explicit; anonymous traffic
/// passes straight through.
pub async fn authenticate(
    Extension(state): Extension<AppState>,
    mut request: Request,
    next: Next,
) -> Response {
    let Some(session_id) = session_id_from_headers(request.headers()) else {
        return next.run(request).await;
    };

    let session = match state
        .sessions
        .check_activity(&session_id, state.idle_limit)
        .await
    {
        // Unknown cookie: not an error, the visitor is simply anonymous.
        Err(_) => return next.run(request).await,
        Ok(ActivityCheck::Disabled(_)) => {
            // Whoever disabled the session staged its goodbye flash; this
            // request surfaces it, then the record and the cookie go away.
            let response = next.run(request).await;
            state.sessions.delete(&session_id).await;
            return clear_cookie(response);
        }
        Ok(ActivityCheck::Expired) => {
            let _ = state.sessions.disable(&session_id).await;
            let _ = state
                .sessions
                .set_fields(
                    &session_id,
                    SessionUpdate::new().with_flash(FLASH_SESSION_EXPIRED),
                )
                .await;
            let response = next.run(request).await;
            state.sessions.delete(&session_id).await;
            return clear_cookie(response);
        }
        Ok(ActivityCheck::Active(session)) => session,
    };

    let Some(user_id) = session.user_id else {
        // Anonymous-but-tracked sessions skip admission and lookup.
        return next.run(request).await;
    };

    match state.limiter.try_admit(user_id, session.last_activity).await {
        Admission::Allowed => {}
        Admission::Blocked => {
            return (StatusCode::TOO_MANY_REQUESTS, "Too Many Requests").into_response();
        }
        Admission::UnblockDue => {
            // A lapsed block costs the user every session, not just the
            // bucket; resuming requires signing in again.
            state
                .sessions
                .disable_all_for_user(user_id, FLASH_TOO_MANY_REQUESTS)
                .await;
            let response = next.run(request).await;
            state.sessions.delete(&session_id).await;
            return clear_cookie(response);
        }
    }

    let user = match state.users.get_by_id(user_id).await {
        Ok(user) => user,
        Err(RepositoryError::NotFound) => {
            let _ = state.sessions.disable(&session_id).await;
            let response = next.run(request).await;
            state.sessions.delete(&session_id).await;
            return clear_cookie(response);
        }
        Err(err) => {
            error!("Failed to resolve session user: {err}");
            state.sessions.delete(&session_id).await;
            return clear_cookie(
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error").into_response(),
            );
        }
    };

    request.extensions_mut().insert(CurrentUser(user));
    next.run(request).await
}

/// Pull the session id out of the `Cookie` header, if present.
pub(crate) fn session_id_from_headers(headers: &HeaderMap) -> Option<String> {
    let header = headers.get(COOKIE)?;
    let value = header.to_str().ok()?;
    for pair in value.split(';') {
        let trimmed = pair.trim();
        let mut parts = trimmed.splitn(2, '=');
        let key = parts.next()?.trim();
        let val = parts.next()?.trim();
        if key == SESSION_COOKIE_NAME {
            return Some(val.to_string());
        }
    }
    None
}

/// Build the session credential cookie.
///
/// # Errors
/// Returns an error if the session id does not form a valid header value.
pub(crate) fn session_cookie(session_id: &str) -> Result<HeaderValue, InvalidHeaderValue> {
    HeaderValue::from_str(&format!(
        "{SESSION_COOKIE_NAME}={session_id}; Path=/; HttpOnly; Secure"
    ))
}

/// Replacement cookie that makes the client drop its credential.
pub(crate) fn clear_session_cookie() -> HeaderValue {
    HeaderValue::from_static("session_id=; Path=/; HttpOnly; Secure; Max-Age=0")
}

fn clear_cookie(mut response: Response) -> Response {
    // A handler further down may have minted a fresh credential (a login
    // submitted with a stale cookie); never clobber it with the removal.
    let fresh_credential = response.headers().get_all(SET_COOKIE).iter().any(|value| {
        value
            .to_str()
            .is_ok_and(|value| value.starts_with(SESSION_COOKIE_NAME))
    });
    if !fresh_credential {
        response
            .headers_mut()
            .append(SET_COOKIE, clear_session_cookie());
    }
    response
}
