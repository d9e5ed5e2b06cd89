//! Local account flows: signup, login, logout.

use axum::{
    extract::{Extension, Form},
    http::{header::SET_COOKIE, HeaderMap, StatusCode},
    response::{IntoResponse, Json, Redirect, Response},
};
use serde::Deserialize;
use serde_json::json;
use tracing::{error, info};

use super::{valid_email, valid_password, valid_username};
use crate::agora::middleware::dynamic::LOGIN_PATH;
use crate::agora::middleware::{auth, AuthUser};
use crate::agora::oauth::Profile;
use crate::agora::repository::{NewUser, RepositoryError, UserRepository};
use crate::agora::AppState;

pub(crate) const PENDING_PROFILE_KEY: &str = "pending_oauth_profile";

#[derive(Debug, Deserialize)]
pub struct SignupForm {
    username: String,
    email: String,
    password: String,
}

#[derive(Debug, Deserialize)]
pub struct LoginForm {
    username: String,
    password: String,
}

#[derive(Debug, Deserialize)]
pub struct LogoutForm {
    csrf_token: Option<String>,
}

pub async fn signup(
    Extension(state): Extension<AppState>,
    headers: HeaderMap,
    Form(form): Form<SignupForm>,
) -> Response {
    let mut errors = Vec::new();
    if !valid_username(&form.username) {
        errors.push("username");
    }
    if !valid_email(&form.email) {
        errors.push("email");
    }
    if !valid_password(&form.password) {
        errors.push("password");
    }
    if !errors.is_empty() {
        return (
            StatusCode::UNPROCESSABLE_ENTITY,
            Json(json!({ "errors": errors })),
        )
            .into_response();
    }

    let user_id = match state
        .users
        .insert(NewUser {
            username: form.username,
            email: form.email,
            password: form.password,
        })
        .await
    {
        Ok(user_id) => user_id,
        Err(RepositoryError::Conflict(field)) => {
            return (
                StatusCode::CONFLICT,
                Json(json!({ "errors": { field: "already taken" } })),
            )
                .into_response();
        }
        Err(err) => {
            error!("Failed to create account: {err}");
            return (StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error").into_response();
        }
    };

    // A signup that started at a third-party provider carries a staged
    // profile; link it so the next OAuth login maps to this account.
    if let Some(session_id) = auth::session_id_from_headers(&headers) {
        if let Some(staged) = state.sessions.take_data(&session_id, PENDING_PROFILE_KEY).await {
            match serde_json::from_str::<Profile>(&staged) {
                Ok(profile) => {
                    if let Err(err) = state
                        .users
                        .link_oauth(user_id, &profile.provider, &profile.account_id)
                        .await
                    {
                        error!("Failed to link staged profile: {err}");
                    }
                }
                Err(err) => error!("Discarding unreadable staged profile: {err}"),
            }
        }
    }

    info!(user_id, "account created");
    Redirect::to(LOGIN_PATH).into_response()
}

pub async fn login(
    Extension(state): Extension<AppState>,
    headers: HeaderMap,
    Form(form): Form<LoginForm>,
) -> Response {
    match state
        .users
        .get_by_credentials(&form.username, &form.password)
        .await
    {
        Ok(user) => {
            // Any anonymous session presented with the form is superseded.
            if let Some(old) = auth::session_id_from_headers(&headers) {
                state.sessions.delete(&old).await;
            }
            info!(user_id = user.id, "login successful");
            start_session(&state, user.id).await
        }
        Err(RepositoryError::NotFound | RepositoryError::InvalidCredentials) => (
            StatusCode::UNPROCESSABLE_ENTITY,
            Json(json!({
                "errors": {
                    "generic": "Authentication failed. Please check your credentials and try again",
                }
            })),
        )
            .into_response(),
        Err(err) => {
            error!("Login failed: {err}");
            (StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error").into_response()
        }
    }
}

pub async fn logout(
    Extension(state): Extension<AppState>,
    AuthUser(user): AuthUser,
    headers: HeaderMap,
    Form(form): Form<LogoutForm>,
) -> Response {
    let Some(session_id) = auth::session_id_from_headers(&headers) else {
        return (StatusCode::FORBIDDEN, "Forbidden").into_response();
    };
    let Some(session) = state.sessions.get(&session_id).await else {
        return (StatusCode::FORBIDDEN, "Forbidden").into_response();
    };

    // The logout form must echo the anti-forgery token minted at login.
    if form.csrf_token.as_deref() != Some(session.csrf_token.as_str()) {
        return (StatusCode::FORBIDDEN, "Forbidden").into_response();
    }

    state.sessions.delete(&session_id).await;
    // That was the user's only active session; drop their limiter state too.
    state.limiter.retire(user.id).await;
    info!(user_id = user.id, "logout");

    let mut response = Redirect::to("/").into_response();
    response
        .headers_mut()
        .append(SET_COOKIE, auth::clear_session_cookie());
    response
}

/// Create the session for a verified user and hand back the redirect that
/// sets the credential cookie.
pub(crate) async fn start_session(state: &AppState, user_id: i64) -> Response {
    let session_id = match state.sessions.create(Some(user_id)).await {
        Ok(session_id) => session_id,
        Err(err) => {
            error!("Failed to create session: {err}");
            return (StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error").into_response();
        }
    };

    let cookie = match auth::session_cookie(&session_id) {
        Ok(cookie) => cookie,
        Err(err) => {
            error!("Failed to build session cookie: {err}");
            return (StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error").into_response();
        }
    };

    let mut response = Redirect::to("/").into_response();
    response.headers_mut().append(SET_COOKIE, cookie);
    response
}
