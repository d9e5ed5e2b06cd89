//! Third-party login entry and callback.

use axum::{
    extract::{Extension, Path, Query},
    http::{header::SET_COOKIE, HeaderMap, StatusCode},
    response::{IntoResponse, Redirect, Response},
};
use serde::Deserialize;
use tracing::{error, info};

use super::users::{start_session, PENDING_PROFILE_KEY};
use crate::agora::middleware::auth;
use crate::agora::oauth::{self, IdentityProvider, Profile};
use crate::agora::repository::{NewUser, RepositoryError, UserRepository};
use crate::agora::session::SessionUpdate;
use crate::agora::AppState;

const STATE_KEY: &str = "oauth_state";

pub(crate) const FLASH_ACCOUNT_TAKEN: &str =
    "That username or email is already in use. Finish signup to link your account.";

pub async fn entry(
    Extension(state): Extension<AppState>,
    Path(provider): Path<String>,
) -> Response {
    let Some(provider) = state.providers.get(&provider) else {
        return (StatusCode::NOT_FOUND, "Not Found").into_response();
    };

    let login_state = match oauth::generate_state() {
        Ok(login_state) => login_state,
        Err(err) => {
            error!("Failed to generate login state: {err}");
            return (StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error").into_response();
        }
    };

    // Anonymous session carrying the state across the provider round-trip.
    let session_id = match state.sessions.create(None).await {
        Ok(session_id) => session_id,
        Err(err) => {
            error!("Failed to create session: {err}");
            return (StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error").into_response();
        }
    };
    if let Err(err) = state
        .sessions
        .set_fields(
            &session_id,
            SessionUpdate::new().with_data(STATE_KEY, login_state.clone()),
        )
        .await
    {
        error!("Failed to stage login state: {err}");
        return (StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error").into_response();
    }

    let cookie = match auth::session_cookie(&session_id) {
        Ok(cookie) => cookie,
        Err(err) => {
            error!("Failed to build session cookie: {err}");
            return (StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error").into_response();
        }
    };

    let mut response = Redirect::to(&provider.authorize_url(&login_state)).into_response();
    response.headers_mut().append(SET_COOKIE, cookie);
    response
}

#[derive(Debug, Deserialize)]
pub struct CallbackQuery {
    code: Option<String>,
    state: Option<String>,
}

pub async fn callback(
    Extension(state): Extension<AppState>,
    Path(provider_tag): Path<String>,
    headers: HeaderMap,
    Query(query): Query<CallbackQuery>,
) -> Response {
    let Some(provider) = state.providers.get(&provider_tag) else {
        return (StatusCode::NOT_FOUND, "Not Found").into_response();
    };
    let (Some(code), Some(returned_state)) = (query.code, query.state) else {
        return (StatusCode::BAD_REQUEST, "Missing code or state").into_response();
    };

    // The state must round-trip through the session that started the login.
    let Some(session_id) = auth::session_id_from_headers(&headers) else {
        return (StatusCode::FORBIDDEN, "Forbidden").into_response();
    };
    let staged = state.sessions.take_data(&session_id, STATE_KEY).await;
    if staged.as_deref() != Some(returned_state.as_str()) {
        return (StatusCode::FORBIDDEN, "Forbidden").into_response();
    }

    let profile = match provider.exchange_code(&code).await {
        Ok(profile) => profile,
        Err(err) => {
            error!("Code exchange failed: {err}");
            return (StatusCode::BAD_GATEWAY, "Identity provider error").into_response();
        }
    };

    login_or_stage(&state, &session_id, profile).await
}

async fn login_or_stage(state: &AppState, session_id: &str, profile: Profile) -> Response {
    match state
        .users
        .find_oauth(&profile.provider, &profile.account_id)
        .await
    {
        Ok(user) => {
            // The anonymous session that carried the state is superseded.
            state.sessions.delete(session_id).await;
            info!(user_id = user.id, provider = %profile.provider, "third-party login");
            return start_session(state, user.id).await;
        }
        Err(RepositoryError::NotFound) => {}
        Err(err) => {
            error!("Account lookup failed: {err}");
            return (StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error").into_response();
        }
    }

    // First visit from this account: mint a local user from the profile.
    // The account never uses password login, so the stored secret is random.
    let password = match oauth::generate_state() {
        Ok(password) => password,
        Err(err) => {
            error!("Failed to generate placeholder secret: {err}");
            return (StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error").into_response();
        }
    };

    match state
        .users
        .insert(NewUser {
            username: profile.username.clone(),
            email: profile.email.clone(),
            password,
        })
        .await
    {
        Ok(user_id) => {
            if let Err(err) = state
                .users
                .link_oauth(user_id, &profile.provider, &profile.account_id)
                .await
            {
                error!("Failed to link new account: {err}");
            }
            info!(user_id, provider = %profile.provider, "account minted from profile");
            state.sessions.delete(session_id).await;
            start_session(state, user_id).await
        }
        Err(RepositoryError::Conflict(_)) => {
            // Someone already holds that username or email: stage the
            // profile and let the visitor finish signup themselves.
            match serde_json::to_string(&profile) {
                Ok(staged) => {
                    let update = SessionUpdate::new()
                        .with_data(PENDING_PROFILE_KEY, staged)
                        .with_flash(FLASH_ACCOUNT_TAKEN);
                    if let Err(err) = state.sessions.set_fields(session_id, update).await {
                        error!("Failed to stage profile: {err}");
                    }
                    Redirect::to("/user/signup").into_response()
                }
                Err(err) => {
                    error!("Failed to encode staged profile: {err}");
                    (StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error").into_response()
                }
            }
        }
        Err(err) => {
            error!("Failed to create account from profile: {err}");
            (StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error").into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agora::limiter::{AdmissionLimiter, RatePolicy};
    use crate::agora::middleware::dynamic::bind;
    use crate::agora::oauth::{IdentityProvider, ProviderError, ProviderRegistry};
    use crate::agora::repository::{mock::MockUserRepository, UserRepository, ROLE_USER};
    use crate::agora::session::SessionStore;
    use anyhow::Result;
    use async_trait::async_trait;
    use axum::http::header::{COOKIE, LOCATION};
    use axum::http::{Method, Request as HttpRequest};
    use axum::routing::get;
    use axum::{body::Body, Router};
    use chrono::Duration;
    use std::sync::Arc;
    use tower::ServiceExt;

    struct FakeProvider;

    #[async_trait]
    impl IdentityProvider for FakeProvider {
        fn tag(&self) -> &'static str {
            "fake"
        }

        fn authorize_url(&self, state: &str) -> String {
            format!("https://fake.test/authorize?state={state}")
        }

        async fn exchange_code(&self, code: &str) -> Result<Profile, ProviderError> {
            if code == "boom" {
                return Err(ProviderError::MissingField("access_token"));
            }
            Ok(Profile {
                account_id: "acct-1".to_string(),
                username: "fake".to_string(),
                email: "fake@example.com".to_string(),
                provider: "fake".to_string(),
            })
        }
    }

    fn state() -> (AppState, Arc<MockUserRepository>) {
        let users = Arc::new(MockUserRepository::new());
        let mut providers = ProviderRegistry::new();
        providers.register(Arc::new(FakeProvider));
        let state = AppState {
            sessions: SessionStore::new(),
            limiter: AdmissionLimiter::new(RatePolicy::new()),
            users: users.clone(),
            providers: Arc::new(providers),
            idle_limit: Duration::hours(24),
        };
        (state, users)
    }

    fn app(state: AppState) -> Router {
        Router::new()
            .merge(bind(
                "/user/login/oauth/:provider",
                &[Method::GET],
                get(entry),
            ))
            .merge(bind(
                "/user/login/oauth/:provider/callback",
                &[Method::GET],
                get(callback),
            ))
            .layer(Extension(state))
    }

    fn get_request(path: &str, cookie: Option<&str>) -> HttpRequest<Body> {
        let mut builder = HttpRequest::builder().uri(path);
        if let Some(id) = cookie {
            builder = builder.header(COOKIE, format!("session_id={id}"));
        }
        builder.body(Body::empty()).expect("request")
    }

    fn cookie_session_id(response: &axum::response::Response) -> Option<String> {
        response
            .headers()
            .get(SET_COOKIE)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.split(';').next())
            .and_then(|pair| pair.strip_prefix("session_id="))
            .map(str::to_string)
    }

    #[tokio::test]
    async fn entry_rejects_unknown_provider() -> Result<()> {
        let (state, _) = state();
        let response = app(state)
            .oneshot(get_request("/user/login/oauth/unknown", None))
            .await?;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        Ok(())
    }

    #[tokio::test]
    async fn entry_stages_state_and_redirects() -> Result<()> {
        let (state, _) = state();
        let response = app(state.clone())
            .oneshot(get_request("/user/login/oauth/fake", None))
            .await?;

        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        let location = response
            .headers()
            .get(LOCATION)
            .and_then(|v| v.to_str().ok())
            .expect("redirect target");
        assert!(location.starts_with("https://fake.test/authorize?state="));

        let session_id = cookie_session_id(&response).expect("session cookie");
        let staged = state
            .sessions
            .take_data(&session_id, STATE_KEY)
            .await
            .expect("state staged");
        assert!(location.ends_with(&staged));
        Ok(())
    }

    #[tokio::test]
    async fn callback_rejects_state_mismatch() -> Result<()> {
        let (state, _) = state();
        let session_id = state.sessions.create(None).await?;
        state
            .sessions
            .set_fields(&session_id, SessionUpdate::new().with_data(STATE_KEY, "right"))
            .await?;

        let response = app(state)
            .oneshot(get_request(
                "/user/login/oauth/fake/callback?code=ok&state=wrong",
                Some(&session_id),
            ))
            .await?;
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        Ok(())
    }

    #[tokio::test]
    async fn callback_logs_in_known_account() -> Result<()> {
        let (state, users) = state();
        let alice = users.add_user("alice", ROLE_USER, "password123");
        users.link_oauth(alice.id, "fake", "acct-1").await?;

        let session_id = state.sessions.create(None).await?;
        state
            .sessions
            .set_fields(&session_id, SessionUpdate::new().with_data(STATE_KEY, "s1"))
            .await?;

        let response = app(state.clone())
            .oneshot(get_request(
                "/user/login/oauth/fake/callback?code=ok&state=s1",
                Some(&session_id),
            ))
            .await?;

        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        let new_session = cookie_session_id(&response).expect("session cookie");
        assert_eq!(
            state.sessions.active_session_for_user(alice.id).await,
            Some(new_session)
        );
        Ok(())
    }

    #[tokio::test]
    async fn callback_mints_account_on_first_login() -> Result<()> {
        let (state, users) = state();
        let session_id = state.sessions.create(None).await?;
        state
            .sessions
            .set_fields(&session_id, SessionUpdate::new().with_data(STATE_KEY, "s1"))
            .await?;

        let response = app(state.clone())
            .oneshot(get_request(
                "/user/login/oauth/fake/callback?code=ok&state=s1",
                Some(&session_id),
            ))
            .await?;

        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        let minted = users.find_oauth("fake", "acct-1").await?;
        assert_eq!(minted.username, "fake");
        assert_eq!(
            state.sessions.active_session_for_user(minted.id).await,
            cookie_session_id(&response)
        );
        Ok(())
    }

    #[tokio::test]
    async fn callback_stages_profile_on_conflict() -> Result<()> {
        let (state, users) = state();
        // The profile's username is already taken by a local account.
        users.add_user("fake", ROLE_USER, "password123");

        let session_id = state.sessions.create(None).await?;
        state
            .sessions
            .set_fields(&session_id, SessionUpdate::new().with_data(STATE_KEY, "s1"))
            .await?;

        let response = app(state.clone())
            .oneshot(get_request(
                "/user/login/oauth/fake/callback?code=ok&state=s1",
                Some(&session_id),
            ))
            .await?;

        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert_eq!(
            response
                .headers()
                .get(LOCATION)
                .and_then(|v| v.to_str().ok()),
            Some("/user/signup")
        );

        let staged = state
            .sessions
            .take_data(&session_id, PENDING_PROFILE_KEY)
            .await
            .expect("profile staged");
        let profile: Profile = serde_json::from_str(&staged)?;
        assert_eq!(profile.account_id, "acct-1");
        assert_eq!(
            state.sessions.pop_flash(&session_id).await.as_deref(),
            Some(FLASH_ACCOUNT_TAKEN)
        );
        Ok(())
    }

    #[tokio::test]
    async fn callback_surfaces_exchange_failure() -> Result<()> {
        let (state, _) = state();
        let session_id = state.sessions.create(None).await?;
        state
            .sessions
            .set_fields(&session_id, SessionUpdate::new().with_data(STATE_KEY, "s1"))
            .await?;

        let response = app(state)
            .oneshot(get_request(
                "/user/login/oauth/fake/callback?code=boom&state=s1",
                Some(&session_id),
            ))
            .await?;
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        Ok(())
    }
}
