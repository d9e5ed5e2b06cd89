//! Route binding and the authorization decorators. The decorators are pure
//! functions of the identity already attached to the request; none of them
//! touch the session store or the limiter.

use axum::{
    extract::Request,
    http::{header::ALLOW, HeaderValue, Method, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Redirect, Response},
    routing::MethodRouter,
    Router,
};
use std::sync::Arc;

use super::{auth, auth_user};

pub const LOGIN_PATH: &str = "/user/login";

/// Bind a path and its allowed methods to a handler behind the
/// authentication chain. Path and method are validated before any auth work
/// runs: a disallowed method is answered with 405 plus an `Allow` header,
/// and unknown paths fall through to the router's 404 fallback.
pub fn bind(path: &str, methods: &[Method], routes: MethodRouter) -> Router {
    let allowed: Arc<Vec<Method>> = Arc::new(methods.to_vec());
    let allow = allow_header(methods);

    let guard = middleware::from_fn(move |request: Request, next: Next| {
        let allowed = Arc::clone(&allowed);
        let allow = allow.clone();
        async move {
            if allowed.contains(request.method()) {
                next.run(request).await
            } else {
                (
                    StatusCode::METHOD_NOT_ALLOWED,
                    [(ALLOW, allow)],
                    "Method Not Allowed",
                )
                    .into_response()
            }
        }
    });

    Router::new().route(
        path,
        routes
            .layer(middleware::from_fn(auth::authenticate))
            .layer(guard),
    )
}

fn allow_header(methods: &[Method]) -> HeaderValue {
    let list = methods
        .iter()
        .map(Method::as_str)
        .collect::<Vec<_>>()
        .join(", ");
    HeaderValue::from_str(&list).unwrap_or_else(|_| HeaderValue::from_static("GET"))
}

/// Redirect unauthenticated visitors to the login entry point.
pub async fn require_authenticated(request: Request, next: Next) -> Response {
    if auth_user(request.extensions()).is_none() {
        return Redirect::to(LOGIN_PATH).into_response();
    }
    next.run(request).await
}

/// Keep signed-in users out of login and signup surfaces.
pub async fn forbid_authenticated(request: Request, next: Next) -> Response {
    if auth_user(request.extensions()).is_some() {
        return (StatusCode::FORBIDDEN, "Forbidden").into_response();
    }
    next.run(request).await
}

/// Pass through only identities holding the given role.
pub async fn require_role(role: &'static str, request: Request, next: Next) -> Response {
    let held = auth_user(request.extensions()).map(|user| user.role.as_str());
    if held != Some(role) {
        return (StatusCode::FORBIDDEN, "Forbidden").into_response();
    }
    next.run(request).await
}
