//! Forum service wiring: shared state, the route table, and the listener.

pub mod handlers;
pub mod limiter;
pub mod middleware;
pub mod oauth;
pub mod repository;
pub mod session;

use anyhow::{Context, Result};
use axum::{
    body::Body,
    http::{HeaderName, HeaderValue, Method, Request},
    middleware::{from_fn, Next},
    routing::{get, post},
    Extension, Router,
};
use sqlx::sqlite::SqlitePoolOptions;
use std::sync::Arc;
use tokio::{net::TcpListener, sync::watch};
use tower::ServiceBuilder;
use tower_http::{
    request_id::PropagateRequestIdLayer, set_header::SetRequestHeaderLayer, trace::TraceLayer,
};
use tracing::{debug_span, info, Span};
use ulid::Ulid;

use self::limiter::{AdmissionLimiter, RatePolicy};
use self::middleware::dynamic::{self, bind};
use self::oauth::ProviderRegistry;
use self::repository::{sqlite::SqliteUserRepository, UserRepository, ROLE_ADMIN};
use self::session::SessionStore;

pub static APP_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"),);

/// Shared state handed to every request. The stores synchronize internally;
/// cloning is cheap.
#[derive(Clone)]
pub struct AppState {
    pub sessions: SessionStore,
    pub limiter: AdmissionLimiter,
    pub users: Arc<dyn UserRepository>,
    pub providers: Arc<ProviderRegistry>,
    pub idle_limit: chrono::Duration,
}

/// Service configuration beyond the listen port and DSN.
pub struct Config {
    pub idle_limit: chrono::Duration,
    pub policy: RatePolicy,
    pub providers: ProviderRegistry,
}

/// The route table. Every forum route goes through [`bind`], which answers
/// 404/405 before the authentication chain; `/health` stays outside it.
pub fn routes() -> Router {
    Router::new()
        .merge(bind("/", &[Method::GET], get(handlers::home)))
        .merge(bind(
            "/user/signup",
            &[Method::POST],
            post(handlers::users::signup).layer(from_fn(dynamic::forbid_authenticated)),
        ))
        .merge(bind(
            "/user/login",
            &[Method::POST],
            post(handlers::users::login).layer(from_fn(dynamic::forbid_authenticated)),
        ))
        .merge(bind(
            "/user/logout",
            &[Method::POST],
            post(handlers::users::logout).layer(from_fn(dynamic::require_authenticated)),
        ))
        .merge(bind(
            "/user/login/oauth/:provider",
            &[Method::GET],
            get(handlers::oauth_login::entry).layer(from_fn(dynamic::forbid_authenticated)),
        ))
        .merge(bind(
            "/user/login/oauth/:provider/callback",
            &[Method::GET],
            get(handlers::oauth_login::callback).layer(from_fn(dynamic::forbid_authenticated)),
        ))
        .merge(bind(
            "/admin",
            &[Method::GET],
            get(handlers::admin::panel).layer(from_fn(
                |request: axum::extract::Request, next: Next| {
                    dynamic::require_role(ROLE_ADMIN, request, next)
                },
            )),
        ))
        .route("/health", get(handlers::health))
        .fallback(handlers::not_found)
}

/// Start the server.
///
/// # Errors
/// Returns an error if the database or the listener cannot be set up.
pub async fn new(port: u16, dsn: String, config: Config) -> Result<()> {
    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect(&dsn)
        .await
        .context("Failed to connect to database")?;

    let users = SqliteUserRepository::new(pool);
    users
        .migrate()
        .await
        .context("Failed to run database migrations")?;

    let state = AppState {
        sessions: SessionStore::new(),
        limiter: AdmissionLimiter::new(config.policy),
        users: Arc::new(users),
        providers: Arc::new(config.providers),
        idle_limit: config.idle_limit,
    };

    // One refill task tops up every bucket; stopped when the server exits.
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let refill = tokio::spawn(state.limiter.clone().run(shutdown_rx));

    let app = routes().layer(
        ServiceBuilder::new()
            .layer(SetRequestHeaderLayer::if_not_present(
                HeaderName::from_static("x-request-id"),
                |_req: &_| HeaderValue::from_str(Ulid::new().to_string().as_str()).ok(),
            ))
            .layer(PropagateRequestIdLayer::new(HeaderName::from_static(
                "x-request-id",
            )))
            .layer(TraceLayer::new_for_http().make_span_with(make_span))
            .layer(Extension(state)),
    );

    let listener = TcpListener::bind(format!("::0:{port}")).await?;

    info!("Listening on [::]:{}", port);

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            info!("Gracefully shutdown");
        })
        .await?;

    let _ = shutdown_tx.send(true);
    refill.await.context("Refill task panicked")?;

    Ok(())
}

// span
fn make_span(request: &Request<Body>) -> Span {
    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|val| val.to_str().ok())
        .unwrap_or("none");

    debug_span!(
        "http-request",
        method = %request.method(),
        path = request.uri().path(),
        request_id
    )
}
