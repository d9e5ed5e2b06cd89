use crate::agora::{
    self,
    limiter::RatePolicy,
    oauth::{github::GithubProvider, google::GoogleProvider, ProviderRegistry},
    Config,
};
use crate::cli::actions::Action;
use anyhow::Result;
use secrecy::SecretString;
use std::sync::Arc;
use tracing::info;

#[derive(Debug)]
pub struct Args {
    pub port: u16,
    pub dsn: String,
    pub external_url: String,
    pub session_idle_hours: i64,
    pub admit_burst: u32,
    pub admit_refill_ms: u64,
    pub admit_block_hours: i64,
    pub github_client_id: Option<String>,
    pub github_client_secret: Option<SecretString>,
    pub google_client_id: Option<String>,
    pub google_client_secret: Option<SecretString>,
}

/// Handle the server action
///
/// # Errors
/// Returns an error if a provider cannot be configured or the server fails.
pub async fn handle(action: Action) -> Result<()> {
    let Action::Server(args) = action;

    let policy = RatePolicy::new()
        .with_burst(args.admit_burst)
        .with_refill(std::time::Duration::from_millis(args.admit_refill_ms))
        .with_block(chrono::Duration::hours(args.admit_block_hours));

    let mut providers = ProviderRegistry::new();
    if let (Some(id), Some(secret)) = (args.github_client_id, args.github_client_secret) {
        providers.register(Arc::new(GithubProvider::new(
            id,
            secret,
            &args.external_url,
        )?));
        info!("GitHub login enabled");
    }
    if let (Some(id), Some(secret)) = (args.google_client_id, args.google_client_secret) {
        providers.register(Arc::new(GoogleProvider::new(
            id,
            secret,
            &args.external_url,
        )?));
        info!("Google login enabled");
    }

    let config = Config {
        idle_limit: chrono::Duration::hours(args.session_idle_hours),
        policy,
        providers,
    };

    agora::new(args.port, args.dsn, config).await
}
