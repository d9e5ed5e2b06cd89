use crate::cli::actions::{server::Args, Action};
use anyhow::{Context, Result};
use secrecy::SecretString;

/// # Errors
/// Returns an error if required arguments are missing.
pub fn handler(matches: &clap::ArgMatches) -> Result<Action> {
    let port = matches.get_one::<u16>("port").copied().unwrap_or(8080);
    let dsn = matches
        .get_one::<String>("dsn")
        .cloned()
        .context("missing required argument: --dsn")?;
    let external_url = matches
        .get_one::<String>("external-url")
        .cloned()
        .unwrap_or_else(|| "http://localhost:8080".to_string());

    let session_idle_hours = matches
        .get_one::<i64>("session-idle-hours")
        .copied()
        .unwrap_or(24);
    let admit_burst = matches.get_one::<u32>("admit-burst").copied().unwrap_or(10);
    let admit_refill_ms = matches
        .get_one::<u64>("admit-refill-ms")
        .copied()
        .unwrap_or(200);
    let admit_block_hours = matches
        .get_one::<i64>("admit-block-hours")
        .copied()
        .unwrap_or(3);

    let secret = |name: &str| {
        matches
            .get_one::<String>(name)
            .map(|value| SecretString::from(value.clone()))
    };

    Ok(Action::Server(Box::new(Args {
        port,
        dsn,
        external_url,
        session_idle_hours,
        admit_burst,
        admit_refill_ms,
        admit_block_hours,
        github_client_id: matches.get_one::<String>("github-client-id").cloned(),
        github_client_secret: secret("github-client-secret"),
        google_client_id: matches.get_one::<String>("google-client-id").cloned(),
        google_client_secret: secret("google-client-secret"),
    })))
}
