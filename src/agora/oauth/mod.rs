//! Third-party login providers: an opaque code-for-profile exchange. The
//! core only consumes the resulting profile; no wire protocol leaks out.

pub mod github;
pub mod google;

use async_trait::async_trait;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use rand::{rngs::OsRng, RngCore};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

/// Identity resolved by a provider after the code exchange. Serialized into
/// the session's extension bag when a signup has to finish locally.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    pub account_id: String,
    pub username: String,
    pub email: String,
    pub provider: String,
}

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error(transparent)]
    Http(#[from] reqwest::Error),
    #[error("invalid provider configuration: {0}")]
    Config(String),
    #[error("provider response missing {0}")]
    MissingField(&'static str),
}

#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Stable tag used in routes and the account-link table.
    fn tag(&self) -> &'static str;

    /// Authorization endpoint the browser is redirected to.
    fn authorize_url(&self, state: &str) -> String;

    /// Exchange the callback code for the account profile.
    async fn exchange_code(&self, code: &str) -> Result<Profile, ProviderError>;
}

/// Providers registered at startup, looked up by tag from the login routes.
#[derive(Default)]
pub struct ProviderRegistry {
    providers: HashMap<&'static str, Arc<dyn IdentityProvider>>,
}

impl ProviderRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, provider: Arc<dyn IdentityProvider>) {
        self.providers.insert(provider.tag(), provider);
    }

    #[must_use]
    pub fn get(&self, tag: &str) -> Option<Arc<dyn IdentityProvider>> {
        self.providers.get(tag).cloned()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}

/// Random `state` parameter tying the callback to the session that started
/// the login.
pub(crate) fn generate_state() -> Result<String, ProviderError> {
    let mut bytes = [0u8; 32];
    OsRng
        .try_fill_bytes(&mut bytes)
        .map_err(|err| ProviderError::Config(err.to_string()))?;
    Ok(URL_SAFE_NO_PAD.encode(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FakeProvider;

    #[async_trait]
    impl IdentityProvider for FakeProvider {
        fn tag(&self) -> &'static str {
            "fake"
        }

        fn authorize_url(&self, state: &str) -> String {
            format!("https://fake.test/authorize?state={state}")
        }

        async fn exchange_code(&self, _code: &str) -> Result<Profile, ProviderError> {
            Ok(Profile {
                account_id: "1".to_string(),
                username: "fake".to_string(),
                email: "fake@example.com".to_string(),
                provider: "fake".to_string(),
            })
        }
    }

    #[test]
    fn registry_resolves_by_tag() {
        let mut registry = ProviderRegistry::new();
        assert!(registry.is_empty());

        registry.register(Arc::new(FakeProvider));
        assert!(registry.get("fake").is_some());
        assert!(registry.get("unknown").is_none());
    }

    #[test]
    fn state_tokens_are_unique() {
        let first = generate_state().expect("state");
        let second = generate_state().expect("state");
        assert_ne!(first, second);
        assert!(first.len() >= 40);
    }
}
