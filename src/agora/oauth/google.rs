//! Google login: authorization-code exchange against the OAuth2 endpoints.

use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tracing::debug;
use url::Url;

use super::{IdentityProvider, Profile, ProviderError};
use crate::agora::APP_USER_AGENT;

const AUTHORIZE_URL: &str = "https://accounts.google.com/o/oauth2/v2/auth";
const TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
const USERINFO_URL: &str = "https://www.googleapis.com/oauth2/v2/userinfo";
const SCOPE: &str = "openid email profile";

pub const TAG: &str = "google";

#[derive(Debug, Deserialize)]
struct AccessTokenResponse {
    access_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GoogleUser {
    id: Option<String>,
    email: Option<String>,
}

pub struct GoogleProvider {
    client: Client,
    client_id: String,
    client_secret: SecretString,
    authorize_base: Url,
    redirect_url: String,
}

impl GoogleProvider {
    /// # Errors
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(
        client_id: String,
        client_secret: SecretString,
        external_url: &str,
    ) -> Result<Self, ProviderError> {
        let client = Client::builder().user_agent(APP_USER_AGENT).build()?;
        let authorize_base = Url::parse(AUTHORIZE_URL)
            .map_err(|err| ProviderError::Config(err.to_string()))?;
        let redirect_url = format!(
            "{}/user/login/oauth/{TAG}/callback",
            external_url.trim_end_matches('/')
        );

        Ok(Self {
            client,
            client_id,
            client_secret,
            authorize_base,
            redirect_url,
        })
    }
}

// Google accounts carry no username; derive one from the email local part.
fn profile_from_user(user: GoogleUser) -> Result<Profile, ProviderError> {
    let account_id = user.id.ok_or(ProviderError::MissingField("id"))?;
    let email = user.email.unwrap_or_default();
    let username = email
        .split('@')
        .next()
        .unwrap_or_default()
        .to_string();

    Ok(Profile {
        account_id,
        username,
        email,
        provider: TAG.to_string(),
    })
}

#[async_trait]
impl IdentityProvider for GoogleProvider {
    fn tag(&self) -> &'static str {
        TAG
    }

    fn authorize_url(&self, state: &str) -> String {
        let mut url = self.authorize_base.clone();
        url.query_pairs_mut()
            .append_pair("client_id", &self.client_id)
            .append_pair("redirect_uri", &self.redirect_url)
            .append_pair("response_type", "code")
            .append_pair("scope", SCOPE)
            .append_pair("prompt", "select_account")
            .append_pair("state", state);
        url.to_string()
    }

    async fn exchange_code(&self, code: &str) -> Result<Profile, ProviderError> {
        let token: AccessTokenResponse = self
            .client
            .post(TOKEN_URL)
            .form(&[
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.expose_secret()),
                ("code", code),
                ("grant_type", "authorization_code"),
                ("redirect_uri", &self.redirect_url),
            ])
            .send()
            .await?
            .json()
            .await?;

        let access_token = token
            .access_token
            .ok_or(ProviderError::MissingField("access_token"))?;

        debug!("google token exchange completed");

        let user: GoogleUser = self
            .client
            .get(USERINFO_URL)
            .bearer_auth(access_token)
            .send()
            .await?
            .json()
            .await?;

        profile_from_user(user)
    }
}
