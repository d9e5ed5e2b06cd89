//! GitHub login: authorization-code exchange against the v3 API.

use async_trait::async_trait;
use reqwest::{header::ACCEPT, Client};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::json;
use tracing::debug;
use url::Url;

use super::{IdentityProvider, Profile, ProviderError};
use crate::agora::APP_USER_AGENT;

const AUTHORIZE_URL: &str = "https://github.com/login/oauth/authorize";
const TOKEN_URL: &str = "https://github.com/login/oauth/access_token";
const USER_URL: &str = "https://api.github.com/user";

pub const TAG: &str = "github";

#[derive(Debug, Deserialize)]
struct AccessTokenResponse {
    access_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GithubUser {
    id: Option<i64>,
    login: Option<String>,
    email: Option<String>,
}

pub struct GithubProvider {
    client: Client,
    client_id: String,
    client_secret: SecretString,
    authorize_base: Url,
    redirect_url: String,
}

impl GithubProvider {
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

fn profile_from_user(user: GithubUser) -> Result<Profile, ProviderError> {
    let id = user.id.ok_or(ProviderError::MissingField("id"))?;
    Ok(Profile {
        account_id: id.to_string(),
        username: user.login.unwrap_or_default(),
        email: user.email.unwrap_or_default(),
        provider: TAG.to_string(),
    })
}

#[async_trait]
impl IdentityProvider for GithubProvider {
    fn tag(&self) -> &'static str {
        TAG
    }

    fn authorize_url(&self, state: &str) -> String {
        let mut url = self.authorize_base.clone();
        url.query_pairs_mut()
            .append_pair("client_id", &self.client_id)
            .append_pair("redirect_uri", &self.redirect_url)
            .append_pair("state", state);
        url.to_string()
    }

    async fn exchange_code(&self, code: &str) -> Result<Profile, ProviderError> {
        let token: AccessTokenResponse = self
            .client
            .post(TOKEN_URL)
            .header(ACCEPT, "application/json")
            .json(&json!({
                "client_id": self.client_id,
                "client_secret": self.client_secret.expose_secret(),
                "code": code,
            }))
            .send()
            .await?
            .json()
            .await?;

        let access_token = token
            .access_token
            .ok_or(ProviderError::MissingField("access_token"))?;

        debug!("github token exchange completed");

        let user: GithubUser = self
            .client
            .get(USER_URL)
            .header("Authorization", format!("token {access_token}"))
            .send()
            .await?
            .json()
            .await?;

        profile_from_user(user)
    }
}
