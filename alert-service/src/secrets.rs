//! Object-store credentials from Bitwarden Secrets Manager or the environment.
//!
//! With `BWS_ACCESS_TOKEN` set, each secret is fetched from Bitwarden by id
//! and the environment is only consulted when that fetch fails. Without it
//! the environment is the only source, which is what local runs and CI use.

use anyhow::{anyhow, Context, Result};
use serde::Deserialize;

use crate::sigv4::Credentials;

type Lookup = Box<dyn Fn(&str) -> Option<String> + Send + Sync>;

pub struct SecretsClient {
    access_token: Option<String>,
    api_url: String,
    http: reqwest::Client,
    env: Lookup,
}

#[derive(Deserialize)]
struct BwsSecret {
    value: String,
}

impl SecretsClient {
    pub fn from_env() -> Self {
        Self::with_lookup(|key| std::env::var(key).ok())
    }

    pub fn with_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String> + Send + Sync + 'static,
    {
        let access_token = lookup("BWS_ACCESS_TOKEN").filter(|t| !t.is_empty());
        let api_url = lookup("BWS_API_URL").unwrap_or_else(|| "https://api.bitwarden.com".to_string());
        Self {
            access_token,
            api_url,
            http: reqwest::Client::new(),
            env: Box::new(lookup),
        }
    }

    /// Resolve one secret: Bitwarden first (when configured), then the
    /// `env_fallback` variable.
    pub async fn get_secret(&self, secret_id: &str, env_fallback: &str) -> Result<String> {
        if let Some(token) = &self.access_token {
            match self.fetch_from_bitwarden(token, secret_id).await {
                Ok(value) => return Ok(value),
                Err(e) => tracing::warn!(
                    secret_id,
                    error = %e,
                    "bitwarden lookup failed, falling back to env var"
                ),
            }
        }

        (self.env)(env_fallback)
            .filter(|v| !v.is_empty())
            .ok_or_else(|| {
                anyhow!("secret '{secret_id}' not in Bitwarden and env var '{env_fallback}' is not set")
            })
    }

    async fn fetch_from_bitwarden(&self, token: &str, secret_id: &str) -> Result<String> {
        let url = format!("{}/secrets/{}", self.api_url, secret_id);
        let resp = self
            .http
            .get(&url)
            .bearer_auth(token)
            .send()
            .await
            .context("request to Bitwarden Secrets Manager failed")?;

        if !resp.status().is_success() {
            return Err(anyhow!("Bitwarden API returned status {}", resp.status()));
        }

        let body: BwsSecret = resp.json().await.context("unreadable Bitwarden response")?;
        Ok(body.value)
    }

    /// Bitwarden secret id for `name`, overridable via `BWS_<NAME>_ID`.
    fn secret_id(&self, name: &str, default: &str) -> String {
        (self.env)(&format!("BWS_{name}_ID")).unwrap_or_else(|| default.to_string())
    }

    /// Access key and secret are required; the session token is optional.
    pub async fn s3_credentials(&self) -> Result<Credentials> {
        let access_key_id = self
            .get_secret(
                &self.secret_id("AWS_ACCESS_KEY_ID", "aws-access-key-id"),
                "AWS_ACCESS_KEY_ID",
            )
            .await?;
        let secret_access_key = self
            .get_secret(
                &self.secret_id("AWS_SECRET_ACCESS_KEY", "aws-secret-access-key"),
                "AWS_SECRET_ACCESS_KEY",
            )
            .await?;
        let session_token = self
            .get_secret(
                &self.secret_id("AWS_SESSION_TOKEN", "aws-session-token"),
                "AWS_SESSION_TOKEN",
            )
            .await
            .ok();

        Ok(Credentials {
            access_key_id,
            secret_access_key,
            session_token,
        })
    }
}
