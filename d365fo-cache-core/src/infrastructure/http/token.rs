// d365fo-cache-core/src/infrastructure/http/token.rs
//
// Two default `TokenProvider` adapters.

use crate::ports::token::{AuthError, TokenProvider};
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use reqwest::Client;
use serde::Deserialize;
use tokio::sync::Mutex;

/// Wraps an already-obtained token (e.g. injected by a host process that
/// manages auth itself). Never refreshes; callers own renewal.
pub struct StaticTokenProvider {
    token: String,
    expires_at: DateTime<Utc>,
}

impl StaticTokenProvider {
    pub fn new(token: impl Into<String>, expires_at: DateTime<Utc>) -> Self {
        StaticTokenProvider {
            token: token.into(),
            expires_at,
        }
    }
}

#[async_trait]
impl TokenProvider for StaticTokenProvider {
    async fn get_token(&self, _scope: &str) -> Result<(String, DateTime<Utc>), AuthError> {
        Ok((self.token.clone(), self.expires_at))
    }
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: i64,
}

struct CachedToken {
    token: String,
    expires_at: DateTime<Utc>,
}

/// OAuth2 client-credentials flow against an Azure AD tenant token endpoint.
/// Caches the token and only re-requests once within 60s of expiry.
pub struct ClientCredentialsTokenProvider {
    client: Client,
    tenant_id: String,
    client_id: String,
    client_secret: String,
    cached: Mutex<Option<CachedToken>>,
}

impl ClientCredentialsTokenProvider {
    pub fn new(tenant_id: impl Into<String>, client_id: impl Into<String>, client_secret: impl Into<String>) -> Self {
        ClientCredentialsTokenProvider {
            client: Client::new(),
            tenant_id: tenant_id.into(),
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            cached: Mutex::new(None),
        }
    }

    fn token_endpoint(&self) -> String {
        format!("https://login.microsoftonline.com/{}/oauth2/v2.0/token", self.tenant_id)
    }
}

#[async_trait]
impl TokenProvider for ClientCredentialsTokenProvider {
    async fn get_token(&self, scope: &str) -> Result<(String, DateTime<Utc>), AuthError> {
        let mut cached = self.cached.lock().await;
        if let Some(existing) = cached.as_ref() {
            if existing.expires_at - Utc::now() > ChronoDuration::seconds(60) {
                return Ok((existing.token.clone(), existing.expires_at));
            }
        }

        let response = self.client.post(self.token_endpoint()).form(&[
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
                ("scope", scope),
                ("grant_type", "client_credentials"),
            ]).send().await.map_err(|e| AuthError(format!("token request failed: {e}")))?;

        if !response.status().is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AuthError(format!("token endpoint rejected request: {body}")));
        }

        let parsed: TokenResponse = response.json().await.map_err(|e| AuthError(format!("malformed token response: {e}")))?;
        let expires_at = Utc::now() + ChronoDuration::seconds(parsed.expires_in);

        *cached = Some(CachedToken {
            token: parsed.access_token.clone(),
            expires_at,
        });

        Ok((parsed.access_token, expires_at))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn static_provider_returns_its_fixed_token() {
        let expires_at = Utc::now() + ChronoDuration::hours(1);
        let provider = StaticTokenProvider::new("abc123", expires_at);
        let (token, exp) = provider.get_token("scope").await.unwrap();
        assert_eq!(token, "abc123");
        assert_eq!(exp, expires_at);
    }
}
