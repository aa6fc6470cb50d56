// d365fo-cache-core/src/infrastructure/http/odata_client.rs
//
// Default `ODataClient` adapter: reqwest over the environment's D365 F&O
// base URL, bearer-authenticated via whatever `TokenProvider` the profile
// picked. Every call goes through `with_retry`:
// base 500ms, factor 2, capped at 30s, 5 attempts, 401/403 never retried.

use crate::ports::odata::{HttpError, ODataClient};
use crate::ports::token::TokenProvider;
use async_trait::async_trait;
use backoff::backoff::Backoff;
use backoff::ExponentialBackoffBuilder;
use reqwest::Client;
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{instrument, warn};

const MAX_ATTEMPTS: usize = 5;

pub struct ReqwestODataClient {
    client: Client,
    base_url: String,
    token_provider: Arc<dyn TokenProvider>,
    scope: String,
}

impl ReqwestODataClient {
    pub fn new(base_url: impl Into<String>, token_provider: Arc<dyn TokenProvider>, scope: impl Into<String>) -> Self {
        ReqwestODataClient {
            client: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token_provider,
            scope: scope.into(),
        }
    }

    async fn bearer(&self) -> Result<String, HttpError> {
        let (token, _expires_at) = self.token_provider.get_token(&self.scope).await.map_err(|e| HttpError::status(401, e.0))?;
        Ok(token)
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }
}

#[async_trait]
impl ODataClient for ReqwestODataClient {
    #[instrument(skip(self, query), fields(path))]
    async fn get(&self, path: &str, query: &HashMap<String, String>) -> Result<Value, HttpError> {
        with_retry(|| async {
            let token = self.bearer().await?;
            let response = self.client.get(self.url(path)).bearer_auth(&token).query(query).send().await.map_err(|e| HttpError::transient(e.to_string()))?;
            handle_response(response).await
        }).await
    }

    #[instrument(skip(self, body), fields(path))]
    async fn post(&self, path: &str, body: &Value) -> Result<Value, HttpError> {
        with_retry(|| async {
            let token = self.bearer().await?;
            let response = self.client.post(self.url(path)).bearer_auth(&token).json(body).send().await.map_err(|e| HttpError::transient(e.to_string()))?;
            handle_response(response).await
        }).await
    }

    #[instrument(skip(self, params), fields(entity_set, action_name))]
    async fn call_action(&self, entity_set: &str, action_name: &str, params: &Value) -> Result<Value, HttpError> {
        let path = format!("data/{entity_set}/Microsoft.Dynamics.DataEntities.{action_name}");
        self.post(&path, params).await
    }
}

async fn handle_response(response: reqwest::Response) -> Result<Value, HttpError> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(HttpError::status(status.as_u16(), body));
    }
    response.json::<Value>().await.map_err(|e| HttpError::transient(format!("invalid JSON response: {e}")))
}

async fn with_retry<T, F, Fut>(mut op: F) -> Result<T, HttpError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, HttpError>>,
{
    let mut backoff = ExponentialBackoffBuilder::new().with_initial_interval(Duration::from_millis(500)).with_multiplier(2.0).with_max_interval(Duration::from_secs(30)).with_max_elapsed_time(None).build();

    let mut attempt = 0usize;
    loop {
        attempt += 1;
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if !err.retryable || attempt >= MAX_ATTEMPTS => return Err(err),
            Err(err) => {
                let wait = backoff.next_backoff().unwrap_or(Duration::from_secs(30));
                warn!(attempt, error = %err, wait_ms = wait.as_millis() as u64, "retrying OData call");
                tokio::time::sleep(wait).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn retries_transient_errors_up_to_max_attempts() {
        let calls = Arc::new(AtomicUsize::new(0));
        let calls2 = calls.clone();
        let result: Result<(), HttpError> = with_retry(|| {
            let calls = calls2.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(HttpError::transient("boom"))
            }
        }).await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), MAX_ATTEMPTS);
    }

    #[tokio::test]
    async fn never_retries_401() {
        let calls = Arc::new(AtomicUsize::new(0));
        let calls2 = calls.clone();
        let result: Result<(), HttpError> = with_retry(|| {
            let calls = calls2.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(HttpError::status(401, "unauthorized"))
            }
        }).await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
