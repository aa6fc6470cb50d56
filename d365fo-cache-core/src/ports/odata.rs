// d365fo-cache-core/src/ports/odata.rs
//
// Analogy: this is the electrical outlet in the wall. It defines the shape
// of an OData/REST call without knowing whether it's reqwest, a mock, or a
// record/replay fixture behind it.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use thiserror::Error;

#[derive(Error, Debug, Clone)]
#[error("transport error{}: {message}", status.map(|s| format!(" (HTTP {s})")).unwrap_or_default())]
pub struct HttpError {
    pub message: String,
    pub status: Option<u16>,
    pub retryable: bool,
}

impl HttpError {
    pub fn transient(message: impl Into<String>) -> Self {
        HttpError {
            message: message.into(),
            status: None,
            retryable: true,
        }
    }

    pub fn status(status: u16, message: impl Into<String>) -> Self {
        // 401/403 are authentication refusals, never retried.
        let retryable = !matches!(status, 401 | 403);
        HttpError {
            message: message.into(),
            status: Some(status),
            retryable,
        }
    }
}

/// Opaque transport toward the remote OData/REST surface. Returns raw JSON
/// bytes on success; request construction and URL-quoting happen above this
/// boundary.
#[async_trait]
pub trait ODataClient: Send + Sync {
    async fn get(&self, path: &str, query: &HashMap<String, String>) -> Result<Value, HttpError>;

    async fn post(&self, path: &str, body: &Value) -> Result<Value, HttpError>;

    async fn call_action(
        &self,
        entity_set: &str,
        action_name: &str,
        params: &Value,
    ) -> Result<Value, HttpError>;
}
