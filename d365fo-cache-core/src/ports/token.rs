// d365fo-cache-core/src/ports/token.rs

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

#[derive(Error, Debug, Clone)]
#[error("authentication error: {0}")]
pub struct AuthError(pub String);

/// Pluggable credential source: one interface with a
/// sum-typed factory (`AuthMode`, in `infrastructure::config::settings`) for
/// the ways a concrete provider can be constructed, instead of the source's
/// multiple credential-source classes.
#[async_trait]
pub trait TokenProvider: Send + Sync {
    async fn get_token(&self, scope: &str) -> Result<(String, DateTime<Utc>), AuthError>;
}
