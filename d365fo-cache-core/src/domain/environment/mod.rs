// d365fo-cache-core/src/domain/environment/mod.rs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Environment {
    pub id: i64,
    pub base_url: String,
    pub display_name: String,
    pub created_at: DateTime<Utc>,
    pub last_sync_at: Option<DateTime<Utc>>,
}

impl Environment {
    /// Canonicalizes a base URL the way every lookup must, so two spellings
    /// of the same environment (`HTTPS://Foo.cloudax.dynamics.com/`, `https://foo.cloudax.dynamics.com`)
    /// resolve to one row.
    pub fn canonicalize_base_url(raw: &str) -> String {
        raw.trim().to_lowercase().trim_end_matches('/').to_string()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    Pending,
    Syncing,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvironmentVersion {
    pub environment_id: i64,
    pub global_version_id: i64,
    pub detected_at: DateTime<Utc>,
    pub is_active: bool,
    pub sync_status: SyncStatus,
    pub last_sync_duration_ms: Option<i64>,
}

/// `GetEnvironmentInfo` response shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityCounts {
    pub entities: u64,
    pub actions: u64,
    pub enums: u64,
    pub labels: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvironmentInfo {
    pub base_url: String,
    pub active_global_version_id: Option<i64>,
    pub app_version: Option<String>,
    pub platform_version: Option<String>,
    pub counts: EntityCounts,
    pub last_sync_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonicalize_strips_scheme_case_and_trailing_slash() {
        assert_eq!(
            Environment::canonicalize_base_url("HTTPS://Foo.Example.com/"),
            "https://foo.example.com"
        );
    }

    #[test]
    fn canonicalize_is_idempotent() {
        let once = Environment::canonicalize_base_url("https://foo.example.com/");
        let twice = Environment::canonicalize_base_url(&once);
        assert_eq!(once, twice);
    }
}
