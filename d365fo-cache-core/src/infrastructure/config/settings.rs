// d365fo-cache-core/src/infrastructure/config/settings.rs
//
// Typed configuration record with exactly the options of spec §6.4. Loaded
// from a profile's YAML the way the teacher's `load_project_config` loads
// `verity.yaml`, then patched by environment-variable overrides the way
// `apply_env_overrides` patches a loaded `ProjectConfig`.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthMode {
    Default,
    ClientCredentials,
}

impl Default for AuthMode {
    fn default() -> Self {
        AuthMode::Default
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    pub base_url: String,

    #[serde(default)]
    pub auth_mode: AuthMode,
    #[serde(default)]
    pub client_id: Option<String>,
    #[serde(default)]
    pub client_secret: Option<String>,
    #[serde(default)]
    pub tenant_id: Option<String>,

    #[serde(default = "default_true")]
    pub verify_ssl: bool,
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,

    #[serde(default)]
    pub cache_dir: Option<PathBuf>,

    #[serde(default = "default_true")]
    pub use_label_cache: bool,
    #[serde(default = "default_label_cache_expiry_minutes")]
    pub label_cache_expiry_minutes: u64,

    #[serde(default = "default_true")]
    pub use_cache_first: bool,

    #[serde(default = "default_language")]
    pub language: String,

    #[serde(default = "default_metadata_sync_interval_minutes")]
    pub metadata_sync_interval_minutes: u64,

    #[serde(default = "default_max_memory_cache_size")]
    pub max_memory_cache_size: u64,
}

fn default_true() -> bool {
    true
}
fn default_timeout_seconds() -> u64 {
    60
}
fn default_label_cache_expiry_minutes() -> u64 {
    60
}
fn default_language() -> String {
    "en-US".to_string()
}
fn default_metadata_sync_interval_minutes() -> u64 {
    60
}
fn default_max_memory_cache_size() -> u64 {
    1000
}

impl CacheConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        CacheConfig {
            base_url: base_url.into(),
            auth_mode: AuthMode::Default,
            client_id: None,
            client_secret: None,
            tenant_id: None,
            verify_ssl: default_true(),
            timeout_seconds: default_timeout_seconds(),
            cache_dir: None,
            use_label_cache: default_true(),
            label_cache_expiry_minutes: default_label_cache_expiry_minutes(),
            use_cache_first: default_true(),
            language: default_language(),
            metadata_sync_interval_minutes: default_metadata_sync_interval_minutes(),
            max_memory_cache_size: default_max_memory_cache_size(),
        }
    }

    /// Derives `<state>/<hostname>` when `cache_dir` was not set explicitly,
    /// rooted at `state_dir` (the platform state directory, e.g.
    /// `~/.local/state/d365fo-cache`).
    pub fn resolved_cache_dir(&self, state_dir: &std::path::Path) -> PathBuf {
        if let Some(explicit) = &self.cache_dir {
            return explicit.clone();
        }
        let hostname = crate::domain::environment::Environment::canonicalize_base_url(&self.base_url).replace("https://", "").replace("http://", "").replace(['/', ':'], "_");
        state_dir.join(hostname)
    }

    /// Environment-variable overrides applied after the YAML load
    /// (`D365FO_CACHE_DIR`, `D365FO_BASE_URL`, `D365FO_CLIENT_ID`,
    /// `D365FO_CLIENT_SECRET`, `D365FO_TENANT_ID`, `D365FO_LANGUAGE`,
    /// `D365FO_VERIFY_SSL`), mirroring the teacher's `apply_env_overrides`.
    pub fn apply_env_overrides(mut self) -> Self {
        if let Ok(v) = std::env::var("D365FO_BASE_URL") {
            self.base_url = v;
        }
        if let Ok(v) = std::env::var("D365FO_CACHE_DIR") {
            self.cache_dir = Some(PathBuf::from(v));
        }
        if let Ok(v) = std::env::var("D365FO_CLIENT_ID") {
            self.client_id = Some(v);
            self.auth_mode = AuthMode::ClientCredentials;
        }
        if let Ok(v) = std::env::var("D365FO_CLIENT_SECRET") {
            self.client_secret = Some(v);
        }
        if let Ok(v) = std::env::var("D365FO_TENANT_ID") {
            self.tenant_id = Some(v);
        }
        if let Ok(v) = std::env::var("D365FO_LANGUAGE") {
            self.language = v;
        }
        if let Ok(v) = std::env::var("D365FO_VERIFY_SSL") {
            self.verify_ssl = v.parse().unwrap_or(self.verify_ssl);
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec_table() {
        let cfg = CacheConfig::new("https://foo.cloudax.dynamics.com");
        assert_eq!(cfg.auth_mode, AuthMode::Default);
        assert!(cfg.verify_ssl);
        assert_eq!(cfg.timeout_seconds, 60);
        assert!(cfg.use_label_cache);
        assert_eq!(cfg.label_cache_expiry_minutes, 60);
        assert!(cfg.use_cache_first);
        assert_eq!(cfg.language, "en-US");
        assert_eq!(cfg.metadata_sync_interval_minutes, 60);
        assert_eq!(cfg.max_memory_cache_size, 1000);
    }

    #[test]
    fn resolved_cache_dir_derives_from_hostname_when_unset() {
        let cfg = CacheConfig::new("https://Foo.cloudax.dynamics.com/");
        let dir = cfg.resolved_cache_dir(std::path::Path::new("/state"));
        assert_eq!(dir, PathBuf::from("/state/foo.cloudax.dynamics.com"));
    }

    #[test]
    fn explicit_cache_dir_wins_over_derivation() {
        let mut cfg = CacheConfig::new("https://foo.example.com");
        cfg.cache_dir = Some(PathBuf::from("/explicit"));
        assert_eq!(cfg.resolved_cache_dir(std::path::Path::new("/state")), PathBuf::from("/explicit"));
    }
}
