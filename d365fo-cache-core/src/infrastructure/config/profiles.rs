// d365fo-cache-core/src/infrastructure/config/profiles.rs
//
// `profiles.yml` is a YAML map of named environments, resolved the same way
// the teacher's `load_connections`/`ConnectionProfile` resolves named DB
// targets. Each entry is a `CacheConfig`; the profile
// registry hands back an `EnvironmentRef` for whichever collaborator needs one.

use crate::infrastructure::config::settings::{AuthMode, CacheConfig};
use crate::infrastructure::error::InfrastructureError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

/// Resolved pointer to one environment: the subset of `CacheConfig` that
/// identifies *where* to connect and *where* to cache, without the full
/// credential material.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvironmentRef {
    pub name: String,
    pub base_url: String,
    pub auth_mode: AuthMode,
    pub cache_dir: PathBuf,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProfileFile {
    #[serde(flatten)]
    pub profiles: HashMap<String, CacheConfig>,
}

pub struct ProfileRegistry {
    profiles: HashMap<String, CacheConfig>,
    state_dir: PathBuf,
}

impl ProfileRegistry {
    pub fn new(profiles: HashMap<String, CacheConfig>, state_dir: PathBuf) -> Self {
        ProfileRegistry { profiles, state_dir }
    }

    /// Loads `<config_dir>/profiles.yml` (or `.yaml`), mirroring the
    /// teacher's `load_connections` path-probing for `connections.yml`.
    pub fn load(config_dir: &Path, state_dir: PathBuf) -> Result<Self, InfrastructureError> {
        let candidates = [config_dir.join("profiles.yml"), config_dir.join("profiles.yaml")];
        let path = candidates.iter().find(|p| p.exists());

        let profiles = match path {
            Some(path) => {
                let content = fs::read_to_string(path)?;
                let file: ProfileFile = serde_yaml::from_str(&content)?;
                file.profiles
            }
            None => HashMap::new(),
        };

        Ok(ProfileRegistry::new(profiles, state_dir))
    }

    pub fn save(&self, config_dir: &Path) -> Result<(), InfrastructureError> {
        fs::create_dir_all(config_dir)?;
        let file = ProfileFile {
            profiles: self.profiles.clone(),
        };
        let yaml = serde_yaml::to_string(&file)?;
        crate::infrastructure::fs::atomic_write(config_dir.join("profiles.yml"), yaml)?;
        Ok(())
    }

    pub fn upsert(&mut self, name: impl Into<String>, config: CacheConfig) {
        self.profiles.insert(name.into(), config);
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.profiles.keys().cloned().collect();
        names.sort();
        names
    }

    /// Resolves a named profile, or (if no profile by that name exists)
    /// treats `name_or_url` as a literal base URL with default settings —
    /// so ad-hoc one-off connections don't require a saved profile first.
    pub fn resolve(&self, name_or_url: &str) -> Result<CacheConfig, InfrastructureError> {
        if let Some(cfg) = self.profiles.get(name_or_url) {
            return Ok(cfg.clone().apply_env_overrides());
        }
        if name_or_url.starts_with("http://") || name_or_url.starts_with("https://") {
            return Ok(CacheConfig::new(name_or_url).apply_env_overrides());
        }
        Err(InfrastructureError::ProfileNotFound(name_or_url.to_string()))
    }

    pub fn resolve_ref(&self, name_or_url: &str) -> Result<EnvironmentRef, InfrastructureError> {
        let config = self.resolve(name_or_url)?;
        let cache_dir = config.resolved_cache_dir(&self.state_dir);
        Ok(EnvironmentRef {
            name: name_or_url.to_string(),
            base_url: config.base_url,
            auth_mode: config.auth_mode,
            cache_dir,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn resolves_literal_url_without_a_saved_profile() {
        let registry = ProfileRegistry::new(HashMap::new(), PathBuf::from("/state"));
        let env_ref = registry.resolve_ref("https://foo.cloudax.dynamics.com").unwrap();
        assert_eq!(env_ref.base_url, "https://foo.cloudax.dynamics.com");
    }

    #[test]
    fn unknown_profile_name_is_rejected() {
        let registry = ProfileRegistry::new(HashMap::new(), PathBuf::from("/state"));
        assert!(registry.resolve("nope").is_err());
    }

    #[test]
    fn save_then_load_round_trips_profiles() {
        let dir = tempdir().unwrap();
        let mut registry = ProfileRegistry::new(HashMap::new(), PathBuf::from("/state"));
        registry.upsert("prod", CacheConfig::new("https://prod.example.com"));
        registry.save(dir.path()).unwrap();

        let reloaded = ProfileRegistry::load(dir.path(), PathBuf::from("/state")).unwrap();
        assert_eq!(reloaded.names(), vec!["prod".to_string()]);
    }
}
