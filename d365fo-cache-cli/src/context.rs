// d365fo-cache-cli/src/context.rs
//
// Resolves a profile name or literal base URL into an opened `Core`
//, the same two-step "load config, then
// instantiate the adapter" sequence the teacher's `run.rs` follows for
// its DB connector.

use anyhow::Context;
use d365fo_cache_core::application::Core;
use d365fo_cache_core::infrastructure::config::ProfileRegistry;
use d365fo_cache_core::ports::fs_root::FsRoot;
use std::path::PathBuf;

pub fn config_dir() -> PathBuf {
    dirs::config_dir().unwrap_or_else(std::env::temp_dir).join("d365fo-cache")
}

pub fn state_dir() -> PathBuf {
    dirs::state_dir().or_else(dirs::data_local_dir).unwrap_or_else(std::env::temp_dir).join("d365fo-cache")
}

pub fn open(environment: &str) -> anyhow::Result<Core> {
    let config_dir = config_dir();
    let state_dir = state_dir();

    let registry = ProfileRegistry::load(&config_dir, state_dir.clone()).with_context(|| format!("failed to load profiles from {}", config_dir.display()))?;
    let config = registry.resolve(environment).with_context(|| format!("could not resolve environment '{environment}'"))?;

    let cache_dir = config.resolved_cache_dir(&state_dir);
    let fs_root = FsRoot::ensure(&cache_dir).with_context(|| format!("failed to prepare cache directory {}", cache_dir.display()))?;

    Core::open(&fs_root, &config).map_err(|e| anyhow::anyhow!(e.to_string()))
}
