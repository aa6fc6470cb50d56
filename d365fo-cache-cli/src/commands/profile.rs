// d365fo-cache-cli/src/commands/profile.rs
//
// USE CASE: manage named environment profiles, grounded the way the teacher's `ConnectionProfile` registry is
// managed from the CLI — save/load a YAML map under the config directory.

use crate::context;
use d365fo_cache_core::infrastructure::config::{AuthMode, CacheConfig, ProfileRegistry};

pub fn list() -> anyhow::Result<()> {
    let registry = ProfileRegistry::load(&context::config_dir(), context::state_dir())?;
    for name in registry.names() {
        println!("{name}");
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
pub fn add(
    name: &str,
    base_url: &str,
    client_id: Option<String>,
    client_secret: Option<String>,
    tenant_id: Option<String>,
    language: Option<String>,
) -> anyhow::Result<()> {
    let config_dir = context::config_dir();
    let mut registry = ProfileRegistry::load(&config_dir, context::state_dir())?;

    let mut config = CacheConfig::new(base_url);
    if let (Some(client_id), Some(client_secret), Some(tenant_id)) = (&client_id, &client_secret, &tenant_id) {
        config.auth_mode = AuthMode::ClientCredentials;
        config.client_id = Some(client_id.clone());
        config.client_secret = Some(client_secret.clone());
        config.tenant_id = Some(tenant_id.clone());
    }
    if let Some(language) = language {
        config.language = language;
    }

    registry.upsert(name, config);
    registry.save(&config_dir)?;
    println!("saved profile '{name}'");
    Ok(())
}

pub fn show(name: &str) -> anyhow::Result<()> {
    let registry = ProfileRegistry::load(&context::config_dir(), context::state_dir())?;
    let env_ref = registry.resolve_ref(name)?;
    println!("{}", serde_json::to_string_pretty(&env_ref)?);
    Ok(())
}
