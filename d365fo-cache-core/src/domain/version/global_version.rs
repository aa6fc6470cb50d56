// d365fo-cache-core/src/domain/version/global_version.rs
//
// The content-addressed bucket metadata is deduplicated under.
// `modules_hash` is the only thing that matters for equality; everything
// else here is diagnostic.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// One entry parsed out of `GetInstalledModules`, before it is persisted.
/// Field names mirror the wire shape: `"Name: X | Version: Y | Module: Z |
/// Publisher: P | DisplayName: D"`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstalledModule {
    pub name: String,
    pub version: String,
    pub module_id: String,
    pub publisher: String,
    pub display_name: String,
}

/// Persisted, version-scoped copy of an `InstalledModule`, kept for
/// diagnostics only — never used for equality (the hash is canonical).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Module {
    pub module_id: String,
    pub name: String,
    pub version: String,
    pub publisher: String,
    pub display_name: String,
    pub sort_order: i64,
}

impl From<(usize, &InstalledModule)> for Module {
    fn from((order, m): (usize, &InstalledModule)) -> Self {
        Module {
            module_id: m.module_id.clone(),
            name: m.name.clone(),
            version: m.version.clone(),
            publisher: m.publisher.clone(),
            display_name: m.display_name.clone(),
            sort_order: order as i64,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GlobalVersion {
    pub id: i64,
    pub version_hash: String,
    pub modules_hash: String,
    pub first_seen_at: DateTime<Utc>,
    pub last_used_at: DateTime<Utc>,
    pub reference_count: i64,
    pub created_by_environment_id: i64,
    /// `GetApplicationVersion`/`GetPlatformBuildVersion` fallback descriptors
    ///, captured alongside the module fingerprint that created
    /// this version and surfaced through `GetEnvironmentInfo`.
    pub application_version: Option<String>,
    pub platform_build_version: Option<String>,
}

/// `modules_hash = SHA-256(join('|', sorted([m.module_id + ':' + m.version])))`.
/// `version_hash = modules_hash[:16]`.
///
/// Sorting the joined `module_id:version` pairs (rather than hashing the raw
/// `GetInstalledModules` order) is what makes the hash order-independent —
/// spec §8 testable property 1.
pub fn compute_modules_hash(modules: &[InstalledModule]) -> String {
    let mut pairs: Vec<String> = modules.iter().map(|m| format!("{}:{}", m.module_id.trim(), m.version.trim())).collect();
    pairs.sort();

    let joined = pairs.join("|");
    let digest = Sha256::digest(joined.as_bytes());
    hex_encode(&digest)
}

pub fn version_hash_prefix(modules_hash: &str) -> String {
    modules_hash.chars().take(16).collect()
}

fn hex_encode(bytes: &[u8]) -> String {
    let mut s = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        s.push_str(&format!("{:02x}", b));
    }
    s
}

#[cfg(test)]
mod tests {
    use super::*;

    fn module(module_id: &str, version: &str) -> InstalledModule {
        InstalledModule {
            name: module_id.to_string(),
            version: version.to_string(),
            module_id: module_id.to_string(),
            publisher: "Microsoft Corporation".to_string(),
            display_name: module_id.to_string(),
        }
    }

    #[test]
    fn hash_is_order_independent() {
        let a = vec![module("ApplicationFoundation", "7.0.1"), module("ApplicationSuite", "10.0.5")];
        let b = vec![module("ApplicationSuite", "10.0.5"), module("ApplicationFoundation", "7.0.1")];

        assert_eq!(compute_modules_hash(&a), compute_modules_hash(&b));
    }

    #[test]
    fn hash_ignores_surrounding_whitespace() {
        let a = vec![module("ApplicationFoundation", "7.0.1")];
        let b = vec![InstalledModule {
            name: "  ApplicationFoundation  ".into(),
            version: " 7.0.1 ".into(),
            module_id: "  ApplicationFoundation  ".into(),
            publisher: "Microsoft Corporation".into(),
            display_name: "ApplicationFoundation".into(),
        }];

        assert_eq!(compute_modules_hash(&a), compute_modules_hash(&b));
    }

    #[test]
    fn hash_differs_on_module_set_change() {
        let a = vec![module("ApplicationFoundation", "7.0.1")];
        let b = vec![module("ApplicationFoundation", "7.0.2")];

        assert_ne!(compute_modules_hash(&a), compute_modules_hash(&b));
    }

    #[test]
    fn version_hash_is_16_hex_chars() {
        let h = compute_modules_hash(&[module("A", "1.0")]);
        let prefix = version_hash_prefix(&h);
        assert_eq!(prefix.len(), 16);
        assert!(h.starts_with(&prefix));
    }
}
