// d365fo-cache-core/src/application/version_detector.rs
//
// `DetectVersion`. Calls the unbound `GetInstalledModules`
// action on `SystemNotifications`, parses each returned string, and folds
// the result into a `modules_hash`/`version_hash` pair. A 5-minute
// in-memory TTL cache means repeated calls against the same environment
// within that window cost zero network round-trips.

use crate::domain::version::{compute_modules_hash, version_hash_prefix, InstalledModule};
use crate::error::CoreError;
use crate::ports::clock::Clock;
use crate::ports::odata::ODataClient;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::sync::Mutex;
use std::time::Duration;
use tracing::{instrument, warn};

pub const CACHE_TTL: Duration = Duration::from_secs(5 * 60);

#[derive(Debug, Clone)]
pub struct DetectedVersion {
    pub modules: Vec<InstalledModule>,
    pub modules_hash: String,
    pub version_hash: String,
    pub application_version: Option<String>,
    pub platform_build_version: Option<String>,
}

struct CachedDetection {
    detected_at: DateTime<Utc>,
    value: DetectedVersion,
}

pub struct VersionDetector {
    cache: Mutex<Option<CachedDetection>>,
}

impl Default for VersionDetector {
    fn default() -> Self {
        Self::new()
    }
}

impl VersionDetector {
    pub fn new() -> Self {
        VersionDetector {
            cache: Mutex::new(None),
        }
    }

    #[instrument(skip(self, client, clock), fields(use_cache))]
    pub async fn detect(
        &self,
        client: &dyn ODataClient,
        clock: &dyn Clock,
        use_cache: bool,
    ) -> Result<DetectedVersion, CoreError> {
        if use_cache {
            if let Some(cached) = self.fresh_cached(clock.now()) {
                return Ok(cached);
            }
        }

        let raw = client.call_action("SystemNotifications", "GetInstalledModules", &Value::Null).await.map_err(|e| CoreError::VersionDetection(format!("GetInstalledModules failed: {e}")))?;

        let entries = extract_string_array(&raw);
        if entries.is_empty() {
            return Err(CoreError::VersionDetection(
                "GetInstalledModules returned no entries".to_string(),
            ));
        }

        let mut modules = Vec::with_capacity(entries.len());
        for entry in &entries {
            match parse_module_line(entry) {
                Some(module) => modules.push(module),
                None => warn!(entry = %entry, "skipping unparseable installed-module entry"),
            }
        }

        if modules.is_empty() {
            return Err(CoreError::VersionDetection(
                "no installed-module entries could be parsed".to_string(),
            ));
        }

        let modules_hash = compute_modules_hash(&modules);
        let version_hash = version_hash_prefix(&modules_hash);

        let application_version = fetch_descriptor(client, "GetApplicationVersion").await;
        let platform_build_version = fetch_descriptor(client, "GetPlatformBuildVersion").await;

        let detected = DetectedVersion {
            modules,
            modules_hash,
            version_hash,
            application_version,
            platform_build_version,
        };

        if let Ok(mut guard) = self.cache.lock() {
            *guard = Some(CachedDetection {
                detected_at: clock.now(),
                value: detected.clone(),
            });
        }

        Ok(detected)
    }

    fn fresh_cached(&self, now: DateTime<Utc>) -> Option<DetectedVersion> {
        let guard = self.cache.lock().ok()?;
        let cached = guard.as_ref()?;
        let age = now.signed_duration_since(cached.detected_at);
        if age.to_std().ok()? < CACHE_TTL {
            Some(cached.value.clone())
        } else {
            None
        }
    }
}

/// Best-effort fallback descriptor.
async fn fetch_descriptor(client: &dyn ODataClient, action: &str) -> Option<String> {
    match client.call_action("SystemNotifications", action, &Value::Null).await {
        Ok(value) => value.as_str().map(str::to_string).or_else(|| {
            value.get("value").and_then(Value::as_str).map(str::to_string)
        }),
        Err(e) => {
            warn!(action, error = %e, "fallback version descriptor call failed, continuing without it");
            None
        }
    }
}

fn extract_string_array(raw: &Value) -> Vec<String> {
    let array = raw.get("value").and_then(Value::as_array).or_else(|| raw.as_array());
    array.map(|items| items.iter().filter_map(Value::as_str).map(str::to_string).collect()).unwrap_or_default()
}

/// Parses `"Name: X | Version: Y | Module: Z | Publisher: P | DisplayName: D"`.
pub fn parse_module_line(line: &str) -> Option<InstalledModule> {
    let mut name = None;
    let mut version = None;
    let mut module_id = None;
    let mut publisher = None;
    let mut display_name = None;

    for part in line.split('|') {
        let mut kv = part.splitn(2, ':');
        let key = kv.next()?.trim();
        let value = kv.next()?.trim().to_string();
        match key {
            "Name" => name = Some(value),
            "Version" => version = Some(value),
            "Module" => module_id = Some(value),
            "Publisher" => publisher = Some(value),
            "DisplayName" => display_name = Some(value),
            _ => {}
        }
    }

    Some(InstalledModule {
        name: name?,
        version: version?,
        module_id: module_id?,
        publisher: publisher.unwrap_or_default(),
        display_name: display_name.unwrap_or_default(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::clock::SystemClock;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct FakeClient {
        calls: Arc<AtomicUsize>,
        modules: Vec<&'static str>,
    }

    #[async_trait]
    impl ODataClient for FakeClient {
        async fn get(&self, _path: &str, _query: &HashMap<String, String>) -> Result<Value, crate::ports::odata::HttpError> {
            unimplemented!()
        }
        async fn post(&self, _path: &str, _body: &Value) -> Result<Value, crate::ports::odata::HttpError> {
            unimplemented!()
        }
        async fn call_action(&self, _entity_set: &str, action_name: &str, _params: &Value) -> Result<Value, crate::ports::odata::HttpError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if action_name == "GetInstalledModules" {
                Ok(serde_json::json!({ "value": self.modules }))
            } else {
                Ok(serde_json::json!({ "value": "10.0.1" }))
            }
        }
    }

    #[test]
    fn parses_well_formed_line() {
        let line = "Name: ApplicationFoundation | Version: 7.0.7521.60 | Module: ApplicationFoundation | Publisher: Microsoft Corporation | DisplayName: Application Foundation";
        let module = parse_module_line(line).expect("parses");
        assert_eq!(module.module_id, "ApplicationFoundation");
        assert_eq!(module.version, "7.0.7521.60");
        assert_eq!(module.display_name, "Application Foundation");
    }

    #[test]
    fn rejects_line_missing_required_fields() {
        assert!(parse_module_line("Name: Foo | Version: 1.0").is_none());
    }

    #[tokio::test]
    async fn repeated_calls_within_ttl_hit_cache_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let client = FakeClient {
            calls: calls.clone(),
            modules: vec!["Name: A | Version: 1.0 | Module: A | Publisher: P | DisplayName: A"],
        };
        let detector = VersionDetector::new();
        let clock = SystemClock;

        detector.detect(&client, &clock, true).await.unwrap();
        detector.detect(&client, &clock, true).await.unwrap();

        // GetInstalledModules + 2 fallback descriptor calls = 3 total for the
        // first detection; cached second call issues zero further calls.
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn use_cache_false_forces_refetch() {
        let calls = Arc::new(AtomicUsize::new(0));
        let client = FakeClient {
            calls: calls.clone(),
            modules: vec!["Name: A | Version: 1.0 | Module: A | Publisher: P | DisplayName: A"],
        };
        let detector = VersionDetector::new();
        let clock = SystemClock;

        detector.detect(&client, &clock, true).await.unwrap();
        detector.detect(&client, &clock, false).await.unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 6);
    }

    #[tokio::test]
    async fn zero_parseable_modules_fails() {
        let client = FakeClient {
            calls: Arc::new(AtomicUsize::new(0)),
            modules: vec!["garbage"],
        };
        let detector = VersionDetector::new();
        let clock = SystemClock;

        let err = detector.detect(&client, &clock, false).await.unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::VersionDetection);
    }
}
