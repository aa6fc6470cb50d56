// d365fo-cache-core/tests/sharing_and_search.rs
//
// End-to-end integration coverage over an in-memory database: two
// environments with module-identical `GetInstalledModules` responses
// share one `GlobalVersion` (spec §8 item 2 / scenario S1), and a
// completed sync makes its entities immediately reachable through both
// the typed read API and full-text search (spec §8 item 4).

use async_trait::async_trait;
use d365fo_cache_core::application::Core;
use d365fo_cache_core::domain::metadata::Entity;
use d365fo_cache_core::domain::search::{EntityType, SearchFilters, SearchQuery};
use d365fo_cache_core::domain::sync::{SyncState, SyncStrategy};
use d365fo_cache_core::infrastructure::db::pool::MetadataDb;
use d365fo_cache_core::ports::odata::{HttpError, ODataClient};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// A fixed, tiny D365 F&O-shaped metadata surface: one module, one data
/// entity/public entity pair, no enumerations. Identical across both
/// simulated environments so their `modules_hash` fingerprints match.
struct FakeEnvironment;

#[async_trait]
impl ODataClient for FakeEnvironment {
    async fn get(&self, path: &str, _query: &HashMap<String, String>) -> Result<Value, HttpError> {
        if path == "metadata/DataEntities" {
            return Ok(json!({ "value": [
                { "Name": "Customers", "PublicCollectionName": "Customers", "Category": "Master",
                  "DataServiceEnabled": true, "DataManagementEnabled": true, "IsReadOnly": false,
                  "LabelId": "@SYS1" }
            ] }));
        }
        if path == "metadata/PublicEntities" {
            return Ok(json!({ "value": [ { "Name": "Customers" } ] }));
        }
        if path.starts_with("metadata/PublicEntities(") {
            return Ok(json!({
                "Name": "Customers", "PublicCollectionName": "Customers", "LabelId": "@SYS1",
                "Properties": [
                    { "Name": "CustomerAccount", "TypeName": "String", "DataType": "String",
                      "IsKey": true, "IsMandatory": true, "AllowEdit": false, "AllowEditOnCreate": true,
                      "IsDimension": false, "PropertyOrder": 0, "LabelId": "@SYS2" }
                ],
                "NavigationProperties": [], "Actions": []
            }));
        }
        if path == "metadata/PublicEnumerations" {
            return Ok(json!({ "value": [] }));
        }
        Ok(json!({ "value": [] }))
    }

    async fn post(&self, _path: &str, _body: &Value) -> Result<Value, HttpError> {
        unimplemented!("not exercised by this fixture")
    }

    async fn call_action(&self, _entity_set: &str, action_name: &str, params: &Value) -> Result<Value, HttpError> {
        match action_name {
            "GetInstalledModules" => Ok(json!({ "value": [
                "Name: ApplicationFoundation | Version: 7.0.7521.60 | Module: ApplicationFoundation | Publisher: Microsoft Corporation | DisplayName: Application Foundation"
            ] })),
            "GetLabels" => {
                let ids = params["labelIds"].as_array().cloned().unwrap_or_default();
                let mut map = serde_json::Map::new();
                for id in ids {
                    let id = id.as_str().unwrap().to_string();
                    let text = match id.as_str() {
                        "@SYS1" => "Customer master",
                        "@SYS2" => "Customer account",
                        _ => "Unlabeled",
                    };
                    map.insert(id, Value::String(text.to_string()));
                }
                Ok(json!({ "value": map }))
            }
            _ => Ok(json!({ "value": "10.0.0.1" })),
        }
    }
}

/// Counts HTTP-shaped calls the sync pipeline issues (everything except
/// `GetInstalledModules`, which version detection always performs up
/// front regardless of strategy).
struct CountingClient {
    inner: FakeEnvironment,
    metadata_calls: Arc<std::sync::atomic::AtomicUsize>,
}

#[async_trait]
impl ODataClient for CountingClient {
    async fn get(&self, path: &str, query: &HashMap<String, String>) -> Result<Value, HttpError> {
        self.metadata_calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        self.inner.get(path, query).await
    }
    async fn post(&self, path: &str, body: &Value) -> Result<Value, HttpError> {
        self.inner.post(path, body).await
    }
    async fn call_action(&self, entity_set: &str, action_name: &str, params: &Value) -> Result<Value, HttpError> {
        if action_name != "GetInstalledModules" {
            self.metadata_calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        }
        self.inner.call_action(entity_set, action_name, params).await
    }
}

async fn wait_for_terminal(core: &Core, session_id: &str) {
    for _ in 0..200 {
        let session = core.sync_progress(session_id).unwrap();
        if session.state.is_terminal() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("sync session {session_id} never reached a terminal state");
}

#[tokio::test]
async fn second_environment_with_identical_modules_shares_the_version() {
    let db = MetadataDb::in_memory().unwrap();

    let counter_a = Arc::new(std::sync::atomic::AtomicUsize::new(0));
    let client_a: Arc<dyn ODataClient> = Arc::new(CountingClient { inner: FakeEnvironment, metadata_calls: counter_a.clone() });
    let core_a = Core::for_testing(db.clone(), client_a, "https://a.example.cloudax.dynamics.com").unwrap();

    let session_a = core_a.start_sync(Some(SyncStrategy::FullWithoutLabels), None, None).await.unwrap();
    wait_for_terminal(&core_a, &session_a).await;
    let progress_a = core_a.sync_progress(&session_a).unwrap();
    assert_eq!(progress_a.state, SyncState::Completed);
    assert!(counter_a.load(std::sync::atomic::Ordering::SeqCst) > 0, "environment A must actually fetch metadata");

    let entity_a = core_a.get_entity("Customers").unwrap().expect("Customers exists on A");

    let counter_b = Arc::new(std::sync::atomic::AtomicUsize::new(0));
    let client_b: Arc<dyn ODataClient> = Arc::new(CountingClient { inner: FakeEnvironment, metadata_calls: counter_b.clone() });
    let core_b = Core::for_testing(db.clone(), client_b, "https://b.example.cloudax.dynamics.com").unwrap();

    // Auto strategy: B should resolve to `sharing_mode` since A's sync for
    // the same module set already completed.
    let session_b = core_b.start_sync(None, None, None).await.unwrap();
    wait_for_terminal(&core_b, &session_b).await;
    let progress_b = core_b.sync_progress(&session_b).unwrap();

    assert_eq!(progress_b.state, SyncState::Completed);
    assert_eq!(progress_b.strategy, SyncStrategy::SharingMode);
    assert_eq!(progress_b.items_total, 0);
    assert_eq!(counter_b.load(std::sync::atomic::Ordering::SeqCst), 0, "sharing_mode must make zero metadata-row HTTP requests");

    let entity_b = core_b.get_entity("Customers").unwrap().expect("Customers exists on B via the shared version");

    match (entity_a, entity_b) {
        (Entity::Data(a), Entity::Data(b)) => assert_eq!(a.name, b.name),
        (Entity::Public(a), Entity::Public(b)) => {
            assert_eq!(a.name, b.name);
            assert_eq!(a.entity_set_name, b.entity_set_name);
        }
        other => panic!("environments returned mismatched entity shapes: {other:?}"),
    }
}

#[tokio::test]
async fn completed_sync_is_immediately_searchable_by_name() {
    let db = MetadataDb::in_memory().unwrap();
    let client: Arc<dyn ODataClient> = Arc::new(FakeEnvironment);
    let core = Core::for_testing(db, client, "https://search.example.cloudax.dynamics.com").unwrap();

    let session_id = core.start_sync(Some(SyncStrategy::Full), None, None).await.unwrap();
    wait_for_terminal(&core, &session_id).await;
    assert_eq!(core.sync_progress(&session_id).unwrap().state, SyncState::Completed);

    let query = SearchQuery {
        text: "Customers".to_string(),
        entity_types: vec![EntityType::DataEntity, EntityType::PublicEntity],
        filters: SearchFilters::default(),
        limit: 10,
        offset: 0,
        use_fulltext: true,
    };

    let results = core.search(&query).unwrap();
    assert!(
        results.iter().any(|r| r.name == "Customers"),
        "expected 'Customers' in top results, got {results:?}"
    );
}

#[tokio::test]
async fn labels_resolved_during_a_full_sync_are_readable_afterwards() {
    let db = MetadataDb::in_memory().unwrap();
    let client: Arc<dyn ODataClient> = Arc::new(FakeEnvironment);
    let core = Core::for_testing(db, client, "https://labels.example.cloudax.dynamics.com").unwrap();

    let session_id = core.start_sync(Some(SyncStrategy::Full), None, None).await.unwrap();
    wait_for_terminal(&core, &session_id).await;
    assert_eq!(core.sync_progress(&session_id).unwrap().state, SyncState::Completed);

    let label = core.get_label("@SYS1", "en-US").await.unwrap();
    assert_eq!(label, Some("Customer master".to_string()));
}
