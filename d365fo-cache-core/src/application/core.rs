// d365fo-cache-core/src/application/core.rs
//
// §6.2: the public API surface every CLI/MCP consumer is built against.
// `Core` wires the repository, cache tiers, version detector, global
// version manager, sync orchestrator and label resolver into the single
// facade those consumers hold. Consumers never touch the application
// sub-modules directly.

use crate::application::global_version_manager::GlobalVersionManager;
use crate::application::label_resolver::LabelResolver;
use crate::application::sync_orchestrator::{ProgressCallback, SyncOrchestrator};
use crate::application::version_detector::VersionDetector;
use crate::domain::environment::{Environment, EnvironmentVersion};
use crate::domain::metadata::entity::{BindingKind, EntityAction, EntityCategory};
use crate::domain::metadata::{DataEntity, Entity, Enumeration};
use crate::domain::search::{EntityType, SearchQuery, SearchResult, rank_results};
use crate::domain::sync::{SyncSession, SyncState, SyncStrategy};
use crate::error::CoreError;
use crate::infrastructure::cache::{DiskCache, MemoryCache};
use crate::infrastructure::config::CacheConfig;
use crate::infrastructure::db::fts;
use crate::infrastructure::db::pool::MetadataDb;
use crate::infrastructure::db::repository::MetadataRepository;
use crate::infrastructure::error::{DatabaseError, InfrastructureError};
use crate::infrastructure::http::odata_client::ReqwestODataClient;
use crate::infrastructure::http::token::{ClientCredentialsTokenProvider, StaticTokenProvider};
use crate::ports::clock::{Clock, SystemClock};
use crate::ports::fs_root::FsRoot;
use crate::ports::odata::ODataClient;
use crate::ports::token::TokenProvider;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// Opened, per-environment handle onto the cache: one SQLite
/// file plus one disk-cache directory under `FsRoot`, with the read/write
/// pools, L1/L2 tiers and application services built on top of them.
pub struct Core {
    repo: MetadataRepository,
    version_detector: Arc<VersionDetector>,
    global_versions: GlobalVersionManager,
    label_resolver: Arc<LabelResolver>,
    orchestrator: Arc<SyncOrchestrator>,
    client: Arc<dyn ODataClient>,
    environment_id: i64,
    clock: Arc<dyn Clock>,
}

impl Core {
    /// Opens (or creates) the cache rooted at `fs_root` for `config.base_url`,
    /// building the token provider from `config.auth_mode`.
    pub fn open(fs_root: &FsRoot, config: &CacheConfig) -> Result<Self, CoreError> {
        let db = MetadataDb::open(&fs_root.db_path(), 4)?;
        {
            let conn = db.writer()?;
            crate::infrastructure::db::migrations::ensure_schema(&conn, &fs_root.db_path()).map_err(InfrastructureError::from)?;
            if fts::is_contentless(&conn).map_err(sqlite_err)? {
                fts::migrate_contentless_to_content_bearing(&conn).map_err(sqlite_err)?;
            } else {
                fts::create_fts(&conn).map_err(sqlite_err)?;
            }
        }
        let repo = MetadataRepository::new(db);
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);

        let now = clock.now();
        let environment = repo.find_or_create_environment(&config.base_url, &config.base_url, now)?;

        let token_provider = build_token_provider(config);
        let client: Arc<dyn ODataClient> = Arc::new(ReqwestODataClient::new(
            config.base_url.clone(),
            token_provider,
            format!("{}/.default", config.base_url.trim_end_matches('/')),
        ));

        let memory = MemoryCache::new(
            config.max_memory_cache_size,
            Duration::from_secs(60 * 5),
        );
        let disk = DiskCache::new(fs_root.disk_cache_dir(), 512 * 1024 * 1024)?;

        let label_resolver = Arc::new(LabelResolver::new(
            repo.clone(),
            memory,
            disk,
            Arc::clone(&client),
            true,
        ));

        let version_detector = Arc::new(VersionDetector::new());
        let global_versions = GlobalVersionManager::new(repo.clone(), Arc::clone(&clock));
        let orchestrator = Arc::new(SyncOrchestrator::new(
            repo.clone(),
            Arc::clone(&version_detector),
            GlobalVersionManager::new(repo.clone(), Arc::clone(&clock)),
            Arc::clone(&label_resolver),
            Arc::clone(&clock),
        ));

        Ok(Core {
            repo,
            version_detector,
            global_versions,
            label_resolver,
            orchestrator,
            client,
            environment_id: environment.id,
            clock,
        })
    }

    /// Test/embedding constructor: wires a `Core` over an already-open
    /// in-memory database and an injected `ODataClient`, bypassing real
    /// network/auth setup entirely.
    pub fn for_testing(db: MetadataDb, client: Arc<dyn ODataClient>, base_url: &str) -> Result<Self, CoreError> {
        {
            let conn = db.writer()?;
            crate::infrastructure::db::schema::apply(&conn).map_err(sqlite_err)?;
            fts::create_fts(&conn).map_err(sqlite_err)?;
        }
        let repo = MetadataRepository::new(db);
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let now = clock.now();
        let environment = repo.find_or_create_environment(base_url, base_url, now)?;

        let memory = MemoryCache::new(1000, Duration::from_secs(300));
        let disk = DiskCache::new(std::env::temp_dir().join(format!("d365fo-cache-test-{}", environment.id)), 64 * 1024 * 1024)?;
        let label_resolver = Arc::new(LabelResolver::new(repo.clone(), memory, disk, Arc::clone(&client), true));

        let version_detector = Arc::new(VersionDetector::new());
        let global_versions = GlobalVersionManager::new(repo.clone(), Arc::clone(&clock));
        let orchestrator = Arc::new(SyncOrchestrator::new(
            repo.clone(),
            Arc::clone(&version_detector),
            GlobalVersionManager::new(repo.clone(), Arc::clone(&clock)),
            Arc::clone(&label_resolver),
            Arc::clone(&clock),
        ));

        Ok(Core {
            repo,
            version_detector,
            global_versions,
            label_resolver,
            orchestrator,
            client,
            environment_id: environment.id,
            clock,
        })
    }

    pub fn environment_id(&self) -> i64 {
        self.environment_id
    }

    /// `GetEnvironmentInfo`: resolved environment, active link
    /// and global version row joined into the one response shape every
    /// consumer (CLI `info`, MCP `get_environment_info` tool) renders.
    pub fn environment_info(&self) -> Result<(Environment, Option<EnvironmentVersion>), CoreError> {
        let env = self.repo.get_environment(self.environment_id)?.ok_or_else(|| CoreError::NotFound {
                kind: "environment",
                name: self.environment_id.to_string(),
            })?;
        let active = self.repo.get_active_environment_version(self.environment_id)?;
        Ok((env, active))
    }

    pub fn environment_info_full(&self) -> Result<crate::domain::environment::EnvironmentInfo, CoreError> {
        use crate::domain::environment::{EntityCounts, EnvironmentInfo};

        let (env, active) = self.environment_info()?;
        let (app_version, platform_version, counts) = match &active {
            Some(ev) => {
                let gv = self.global_versions.get_global_version(ev.global_version_id)?;
                let (entities, actions, enums, labels) = self.repo.counts_for_version(ev.global_version_id)?;
                (
                    gv.as_ref().and_then(|g| g.application_version.clone()),
                    gv.as_ref().and_then(|g| g.platform_build_version.clone()),
                    EntityCounts { entities, actions, enums, labels },
                )
            }
            None => (None, None, EntityCounts { entities: 0, actions: 0, enums: 0, labels: 0 }),
        };

        Ok(EnvironmentInfo {
            base_url: env.base_url,
            active_global_version_id: active.as_ref().map(|ev| ev.global_version_id),
            app_version,
            platform_version,
            counts,
            last_sync_at: env.last_sync_at,
        })
    }

    fn active_global_version_id(&self) -> Result<i64, CoreError> {
        self.repo.get_active_environment_version(self.environment_id)?.map(|ev| ev.global_version_id).ok_or_else(|| CoreError::NotFound {
                kind: "global_version",
                name: "no completed sync for this environment yet".to_string(),
            })
    }

    /// `StartSync`.
    pub async fn start_sync(
        &self,
        strategy: Option<SyncStrategy>,
        language: Option<String>,
        progress: Option<ProgressCallback>,
    ) -> Result<String, CoreError> {
        let language = language.unwrap_or_else(|| "en-US".to_string());
        self.orchestrator.start(self.environment_id, Arc::clone(&self.client), strategy, language, progress).await
    }

    /// `GetSyncProgress`.
    pub fn sync_progress(&self, session_id: &str) -> Result<SyncSession, CoreError> {
        self.orchestrator.progress(session_id)
    }

    /// `CancelSync`.
    pub fn cancel_sync(&self, session_id: &str) -> Result<(), CoreError> {
        self.orchestrator.cancel(session_id)
    }

    /// `ListSyncSessions`.
    pub fn list_sync_sessions(&self, state: Option<SyncState>) -> Result<Vec<SyncSession>, CoreError> {
        self.orchestrator.list(state)
    }

    /// `GetSyncHistory`.
    pub fn sync_history(&self, limit: usize) -> Result<Vec<SyncSession>, CoreError> {
        self.orchestrator.history(limit, Some(self.environment_id))
    }

    /// `GetEntity`: tries the public-entity detail first (it
    /// carries nested properties/navigations/actions), falling back to the
    /// bare data-entity record so callers get an answer for entities that
    /// only exist in the simpler shape.
    pub fn get_entity(&self, name: &str) -> Result<Option<Entity>, CoreError> {
        let gv = self.active_global_version_id()?;
        if let Some(p) = self.repo.get_public_entity(gv, name)? {
            return Ok(Some(Entity::Public(p)));
        }
        if let Some(d) = self.repo.get_data_entity(gv, name)? {
            return Ok(Some(Entity::Data(d)));
        }
        Ok(None)
    }

    /// `ListEntities`.
    pub fn list_entities(
        &self,
        category: Option<EntityCategory>,
        is_read_only: Option<bool>,
        limit: usize,
        offset: usize,
    ) -> Result<(Vec<DataEntity>, u64), CoreError> {
        let gv = self.active_global_version_id()?;
        Ok(self.repo.list_data_entities(gv, category, is_read_only, limit, offset)?)
    }

    /// `GetEnumeration`.
    pub fn get_enumeration(&self, name: &str) -> Result<Option<Enumeration>, CoreError> {
        let gv = self.active_global_version_id()?;
        Ok(self.repo.get_enumeration(gv, name)?)
    }

    /// `GetActions`.
    pub fn get_actions(
        &self,
        entity_name: Option<&str>,
        binding_kind: Option<BindingKind>,
        name_pattern: Option<&str>,
        limit: usize,
        offset: usize,
    ) -> Result<(Vec<(String, EntityAction)>, u64), CoreError> {
        let gv = self.active_global_version_id()?;
        Ok(self.repo.get_actions(gv, entity_name, binding_kind, name_pattern, limit, offset)?)
    }

    /// `GetLabel`.
    pub async fn get_label(&self, label_id: &str, language: &str) -> Result<Option<String>, CoreError> {
        let gv = self.active_global_version_id()?;
        self.label_resolver.get_label(gv, label_id, language).await
    }

    /// `GetLabelsBatch`.
    pub async fn get_labels_batch(
        &self,
        label_ids: &[String],
        language: &str,
    ) -> Result<HashMap<String, String>, CoreError> {
        let gv = self.active_global_version_id()?;
        self.label_resolver.get_labels_batch(gv, label_ids, language).await
    }

    /// `Search`: FTS path when `use_fulltext`, a `LIKE`
    /// fallback otherwise, then a shared tie-break pass over both paths so
    /// ranking behavior is identical regardless of which one ran.
    pub fn search(&self, query: &SearchQuery) -> Result<Vec<SearchResult>, CoreError> {
        if query.text.trim().is_empty() {
            return Err(CoreError::Domain(crate::domain::error::DomainError::EmptyFulltextQuery));
        }
        let gv = self.active_global_version_id()?;
        let conn = self.repo.db().reader()?;

        let results = if query.use_fulltext {
            fts::search_fulltext(&conn, gv, &query.text, &query.entity_types, query.limit, query.offset).map_err(sqlite_err)?
        } else {
            fts::search_like(&conn, gv, &query.text, &query.filters, query.limit, query.offset).map_err(sqlite_err)?
        };

        Ok(rank_results(&query.text, results))
    }

    pub fn version_detector(&self) -> &Arc<VersionDetector> {
        &self.version_detector
    }

    pub fn global_versions(&self) -> &GlobalVersionManager {
        &self.global_versions
    }

    pub fn repository(&self) -> &MetadataRepository {
        &self.repo
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }
}

fn sqlite_err(e: rusqlite::Error) -> InfrastructureError {
    InfrastructureError::Database(DatabaseError::Sqlite(e))
}

fn build_token_provider(config: &CacheConfig) -> Arc<dyn TokenProvider> {
    match config.auth_mode {
        crate::infrastructure::config::AuthMode::ClientCredentials => {
            let tenant_id = config.tenant_id.clone().unwrap_or_default();
            let client_id = config.client_id.clone().unwrap_or_default();
            let client_secret = config.client_secret.clone().unwrap_or_default();
            Arc::new(ClientCredentialsTokenProvider::new(tenant_id, client_id, client_secret))
        }
        crate::infrastructure::config::AuthMode::Default => {
            // No interactive/MSAL device-code flow in this crate (spec
            // §1 non-goal: UI-driven auth); default mode expects an
            // already-issued token to be supplied by the consumer via env.
            let token = std::env::var("D365FO_ACCESS_TOKEN").unwrap_or_default();
            Arc::new(StaticTokenProvider::new(token, chrono::Utc::now() + chrono::Duration::hours(1)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::search::SearchFilters;
    use async_trait::async_trait;
    use std::collections::HashMap as StdHashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FakeClient {
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl ODataClient for FakeClient {
        async fn get(&self, _path: &str, _query: &StdHashMap<String, String>) -> Result<serde_json::Value, crate::ports::odata::HttpError> {
            Ok(serde_json::json!({ "value": [] }))
        }
        async fn post(&self, _path: &str, _body: &serde_json::Value) -> Result<serde_json::Value, crate::ports::odata::HttpError> {
            unimplemented!()
        }
        async fn call_action(&self, _entity_set: &str, action_name: &str, _params: &serde_json::Value) -> Result<serde_json::Value, crate::ports::odata::HttpError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if action_name == "GetInstalledModules" {
                Ok(serde_json::json!({ "value": ["Name: AF | Version: 1.0 | Module: AF | Publisher: MS | DisplayName: AF"] }))
            } else if action_name == "GetLabels" {
                Ok(serde_json::json!({ "value": {} }))
            } else {
                Ok(serde_json::json!({ "value": "1.0" }))
            }
        }
    }

    fn test_core() -> Core {
        let db = MetadataDb::in_memory().unwrap();
        let client: Arc<dyn ODataClient> = Arc::new(FakeClient { calls: Arc::new(AtomicUsize::new(0)) });
        Core::for_testing(db, client, "https://test.cloudax.dynamics.com").unwrap()
    }

    #[test]
    fn environment_info_reports_the_opened_environment() {
        let core = test_core();
        let (env, active) = core.environment_info().unwrap();
        assert_eq!(env.base_url, "https://test.cloudax.dynamics.com");
        assert!(active.is_none());
    }

    #[tokio::test]
    async fn search_rejects_empty_query() {
        let core = test_core();
        let query = SearchQuery {
            text: "   ".to_string(),
            entity_types: vec![EntityType::DataEntity],
            filters: SearchFilters::default(),
            limit: 10,
            offset: 0,
            use_fulltext: true,
        };
        let err = core.search(&query).unwrap_err();
        assert!(matches!(err, CoreError::Domain(_)));
    }

    #[test]
    fn get_entity_without_completed_sync_is_not_found() {
        let core = test_core();
        let err = core.get_entity("Customers").unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::NotFound);
    }
}
