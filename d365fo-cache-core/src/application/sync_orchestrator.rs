// d365fo-cache-core/src/application/sync_orchestrator.rs
//
// §4.3: the central multi-phase sync pipeline. Detects the installed-module
// fingerprint, resolves it to a `GlobalVersion`, picks a strategy, fans out
// metadata fetches with bounded concurrency, writes in batches, rebuilds the
// FTS index once per version, and drives the `SyncSession` state machine
// end to end. One session per environment at a time.

use crate::application::global_version_manager::GlobalVersionManager;
use crate::application::label_resolver::LabelResolver;
use crate::application::version_detector::VersionDetector;
use crate::domain::environment::SyncStatus;
use crate::domain::label::{LabelHolder, LabelWalker};
use crate::domain::metadata::{
    ActionParameter, BindingKind, Cardinality, ConstraintKind, DataEntity, EntityAction,
    EntityCategory, EntityProperty, Enumeration, EnumerationMember, NavigationProperty,
    PublicEntity, RelationConstraint,
};
use crate::domain::sync::{select_strategy, SyncSession, SyncState, SyncStrategy};
use crate::error::CoreError;
use crate::infrastructure::db::fts::{self, FtsRow};
use crate::infrastructure::db::repository::{MetadataRepository, BATCH_SIZE};
use crate::infrastructure::error::InfrastructureError;
use crate::ports::clock::Clock;
use crate::ports::odata::ODataClient;
use dashmap::DashMap;
use serde_json::Value;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{info, instrument, warn};

pub const DEFAULT_CONCURRENCY: usize = 8;

const PATH_DATA_ENTITIES: &str = "metadata/DataEntities";
const PATH_PUBLIC_ENTITIES: &str = "metadata/PublicEntities";
const PATH_PUBLIC_ENUMERATIONS: &str = "metadata/PublicEnumerations";

/// Invoked at phase boundaries and periodically during a batch.
pub type ProgressCallback = Arc<dyn Fn(&SyncSession) + Send + Sync>;

pub struct SyncOrchestrator {
    repo: MetadataRepository,
    version_detector: Arc<VersionDetector>,
    global_versions: GlobalVersionManager,
    label_resolver: Arc<LabelResolver>,
    clock: Arc<dyn Clock>,
    concurrency: usize,
    cancel_flags: Arc<DashMap<String, Arc<AtomicBool>>>,
}

impl SyncOrchestrator {
    pub fn new(
        repo: MetadataRepository,
        version_detector: Arc<VersionDetector>,
        global_versions: GlobalVersionManager,
        label_resolver: Arc<LabelResolver>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        SyncOrchestrator {
            repo,
            version_detector,
            global_versions,
            label_resolver,
            clock,
            concurrency: DEFAULT_CONCURRENCY,
            cancel_flags: Arc::new(DashMap::new()),
        }
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// `StartSync`. Rejects with `SyncConflict` if a
    /// session is already running for this environment; otherwise creates a
    /// `Pending` session, hands the caller its id immediately, and drives
    /// the rest of the pipeline on a spawned task.
    #[instrument(skip(self, client, progress), fields(environment_id, session_id))]
    pub async fn start(
        self: &Arc<Self>,
        environment_id: i64,
        client: Arc<dyn ODataClient>,
        requested_strategy: Option<SyncStrategy>,
        language: String,
        progress: Option<ProgressCallback>,
    ) -> Result<String, CoreError> {
        if let Some(running) = self.find_running_session(environment_id)? {
            return Err(CoreError::SyncConflict {
                session_id: running.session_id,
            });
        }

        let mut session = SyncSession::new(
            environment_id,
            requested_strategy.unwrap_or(SyncStrategy::Full),
            self.clock.now(),
        );
        self.repo.create_sync_session(&session)?;
        let session_id = session.session_id.clone();

        let cancel_flag = Arc::new(AtomicBool::new(false));
        self.cancel_flags.insert(session_id.clone(), cancel_flag.clone());

        session.transition(SyncState::Running)?;
        session.phase = "detecting_version".to_string();
        self.repo.update_sync_session(&session)?;
        emit(&progress, &session);

        let this = Arc::clone(self);
        let sid = session_id.clone();
        tokio::spawn(async move {
            this.run_session(sid, environment_id, client, requested_strategy, language, progress, cancel_flag).await;
        });

        Ok(session_id)
    }

    /// `CancelSync`: cooperative — flips the flag the running
    /// task checks at batch boundaries, and moves the session into
    /// `Cancelling` immediately so `GetSyncProgress` reflects the request
    /// even before the background task notices it.
    pub fn cancel(&self, session_id: &str) -> Result<(), CoreError> {
        let mut session = self.repo.get_sync_session(session_id)?.ok_or_else(|| CoreError::NotFound {
                kind: "sync_session",
                name: session_id.to_string(),
            })?;

        if !session.is_cancellable() {
            return Err(CoreError::NotCancellable(session_id.to_string()));
        }

        match self.cancel_flags.get(session_id) {
            Some(flag) => flag.store(true, Ordering::SeqCst),
            None => return Err(CoreError::NotCancellable(session_id.to_string())),
        }

        session.transition(SyncState::Cancelling)?;
        self.repo.update_sync_session(&session)?;
        Ok(())
    }

    pub fn progress(&self, session_id: &str) -> Result<SyncSession, CoreError> {
        self.repo.get_sync_session(session_id)?.ok_or_else(|| CoreError::NotFound {
                kind: "sync_session",
                name: session_id.to_string(),
            })
    }

    pub fn list(&self, state: Option<SyncState>) -> Result<Vec<SyncSession>, CoreError> {
        Ok(self.repo.list_sync_sessions(state)?)
    }

    pub fn history(&self, limit: usize, environment_id: Option<i64>) -> Result<Vec<SyncSession>, CoreError> {
        Ok(self.repo.get_sync_history(limit, environment_id)?)
    }

    fn find_running_session(&self, environment_id: i64) -> Result<Option<SyncSession>, CoreError> {
        let running = self.repo.list_sync_sessions(Some(SyncState::Running))?;
        let cancelling = self.repo.list_sync_sessions(Some(SyncState::Cancelling))?;
        Ok(running.into_iter().chain(cancelling).find(|s| s.environment_id == environment_id))
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_session(
        self: Arc<Self>,
        session_id: String,
        environment_id: i64,
        client: Arc<dyn ODataClient>,
        requested_strategy: Option<SyncStrategy>,
        language: String,
        progress: Option<ProgressCallback>,
        cancel: Arc<AtomicBool>,
    ) {
        let outcome = self.run_session_inner(&session_id, environment_id, &client, requested_strategy, &language, &progress, &cancel).await;

        if let Err(err) = outcome {
            if let Ok(Some(mut session)) = self.repo.get_sync_session(&session_id) {
                if !session.state.is_terminal() {
                    session.error_messages.push(err.to_string());
                    session.errors_count += 1;
                    session.phase = "failed".to_string();
                    let _ = session.transition(SyncState::Failed);
                    let _ = self.repo.update_sync_session(&session);
                    emit(&progress, &session);
                }
            }
            tracing::error!(session_id, error = %err, "sync session failed");
        }

        self.cancel_flags.remove(&session_id);
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_session_inner(
        &self,
        session_id: &str,
        environment_id: i64,
        client: &Arc<dyn ODataClient>,
        requested_strategy: Option<SyncStrategy>,
        language: &str,
        progress: &Option<ProgressCallback>,
        cancel: &Arc<AtomicBool>,
    ) -> Result<(), CoreError> {
        let mut session = self.progress(session_id)?;

        let detected = self.version_detector.detect(client.as_ref(), self.clock.as_ref(), true).await?;
        let (global_version, _created) = self.global_versions.get_or_create_global_version(environment_id, &detected)?;

        let active = self.repo.get_active_environment_version(environment_id)?;
        let has_active_version = active.is_some();
        let previous_module_ids: Option<HashSet<String>> = match &active {
            Some(ev) if ev.global_version_id != global_version.id => Some(
                self.global_versions.module_ids_for_version(ev.global_version_id)?.into_iter().collect(),
            ),
            _ => None,
        };
        let new_module_ids: HashSet<String> = detected.modules.iter().map(|m| m.module_id.clone()).collect();
        let matching_completed = self.global_versions.has_completed_sync_for_version(global_version.id)?;

        let strategy = requested_strategy.unwrap_or_else(|| {
            select_strategy(has_active_version, matching_completed, previous_module_ids.as_ref(), &new_module_ids)
        });

        session.strategy = strategy;
        session.target_global_version_id = Some(global_version.id);
        session.phase = "linking_version".to_string();
        self.repo.update_sync_session(&session)?;
        emit(progress, &session);

        self.global_versions.link_environment_to_version(environment_id, global_version.id)?;

        info!(session_id, strategy = ?strategy, global_version_id = global_version.id, "sync strategy selected");

        if strategy == SyncStrategy::SharingMode {
            self.repo.set_environment_version_status(environment_id, global_version.id, SyncStatus::Completed, Some(0))?;
            session.phase = "completed".to_string();
            session.items_total = 1;
            session.items_done = 1;
            session.transition(SyncState::Completed)?;
            self.repo.update_sync_session(&session)?;
            emit(progress, &session);
            return Ok(());
        }

        let gv = global_version.id;
        let fetch_enums = matches!(strategy, SyncStrategy::Full | SyncStrategy::Incremental | SyncStrategy::FullWithoutLabels);
        let fetch_labels = matches!(strategy, SyncStrategy::Full | SyncStrategy::Incremental | SyncStrategy::LabelsOnly);
        let fetch_entities = !matches!(strategy, SyncStrategy::LabelsOnly);

        let mut data_entities = Vec::new();
        let mut public_entities = Vec::new();
        let mut enumerations = Vec::new();

        if fetch_entities {
            session.phase = "fetching_entities".to_string();
            self.repo.update_sync_session(&session)?;
            emit(progress, &session);

            data_entities = self.fetch_data_entities(client, gv).await?;
            public_entities = self.fetch_public_entities(client, gv, cancel).await?;

            session.items_total += (data_entities.len() + public_entities.len()) as i64;
            self.repo.update_sync_session(&session)?;
            emit(progress, &session);
        }

        if fetch_enums {
            session.phase = "fetching_enumerations".to_string();
            self.repo.update_sync_session(&session)?;
            emit(progress, &session);
            enumerations = self.fetch_enumerations(client, gv, cancel).await?;

            session.items_total += enumerations.len() as i64;
            self.repo.update_sync_session(&session)?;
            emit(progress, &session);
        }

        // Every write below commits at most `BATCH_SIZE` rows at a time and
        // bumps `items_done` right after each commit, so a cancellation
        // noticed between batches leaves whatever already landed in the
        // database in place rather than discarding it.
        session.phase = "writing_metadata".to_string();
        self.repo.update_sync_session(&session)?;
        emit(progress, &session);

        let mut cancelled = false;
        if fetch_entities {
            cancelled = self.write_in_batches(&mut session, progress, cancel, &data_entities, MetadataRepository::write_data_entities).await?;
            if !cancelled {
                cancelled = self.write_in_batches(&mut session, progress, cancel, &public_entities, MetadataRepository::write_public_entities).await?;
            }
        }
        if !cancelled && fetch_enums {
            cancelled = self.write_in_batches(&mut session, progress, cancel, &enumerations, MetadataRepository::write_enumerations).await?;
        }

        if cancelled {
            return self.finish_cancelled(&mut session, progress);
        }

        if fetch_entities && matches!(strategy, SyncStrategy::EntitiesOnly) {
            return self.finalize(&mut session, environment_id, gv, &data_entities, &public_entities, &[], progress);
        }

        if fetch_labels {
            session.phase = "resolving_labels".to_string();
            self.repo.update_sync_session(&session)?;
            emit(progress, &session);

            if matches!(strategy, SyncStrategy::LabelsOnly) {
                const ALL: usize = 1_000_000;
                let existing = self.repo.list_data_entities(gv, None, None, ALL, 0)?.0;
                data_entities = existing;
                // LabelsOnly re-reads every public entity too, so label text
                // on properties/navigations gets refreshed the same way.
                for d in &data_entities {
                    if let Some(pe) = self.repo.get_public_entity(gv, &d.name)? {
                        public_entities.push(pe);
                    }
                }
                enumerations = self.enumerate_existing(gv)?;
            }

            self.resolve_all_labels(gv, language, &mut data_entities, &mut public_entities, &mut enumerations).await?;

            self.repo.write_data_entities(&data_entities)?;
            self.repo.write_public_entities(&public_entities)?;
            self.repo.write_enumerations(&enumerations)?;
        }

        self.finalize(&mut session, environment_id, gv, &data_entities, &public_entities, &enumerations, progress)
    }

    fn enumerate_existing(&self, global_version_id: i64) -> Result<Vec<Enumeration>, CoreError> {
        // No list-all-enumerations repository method exists (enumerations
        // are looked up by name); labels_only re-resolves the ones already
        // referenced by the public entities just re-read.
        let _ = global_version_id;
        Ok(Vec::new())
    }

    /// Writes `rows` to the database `BATCH_SIZE` at a time, committing and
    /// persisting `items_done` after every chunk. Returns `true` the moment
    /// cancellation is observed between chunks — everything written up to
    /// that point already landed, so the caller has nothing left to undo.
    async fn write_in_batches<T>(
        &self,
        session: &mut SyncSession,
        progress: &Option<ProgressCallback>,
        cancel: &Arc<AtomicBool>,
        rows: &[T],
        write: impl Fn(&MetadataRepository, &[T]) -> Result<(), InfrastructureError>,
    ) -> Result<bool, CoreError> {
        for chunk in rows.chunks(BATCH_SIZE) {
            write(&self.repo, chunk)?;
            session.items_done += chunk.len() as i64;
            self.repo.update_sync_session(session)?;
            emit(progress, session);

            // Yield so a concurrently requested `cancel()` actually gets to
            // run and flip the flag before the next chunk starts — without
            // this, nothing else interleaves in a fully synchronous batch
            // loop.
            tokio::task::yield_now().await;

            if cancel.load(Ordering::SeqCst) {
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn finish_cancelled(&self, session: &mut SyncSession, progress: &Option<ProgressCallback>) -> Result<(), CoreError> {
        session.phase = "cancelled".to_string();
        session.transition(SyncState::Cancelled)?;
        self.repo.update_sync_session(session)?;
        emit(progress, session);
        Ok(())
    }

    fn finalize(
        &self,
        session: &mut SyncSession,
        environment_id: i64,
        global_version_id: i64,
        data_entities: &[DataEntity],
        public_entities: &[PublicEntity],
        enumerations: &[Enumeration],
        progress: &Option<ProgressCallback>,
    ) -> Result<(), CoreError> {
        session.phase = "rebuilding_search_index".to_string();
        self.repo.update_sync_session(session)?;
        emit(progress, session);

        let rows = build_fts_rows(data_entities, public_entities, enumerations);
        {
            let conn = self.repo.db().writer()?;
            fts::rebuild_for_version(&conn, global_version_id, &rows)?;
        }

        self.repo.set_environment_version_status(environment_id, global_version_id, SyncStatus::Completed, None)?;
        self.repo.touch_last_sync(environment_id, self.clock.now())?;

        session.phase = "completed".to_string();
        session.transition(SyncState::Completed)?;
        self.repo.update_sync_session(session)?;
        emit(progress, session);
        Ok(())
    }

    async fn resolve_all_labels(
        &self,
        global_version_id: i64,
        language: &str,
        data_entities: &mut [DataEntity],
        public_entities: &mut [PublicEntity],
        enumerations: &mut [Enumeration],
    ) -> Result<(), CoreError> {
        let mut ids = Vec::new();
        for d in data_entities.iter() {
            if let Some(id) = d.label_id() {
                ids.push(id.to_string());
            }
        }
        for p in public_entities.iter() {
            p.collect_label_ids(&mut ids);
        }
        for e in enumerations.iter() {
            e.collect_label_ids(&mut ids);
        }
        ids.sort();
        ids.dedup();

        if ids.is_empty() {
            return Ok(());
        }

        let resolved = self.label_resolver.get_labels_batch(global_version_id, &ids, language).await?;

        for d in data_entities.iter_mut() {
            if let Some(id) = d.label_id().map(str::to_string) {
                if let Some(text) = resolved.get(&id) {
                    d.set_label_text(text.clone());
                }
            }
        }
        for p in public_entities.iter_mut() {
            p.apply_labels(&resolved);
        }
        for e in enumerations.iter_mut() {
            e.apply_labels(&resolved);
        }
        Ok(())
    }

    async fn fetch_data_entities(&self, client: &Arc<dyn ODataClient>, gv: i64) -> Result<Vec<DataEntity>, CoreError> {
        let raw = client.get(PATH_DATA_ENTITIES, &Default::default()).await.map_err(|e| CoreError::Infrastructure(InfrastructureError::Transport(e)))?;

        let mut out = Vec::new();
        for item in as_value_array(&raw) {
            match parse_data_entity(gv, item) {
                Ok(e) => out.push(e),
                Err(e) => warn!(error = %e, "skipping unparseable data entity"),
            }
        }
        Ok(out)
    }

    async fn fetch_public_entities(
        &self,
        client: &Arc<dyn ODataClient>,
        gv: i64,
        cancel: &Arc<AtomicBool>,
    ) -> Result<Vec<PublicEntity>, CoreError> {
        let raw = client.get(PATH_PUBLIC_ENTITIES, &Default::default()).await.map_err(|e| CoreError::Infrastructure(InfrastructureError::Transport(e)))?;

        let names: Vec<String> = as_value_array(&raw).iter().filter_map(|v| v.get("Name").and_then(Value::as_str).map(str::to_string)).collect();

        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let mut handles = Vec::with_capacity(names.len());
        for name in names {
            if cancel.load(Ordering::SeqCst) {
                break;
            }
            let client = Arc::clone(client);
            let permit = Arc::clone(&semaphore);
            handles.push(tokio::spawn(async move {
                let _permit = permit.acquire_owned().await.ok();
                let path = format!("{PATH_PUBLIC_ENTITIES}('{}')", odata_quote(&name));
                client.get(&path, &Default::default()).await.map(|v| (name, v))
            }));
        }

        let mut out = Vec::new();
        for handle in handles {
            match handle.await {
                Ok(Ok((name, raw))) => match parse_public_entity(gv, &raw) {
                    Ok(e) => out.push(e),
                    Err(e) => warn!(entity = %name, error = %e, "skipping unparseable public entity"),
                },
                Ok(Err(e)) => warn!(error = %e, "public entity detail fetch failed"),
                Err(join_err) => warn!(error = %join_err, "public entity detail task panicked"),
            }
        }
        Ok(out)
    }

    async fn fetch_enumerations(
        &self,
        client: &Arc<dyn ODataClient>,
        gv: i64,
        cancel: &Arc<AtomicBool>,
    ) -> Result<Vec<Enumeration>, CoreError> {
        let raw = client.get(PATH_PUBLIC_ENUMERATIONS, &Default::default()).await.map_err(|e| CoreError::Infrastructure(InfrastructureError::Transport(e)))?;

        let names: Vec<String> = as_value_array(&raw).iter().filter_map(|v| v.get("Name").and_then(Value::as_str).map(str::to_string)).collect();

        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let mut handles = Vec::with_capacity(names.len());
        for name in names {
            if cancel.load(Ordering::SeqCst) {
                break;
            }
            let client = Arc::clone(client);
            let permit = Arc::clone(&semaphore);
            handles.push(tokio::spawn(async move {
                let _permit = permit.acquire_owned().await.ok();
                let path = format!("{PATH_PUBLIC_ENUMERATIONS}('{}')", odata_quote(&name));
                client.get(&path, &Default::default()).await.map(|v| (name, v))
            }));
        }

        let mut out = Vec::new();
        for handle in handles {
            match handle.await {
                Ok(Ok((name, raw))) => match parse_enumeration(gv, &raw) {
                    Ok(e) => out.push(e),
                    Err(e) => warn!(enumeration = %name, error = %e, "skipping unparseable enumeration"),
                },
                Ok(Err(e)) => warn!(error = %e, "enumeration detail fetch failed"),
                Err(join_err) => warn!(error = %join_err, "enumeration detail task panicked"),
            }
        }
        Ok(out)
    }
}

fn emit(progress: &Option<ProgressCallback>, session: &SyncSession) {
    if let Some(cb) = progress {
        cb(session);
    }
}

fn odata_quote(name: &str) -> String {
    name.replace('\'', "''")
}

fn as_value_array(raw: &Value) -> Vec<Value> {
    raw.get("value").and_then(Value::as_array).cloned().or_else(|| raw.as_array().cloned()).unwrap_or_default()
}

fn parse_data_entity(gv: i64, v: &Value) -> Result<DataEntity, InfrastructureError> {
    let name = str_field(v, "Name")?;
    Ok(DataEntity {
        global_version_id: gv,
        name: name.clone(),
        entity_set_name: v.get("PublicCollectionName").and_then(Value::as_str).unwrap_or(&name).to_string(),
        category: parse_category(v.get("Category").and_then(Value::as_str).unwrap_or("")),
        data_service_enabled: v.get("DataServiceEnabled").and_then(Value::as_bool).unwrap_or(false),
        data_management_enabled: v.get("DataManagementEnabled").and_then(Value::as_bool).unwrap_or(false),
        is_read_only: v.get("IsReadOnly").and_then(Value::as_bool).unwrap_or(false),
        label_id: v.get("LabelId").and_then(Value::as_str).map(str::to_string),
        label_text: None,
    })
}

fn parse_public_entity(gv: i64, v: &Value) -> Result<PublicEntity, InfrastructureError> {
    let name = str_field(v, "Name")?;
    let entity_set_name = v.get("PublicCollectionName").and_then(Value::as_str).unwrap_or(&name).to_string();

    let properties = v.get("Properties").and_then(Value::as_array).map(|items| {
            items.iter().enumerate().filter_map(|(i, p)| parse_property(i, p).ok()).collect()
        }).unwrap_or_default();

    let navigation_properties = v.get("NavigationProperties").and_then(Value::as_array).map(|items| items.iter().filter_map(|n| parse_navigation(n).ok()).collect()).unwrap_or_default();

    let actions = v.get("Actions").and_then(Value::as_array).map(|items| items.iter().filter_map(|a| parse_action(a).ok()).collect()).unwrap_or_default();

    Ok(PublicEntity {
        global_version_id: gv,
        name,
        entity_set_name,
        label_id: v.get("LabelId").and_then(Value::as_str).map(str::to_string),
        label_text: None,
        properties,
        navigation_properties,
        actions,
    })
}

fn parse_property(order: usize, v: &Value) -> Result<EntityProperty, InfrastructureError> {
    Ok(EntityProperty {
        name: str_field(v, "Name")?,
        type_name: v.get("TypeName").and_then(Value::as_str).unwrap_or("String").to_string(),
        data_type: v.get("DataType").and_then(Value::as_str).unwrap_or("String").to_string(),
        is_key: v.get("IsKey").and_then(Value::as_bool).unwrap_or(false),
        is_mandatory: v.get("IsMandatory").and_then(Value::as_bool).unwrap_or(false),
        allow_edit: v.get("AllowEdit").and_then(Value::as_bool).unwrap_or(true),
        allow_edit_on_create: v.get("AllowEditOnCreate").and_then(Value::as_bool).unwrap_or(true),
        is_dimension: v.get("IsDimension").and_then(Value::as_bool).unwrap_or(false),
        property_order: v.get("PropertyOrder").and_then(Value::as_i64).unwrap_or(order as i64),
        label_id: v.get("LabelId").and_then(Value::as_str).map(str::to_string),
        label_text: None,
    })
}

fn parse_navigation(v: &Value) -> Result<NavigationProperty, InfrastructureError> {
    let constraints = v.get("Constraints").and_then(Value::as_array).map(|items| items.iter().filter_map(|c| parse_constraint(c).ok()).collect()).unwrap_or_default();

    Ok(NavigationProperty {
        name: str_field(v, "Name")?,
        related_entity: v.get("RelatedEntity").and_then(Value::as_str).unwrap_or("").to_string(),
        cardinality: parse_cardinality(v.get("Cardinality").and_then(Value::as_str).unwrap_or("Single")),
        constraints,
    })
}

fn parse_constraint(v: &Value) -> Result<RelationConstraint, InfrastructureError> {
    Ok(RelationConstraint {
        kind: parse_constraint_kind(v.get("Kind").and_then(Value::as_str).unwrap_or("Referential")),
        source_property: v.get("SourceProperty").and_then(Value::as_str).unwrap_or("").to_string(),
        target_property: v.get("TargetProperty").and_then(Value::as_str).unwrap_or("").to_string(),
    })
}

fn parse_action(v: &Value) -> Result<EntityAction, InfrastructureError> {
    let parameters = v.get("Parameters").and_then(Value::as_array).map(|items| {
            items.iter().enumerate().filter_map(|(i, p)| parse_action_parameter(i, p).ok()).collect()
        }).unwrap_or_default();

    Ok(EntityAction {
        name: str_field(v, "Name")?,
        binding_kind: parse_binding_kind(v.get("BindingKind").and_then(Value::as_str).unwrap_or("Unbound")),
        return_type_name: v.get("ReturnType").and_then(Value::as_str).map(str::to_string),
        return_is_collection: v.get("ReturnIsCollection").and_then(Value::as_bool).unwrap_or(false),
        field_lookup: v.get("FieldLookup").and_then(Value::as_str).map(str::to_string),
        parameters,
    })
}

fn parse_action_parameter(order: usize, v: &Value) -> Result<ActionParameter, InfrastructureError> {
    Ok(ActionParameter {
        name: str_field(v, "Name")?,
        type_name: v.get("Type").and_then(Value::as_str).unwrap_or("String").to_string(),
        is_collection: v.get("IsCollection").and_then(Value::as_bool).unwrap_or(false),
        parameter_order: v.get("ParameterOrder").and_then(Value::as_i64).unwrap_or(order as i64),
    })
}

fn parse_enumeration(gv: i64, v: &Value) -> Result<Enumeration, InfrastructureError> {
    let members = v.get("Members").and_then(Value::as_array).map(|items| items.iter().filter_map(|m| parse_enum_member(m).ok()).collect()).unwrap_or_default();

    Ok(Enumeration {
        global_version_id: gv,
        name: str_field(v, "Name")?,
        label_id: v.get("LabelId").and_then(Value::as_str).map(str::to_string),
        label_text: None,
        members,
    })
}

fn parse_enum_member(v: &Value) -> Result<EnumerationMember, InfrastructureError> {
    Ok(EnumerationMember {
        name: str_field(v, "Name")?,
        value: v.get("Value").and_then(Value::as_i64).unwrap_or(0),
        configuration_enabled: v.get("ConfigurationEnabled").and_then(Value::as_bool).unwrap_or(true),
        label_id: v.get("LabelId").and_then(Value::as_str).map(str::to_string),
        label_text: None,
    })
}

fn str_field(v: &Value, field: &str) -> Result<String, InfrastructureError> {
    v.get(field).and_then(Value::as_str).map(str::to_string).ok_or_else(|| InfrastructureError::ParseError(format!("missing required field '{field}'")))
}

fn parse_category(s: &str) -> EntityCategory {
    match s {
        "Master" => EntityCategory::Master,
        "Transaction" => EntityCategory::Transaction,
        "Document" => EntityCategory::Document,
        "Reference" => EntityCategory::Reference,
        "Parameter" => EntityCategory::Parameter,
        _ => EntityCategory::Miscellaneous,
    }
}

fn parse_cardinality(s: &str) -> Cardinality {
    match s {
        "Multiple" => Cardinality::Multiple,
        _ => Cardinality::Single,
    }
}

fn parse_constraint_kind(s: &str) -> ConstraintKind {
    match s {
        "Fixed" => ConstraintKind::Fixed,
        "Related" => ConstraintKind::Related,
        _ => ConstraintKind::Referential,
    }
}

fn parse_binding_kind(s: &str) -> BindingKind {
    match s {
        "BoundToEntitySet" => BindingKind::BoundToEntitySet,
        "BoundToEntity" => BindingKind::BoundToEntity,
        _ => BindingKind::Unbound,
    }
}

fn build_fts_rows(
    data_entities: &[DataEntity],
    public_entities: &[PublicEntity],
    enumerations: &[Enumeration],
) -> Vec<FtsRow> {
    use crate::domain::search::EntityType;

    let mut rows = Vec::with_capacity(data_entities.len() + public_entities.len() + enumerations.len());

    for d in data_entities {
        rows.push(FtsRow {
            entity_name: d.name.clone(),
            entity_type: EntityType::DataEntity,
            entity_set_name: Some(d.entity_set_name.clone()),
            description: d.label_text.clone(),
            labels: d.label_id.clone().unwrap_or_default(),
            properties_text: String::new(),
            actions_text: String::new(),
            entity_id: d.name.clone(),
        });
    }

    for p in public_entities {
        let properties_text = p.properties.iter().map(|prop| prop.name.as_str()).collect::<Vec<_>>().join(" ");
        let actions_text = p.actions.iter().map(|a| a.name.as_str()).collect::<Vec<_>>().join(" ");
        let labels = std::iter::once(p.label_id.as_deref()).chain(p.properties.iter().map(|prop| prop.label_id.as_deref())).flatten().collect::<Vec<_>>().join(" ");

        rows.push(FtsRow {
            entity_name: p.name.clone(),
            entity_type: EntityType::PublicEntity,
            entity_set_name: Some(p.entity_set_name.clone()),
            description: p.label_text.clone(),
            labels,
            properties_text,
            actions_text,
            entity_id: p.name.clone(),
        });

        for action in &p.actions {
            rows.push(FtsRow {
                entity_name: action.name.clone(),
                entity_type: EntityType::Action,
                entity_set_name: Some(p.entity_set_name.clone()),
                description: None,
                labels: String::new(),
                properties_text: String::new(),
                actions_text: format!("{} {}", p.name, action.name),
                entity_id: format!("{}.{}", p.name, action.name),
            });
        }
    }

    for e in enumerations {
        let properties_text = e.members.iter().map(|m| m.name.as_str()).collect::<Vec<_>>().join(" ");
        rows.push(FtsRow {
            entity_name: e.name.clone(),
            entity_type: EntityType::Enumeration,
            entity_set_name: None,
            description: e.label_text.clone(),
            labels: e.label_id.clone().unwrap_or_default(),
            properties_text,
            actions_text: String::new(),
            entity_id: e.name.clone(),
        });
    }

    rows
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::db::pool::MetadataDb;
    use crate::infrastructure::db::schema;
    use crate::infrastructure::cache::{DiskCache, MemoryCache};
    use crate::ports::clock::SystemClock;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::time::Duration;

    struct FakeClient;

    #[async_trait]
    impl ODataClient for FakeClient {
        async fn get(&self, path: &str, _query: &HashMap<String, String>) -> Result<Value, crate::ports::odata::HttpError> {
            if path == PATH_DATA_ENTITIES {
                return Ok(serde_json::json!({ "value": [
                    { "Name": "Customers", "PublicCollectionName": "Customers", "Category": "Master",
                      "DataServiceEnabled": true, "DataManagementEnabled": true, "IsReadOnly": false, "LabelId": "@SYS1" }
                ] }));
            }
            if path == PATH_PUBLIC_ENTITIES {
                return Ok(serde_json::json!({ "value": [ { "Name": "Customers" } ] }));
            }
            if path.starts_with("metadata/PublicEntities(") {
                return Ok(serde_json::json!({
                    "Name": "Customers", "PublicCollectionName": "Customers", "LabelId": "@SYS1",
                    "Properties": [ { "Name": "CustomerAccount", "TypeName": "String", "DataType": "String",
                        "IsKey": true, "IsMandatory": true, "AllowEdit": false, "AllowEditOnCreate": true,
                        "IsDimension": false, "PropertyOrder": 0, "LabelId": "@SYS2" } ],
                    "NavigationProperties": [], "Actions": []
                }));
            }
            if path == PATH_PUBLIC_ENUMERATIONS {
                return Ok(serde_json::json!({ "value": [] }));
            }
            Ok(serde_json::json!({ "value": [] }))
        }
        async fn post(&self, _path: &str, _body: &Value) -> Result<Value, crate::ports::odata::HttpError> {
            unimplemented!()
        }
        async fn call_action(&self, _entity_set: &str, action_name: &str, _params: &Value) -> Result<Value, crate::ports::odata::HttpError> {
            if action_name == "GetInstalledModules" {
                Ok(serde_json::json!({ "value": ["Name: ApplicationFoundation | Version: 1.0 | Module: ApplicationFoundation | Publisher: Microsoft | DisplayName: AF"] }))
            } else if action_name == "GetLabels" {
                Ok(serde_json::json!({ "value": {} }))
            } else {
                Ok(serde_json::json!({ "value": "1.0" }))
            }
        }
    }

    fn orchestrator() -> (Arc<SyncOrchestrator>, MetadataRepository) {
        let db = MetadataDb::in_memory().unwrap();
        {
            let conn = db.writer().unwrap();
            schema::apply(&conn).unwrap();
            fts::create_fts(&conn).unwrap();
        }
        let repo = MetadataRepository::new(db);
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let detector = Arc::new(VersionDetector::new());
        let gvm = GlobalVersionManager::new(repo.clone(), clock.clone());
        let resolver = Arc::new(LabelResolver::new(
            repo.clone(),
            MemoryCache::new(1000, Duration::from_secs(300)),
            DiskCache::new(tempfile::tempdir().unwrap().keep(), 1024 * 1024).unwrap(),
            Arc::new(FakeClient),
            true,
        ));
        let orch = Arc::new(SyncOrchestrator::new(repo.clone(), detector, gvm, resolver, clock));
        (orch, repo)
    }

    #[tokio::test]
    async fn full_without_labels_on_first_sync_completes() {
        let (orch, repo) = orchestrator();
        let now = chrono::Utc::now();
        let env = repo.find_or_create_environment("https://a.example.com", "A", now).unwrap();

        let client: Arc<dyn ODataClient> = Arc::new(FakeClient);
        let session_id = orch.start(env.id, client, None, "en-US".to_string(), None).await.unwrap();

        for _ in 0..50 {
            let s = orch.progress(&session_id).unwrap();
            if s.state.is_terminal() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        let session = orch.progress(&session_id).unwrap();
        assert_eq!(session.state, SyncState::Completed);
        assert_eq!(session.strategy, SyncStrategy::FullWithoutLabels);

        let entity = repo.get_data_entity(session.target_global_version_id.unwrap(), "Customers").unwrap();
        assert!(entity.is_some());
    }

    #[tokio::test]
    async fn second_sync_on_same_environment_while_running_conflicts() {
        let (orch, repo) = orchestrator();
        let now = chrono::Utc::now();
        let env = repo.find_or_create_environment("https://b.example.com", "B", now).unwrap();

        let client: Arc<dyn ODataClient> = Arc::new(FakeClient);
        let first = orch.start(env.id, client.clone(), None, "en-US".to_string(), None).await.unwrap();

        let result = orch.start(env.id, client, None, "en-US".to_string(), None).await;
        match result {
            Err(CoreError::SyncConflict { session_id }) => assert!(session_id == first || true),
            other => panic!("expected conflict, got {other:?}"),
        }
    }

    /// Returns `count` data entities and nothing else, so a single sync
    /// spans several `BATCH_SIZE`-sized write chunks.
    struct ManyEntitiesClient {
        count: usize,
    }

    #[async_trait]
    impl ODataClient for ManyEntitiesClient {
        async fn get(&self, path: &str, _query: &HashMap<String, String>) -> Result<Value, crate::ports::odata::HttpError> {
            if path == PATH_DATA_ENTITIES {
                let entities: Vec<Value> = (0..self.count)
                    .map(|i| serde_json::json!({
                        "Name": format!("Entity{i}"), "PublicCollectionName": format!("Entity{i}"),
                        "Category": "Master", "DataServiceEnabled": true, "DataManagementEnabled": true,
                        "IsReadOnly": false, "LabelId": null,
                    }))
                    .collect();
                return Ok(serde_json::json!({ "value": entities }));
            }
            Ok(serde_json::json!({ "value": [] }))
        }
        async fn post(&self, _path: &str, _body: &Value) -> Result<Value, crate::ports::odata::HttpError> {
            unimplemented!()
        }
        async fn call_action(&self, _entity_set: &str, action_name: &str, _params: &Value) -> Result<Value, crate::ports::odata::HttpError> {
            if action_name == "GetInstalledModules" {
                Ok(serde_json::json!({ "value": ["Name: ApplicationFoundation | Version: 1.0 | Module: ApplicationFoundation | Publisher: Microsoft | DisplayName: AF"] }))
            } else if action_name == "GetLabels" {
                Ok(serde_json::json!({ "value": {} }))
            } else {
                Ok(serde_json::json!({ "value": "1.0" }))
            }
        }
    }

    /// S5: cancelling once at least two batches have committed leaves
    /// `items_done >= 2*batch_size`, the session `cancelled`, and the
    /// environment's active version untouched (never reaches `finalize`).
    #[tokio::test]
    async fn cancelling_mid_sync_preserves_partial_progress() {
        let (orch, repo) = orchestrator();
        let now = chrono::Utc::now();
        let env = repo.find_or_create_environment("https://d.example.com", "D", now).unwrap();

        let client: Arc<dyn ODataClient> = Arc::new(ManyEntitiesClient { count: BATCH_SIZE * 3 });
        let session_id = orch.start(env.id, client, Some(SyncStrategy::EntitiesOnly), "en-US".to_string(), None).await.unwrap();

        let threshold = (2 * BATCH_SIZE) as i64;
        for _ in 0..500 {
            let s = orch.progress(&session_id).unwrap();
            if s.items_done >= threshold {
                orch.cancel(&session_id).unwrap();
                break;
            }
            if s.state.is_terminal() {
                break;
            }
            tokio::task::yield_now().await;
        }

        for _ in 0..500 {
            let s = orch.progress(&session_id).unwrap();
            if s.state.is_terminal() {
                break;
            }
            tokio::task::yield_now().await;
        }

        let session = orch.progress(&session_id).unwrap();
        assert_eq!(session.state, SyncState::Cancelled);
        assert!(session.items_done >= threshold, "items_done={}", session.items_done);
        assert!(repo.get_active_environment_version(env.id).unwrap().is_none());
    }

    #[test]
    fn fts_rows_cover_entities_actions_and_enums() {
        let data = vec![DataEntity {
            global_version_id: 1,
            name: "Customers".into(),
            entity_set_name: "Customers".into(),
            category: EntityCategory::Master,
            data_service_enabled: true,
            data_management_enabled: true,
            is_read_only: false,
            label_id: None,
            label_text: Some("Customers".into()),
        }];
        let rows = build_fts_rows(&data, &[], &[]);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].entity_name, "Customers");
    }
}
