// d365fo-cache-core/src/infrastructure/db/repository.rs
//
// Indexed queries and atomic writes over the schema in `schema.rs`. Every
// multi-row write used by one sync strategy step happens inside a single
// transaction, batched at <=500 rows to amortize fsync cost. Pure SQL +
// rusqlite here; the async application layer wraps these calls in
// `tokio::task::spawn_blocking`.

use crate::domain::environment::{Environment, EnvironmentVersion, SyncStatus};
use crate::domain::label::Label;
use crate::domain::metadata::{
    ActionParameter, BindingKind, Cardinality, ConstraintKind, DataEntity, EntityAction,
    EntityCategory, EntityProperty, Enumeration, EnumerationMember, NavigationProperty,
    PublicEntity, RelationConstraint,
};
use crate::domain::sync::{SyncSession, SyncState, SyncStrategy};
use crate::domain::version::{GlobalVersion, Module};
use crate::infrastructure::db::pool::MetadataDb;
use crate::infrastructure::error::InfrastructureError;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::HashMap;

pub const BATCH_SIZE: usize = 500;
pub const MODULE_SAMPLE_SIZE: usize = 10;

#[derive(Clone)]
pub struct MetadataRepository {
    db: MetadataDb,
}

impl MetadataRepository {
    pub fn new(db: MetadataDb) -> Self {
        MetadataRepository { db }
    }

    // --- ENVIRONMENTS ---

    pub fn find_or_create_environment(
        &self,
        base_url: &str,
        display_name: &str,
        now: DateTime<Utc>,
    ) -> Result<Environment, InfrastructureError> {
        let canonical = Environment::canonicalize_base_url(base_url);
        let conn = self.db.writer()?;
        if let Some(env) = find_environment(&conn, &canonical)? {
            return Ok(env);
        }
        conn.execute(
            "INSERT INTO environments (base_url, display_name, created_at, last_sync_at)
             VALUES (?1, ?2, ?3, NULL)",
            params![canonical, display_name, now.to_rfc3339()],
        )?;
        let id = conn.last_insert_rowid();
        Ok(Environment {
            id,
            base_url: canonical,
            display_name: display_name.to_string(),
            created_at: now,
            last_sync_at: None,
        })
    }

    pub fn get_environment(&self, id: i64) -> Result<Option<Environment>, InfrastructureError> {
        let conn = self.db.reader()?;
        Ok(get_environment(&conn, id)?)
    }

    pub fn touch_last_sync(&self, environment_id: i64, now: DateTime<Utc>) -> Result<(), InfrastructureError> {
        let conn = self.db.writer()?;
        conn.execute(
            "UPDATE environments SET last_sync_at = ?1 WHERE id = ?2",
            params![now.to_rfc3339(), environment_id],
        )?;
        Ok(())
    }

    // --- GLOBAL VERSIONS ---

    pub fn find_global_version_by_hash(
        &self,
        modules_hash: &str,
    ) -> Result<Option<GlobalVersion>, InfrastructureError> {
        let conn = self.db.reader()?;
        Ok(find_global_version(&conn, modules_hash)?)
    }

    /// `GetOrCreateGlobalVersion`: transactional find-by-hash;
    /// on miss, insert plus up to `MODULE_SAMPLE_SIZE` sample modules.
    pub fn get_or_create_global_version(
        &self,
        modules_hash: &str,
        version_hash: &str,
        created_by_environment_id: i64,
        sample_modules: &[Module],
        now: DateTime<Utc>,
        application_version: Option<&str>,
        platform_build_version: Option<&str>,
    ) -> Result<(GlobalVersion, bool), InfrastructureError> {
        let conn = self.db.writer()?;
        let tx = conn.unchecked_transaction()?;

        if let Some(existing) = find_global_version(&tx, modules_hash)? {
            tx.commit()?;
            return Ok((existing, false));
        }

        tx.execute(
            "INSERT INTO global_versions
                (version_hash, modules_hash, first_seen_at, last_used_at, reference_count,
                 created_by_environment_id, application_version, platform_build_version)
             VALUES (?1, ?2, ?3, ?3, 0, ?4, ?5, ?6)",
            params![
                version_hash,
                modules_hash,
                now.to_rfc3339(),
                created_by_environment_id,
                application_version,
                platform_build_version
            ],
        )?;
        let id = tx.last_insert_rowid();

        for m in sample_modules.iter().take(MODULE_SAMPLE_SIZE) {
            tx.execute(
                "INSERT OR REPLACE INTO modules
                    (global_version_id, module_id, name, version, publisher, display_name, sort_order)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![id, m.module_id, m.name, m.version, m.publisher, m.display_name, m.sort_order],
            )?;
        }

        let created = GlobalVersion {
            id,
            version_hash: version_hash.to_string(),
            modules_hash: modules_hash.to_string(),
            first_seen_at: now,
            last_used_at: now,
            reference_count: 0,
            created_by_environment_id,
            application_version: application_version.map(str::to_string),
            platform_build_version: platform_build_version.map(str::to_string),
        };
        tx.commit()?;
        Ok((created, true))
    }

    /// `LinkEnvironmentToVersion`: deactivate any prior active
    /// link, insert the new one, bump `reference_count`/`last_used_at` — all
    /// in one transaction.
    pub fn link_environment_to_version(
        &self,
        environment_id: i64,
        global_version_id: i64,
        now: DateTime<Utc>,
    ) -> Result<(), InfrastructureError> {
        let conn = self.db.writer()?;
        let tx = conn.unchecked_transaction()?;

        tx.execute(
            "UPDATE environment_versions SET is_active = 0
             WHERE environment_id = ?1 AND is_active = 1",
            params![environment_id],
        )?;
        tx.execute(
            "INSERT INTO environment_versions
                (environment_id, global_version_id, detected_at, is_active, sync_status, last_sync_duration_ms)
             VALUES (?1, ?2, ?3, 1, 'pending', NULL)
             ON CONFLICT(environment_id, global_version_id)
             DO UPDATE SET is_active = 1, detected_at = excluded.detected_at, sync_status = 'pending'",
            params![environment_id, global_version_id, now.to_rfc3339()],
        )?;
        tx.execute(
            "UPDATE global_versions
             SET reference_count = reference_count + 1, last_used_at = ?2
             WHERE id = ?1",
            params![global_version_id, now.to_rfc3339()],
        )?;

        tx.commit()?;
        Ok(())
    }

    pub fn set_environment_version_status(
        &self,
        environment_id: i64,
        global_version_id: i64,
        status: SyncStatus,
        last_sync_duration_ms: Option<i64>,
    ) -> Result<(), InfrastructureError> {
        let conn = self.db.writer()?;
        conn.execute(
            "UPDATE environment_versions
             SET sync_status = ?3, last_sync_duration_ms = COALESCE(?4, last_sync_duration_ms)
             WHERE environment_id = ?1 AND global_version_id = ?2",
            params![
                environment_id,
                global_version_id,
                sync_status_str(status),
                last_sync_duration_ms
            ],
        )?;
        Ok(())
    }

    pub fn get_active_environment_version(
        &self,
        environment_id: i64,
    ) -> Result<Option<EnvironmentVersion>, InfrastructureError> {
        let conn = self.db.reader()?;
        Ok(conn.query_row(
                "SELECT environment_id, global_version_id, detected_at, is_active,
                        sync_status, last_sync_duration_ms
                 FROM environment_versions WHERE environment_id = ?1 AND is_active = 1",
                params![environment_id],
                row_to_environment_version,
            ).optional()?)
    }

    /// Whether any *other* environment already has a `completed` sync for
    /// this global version (feeds the `sharing_mode` strategy decision).
    pub fn has_completed_sync_for_version(
        &self,
        global_version_id: i64,
    ) -> Result<bool, InfrastructureError> {
        let conn = self.db.reader()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM environment_versions
             WHERE global_version_id = ?1 AND sync_status = 'completed'",
            params![global_version_id],
            |r| r.get(0),
        )?;
        Ok(count > 0)
    }

    pub fn module_ids_for_version(&self, global_version_id: i64) -> Result<Vec<String>, InfrastructureError> {
        let conn = self.db.reader()?;
        let mut stmt = conn.prepare("SELECT module_id FROM modules WHERE global_version_id = ?1")?;
        let rows = stmt.query_map(params![global_version_id], |r| r.get(0))?;
        Ok(rows.collect::<rusqlite::Result<Vec<String>>>()?)
    }

    /// `CleanupUnusedVersions`: deletes versions with
    /// `reference_count=0 AND last_used_at < now - retention`, cascading
    /// metadata rows via `ON DELETE CASCADE`, plus their FTS rows (the
    /// virtual table has no FK of its own).
    pub fn cleanup_unused_versions(
        &self,
        retention: chrono::Duration,
        now: DateTime<Utc>,
    ) -> Result<usize, InfrastructureError> {
        let cutoff = now - retention;
        let conn = self.db.writer()?;
        let tx = conn.unchecked_transaction()?;

        let ids: Vec<i64> = {
            let mut stmt = tx.prepare(
                "SELECT id FROM global_versions WHERE reference_count = 0 AND last_used_at < ?1",
            )?;
            let rows = stmt.query_map(params![cutoff.to_rfc3339()], |r| r.get(0))?;
            rows.collect::<rusqlite::Result<Vec<i64>>>()?
        };

        for id in &ids {
            tx.execute(
                &format!("DELETE FROM {} WHERE global_version_id = ?1", crate::infrastructure::db::fts::FTS_TABLE),
                params![id],
            )?;
            tx.execute("DELETE FROM global_versions WHERE id = ?1", params![id])?;
        }

        tx.commit()?;
        Ok(ids.len())
    }

    // --- METADATA WRITES (batched) ---

    pub fn write_data_entities(&self, rows: &[DataEntity]) -> Result<(), InfrastructureError> {
        for chunk in rows.chunks(BATCH_SIZE) {
            let conn = self.db.writer()?;
            let tx = conn.unchecked_transaction()?;
            for e in chunk {
                tx.execute(
                    "INSERT OR REPLACE INTO data_entities
                        (global_version_id, name, entity_set_name, category, data_service_enabled,
                         data_management_enabled, is_read_only, label_id)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                    params![
                        e.global_version_id,
                        e.name,
                        e.entity_set_name,
                        category_str(e.category),
                        e.data_service_enabled,
                        e.data_management_enabled,
                        e.is_read_only,
                        e.label_id,
                    ],
                )?;
            }
            tx.commit()?;
        }
        Ok(())
    }

    pub fn write_public_entities(&self, rows: &[PublicEntity]) -> Result<(), InfrastructureError> {
        for chunk in rows.chunks(BATCH_SIZE) {
            let conn = self.db.writer()?;
            let tx = conn.unchecked_transaction()?;
            for e in chunk {
                tx.execute(
                    "INSERT OR REPLACE INTO public_entities
                        (global_version_id, name, entity_set_name, label_id)
                     VALUES (?1, ?2, ?3, ?4)",
                    params![e.global_version_id, e.name, e.entity_set_name, e.label_id],
                )?;

                for p in &e.properties {
                    tx.execute(
                        "INSERT OR REPLACE INTO entity_properties
                            (global_version_id, entity_name, name, type_name, data_type, is_key,
                             is_mandatory, allow_edit, allow_edit_on_create, is_dimension,
                             property_order, label_id)
                         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
                        params![
                            e.global_version_id, e.name, p.name, p.type_name, p.data_type, p.is_key,
                            p.is_mandatory, p.allow_edit, p.allow_edit_on_create, p.is_dimension,
                            p.property_order, p.label_id,
                        ],
                    )?;
                }

                for n in &e.navigation_properties {
                    tx.execute(
                        "INSERT OR REPLACE INTO navigation_properties
                            (global_version_id, entity_name, name, related_entity, cardinality)
                         VALUES (?1, ?2, ?3, ?4, ?5)",
                        params![
                            e.global_version_id, e.name, n.name, n.related_entity,
                            cardinality_str(n.cardinality),
                        ],
                    )?;
                    for c in &n.constraints {
                        tx.execute(
                            "INSERT INTO relation_constraints
                                (global_version_id, entity_name, navigation_name, kind,
                                 source_property, target_property)
                             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                            params![
                                e.global_version_id, e.name, n.name, constraint_kind_str(c.kind),
                                c.source_property, c.target_property,
                            ],
                        )?;
                    }
                }

                for a in &e.actions {
                    write_action(&tx, e.global_version_id, &e.name, a)?;
                }
            }
            tx.commit()?;
        }
        Ok(())
    }

    pub fn write_enumerations(&self, rows: &[Enumeration]) -> Result<(), InfrastructureError> {
        for chunk in rows.chunks(BATCH_SIZE) {
            let conn = self.db.writer()?;
            let tx = conn.unchecked_transaction()?;
            for e in chunk {
                tx.execute(
                    "INSERT OR REPLACE INTO enumerations (global_version_id, name, label_id)
                     VALUES (?1, ?2, ?3)",
                    params![e.global_version_id, e.name, e.label_id],
                )?;
                for m in &e.members {
                    tx.execute(
                        "INSERT OR REPLACE INTO enumeration_members
                            (global_version_id, enum_name, name, value, configuration_enabled, label_id)
                         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                        params![e.global_version_id, e.name, m.name, m.value, m.configuration_enabled, m.label_id],
                    )?;
                }
            }
            tx.commit()?;
        }
        Ok(())
    }

    pub fn write_labels(&self, rows: &[Label]) -> Result<(), InfrastructureError> {
        for chunk in rows.chunks(BATCH_SIZE.min(50)) {
            let conn = self.db.writer()?;
            let tx = conn.unchecked_transaction()?;
            for l in chunk {
                tx.execute(
                    "INSERT OR REPLACE INTO labels
                        (global_version_id, label_id, language, label_text, expires_at)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                    params![
                        l.global_version_id, l.label_id, l.language, l.label_text,
                        l.expires_at.map(|t| t.to_rfc3339()),
                    ],
                )?;
            }
            tx.commit()?;
        }
        Ok(())
    }

    // --- METADATA READS ---

    pub fn get_data_entity(&self, global_version_id: i64, name: &str) -> Result<Option<DataEntity>, InfrastructureError> {
        let conn = self.db.reader()?;
        Ok(conn.query_row(
                "SELECT global_version_id, name, entity_set_name, category, data_service_enabled,
                        data_management_enabled, is_read_only, label_id
                 FROM data_entities WHERE global_version_id = ?1 AND name = ?2",
                params![global_version_id, name],
                row_to_data_entity,
            ).optional()?)
    }

    pub fn get_public_entity(&self, global_version_id: i64, name: &str) -> Result<Option<PublicEntity>, InfrastructureError> {
        let conn = self.db.reader()?;
        let base = conn.query_row(
                "SELECT global_version_id, name, entity_set_name, label_id
                 FROM public_entities WHERE global_version_id = ?1 AND name = ?2",
                params![global_version_id, name],
                |r| Ok((r.get::<_, i64>(0)?, r.get::<_, String>(1)?, r.get::<_, String>(2)?, r.get::<_, Option<String>>(3)?)),
            ).optional()?;
        let Some((gv, name, entity_set_name, label_id)) = base else {
            return Ok(None);
        };

        let properties = read_properties(&conn, gv, &name)?;
        let navigation_properties = read_navigations(&conn, gv, &name)?;
        let actions = read_actions(&conn, gv, &name)?;

        Ok(Some(PublicEntity {
            global_version_id: gv,
            name,
            entity_set_name,
            label_id,
            label_text: None,
            properties,
            navigation_properties,
            actions,
        }))
    }

    pub fn list_data_entities(
        &self,
        global_version_id: i64,
        category: Option<EntityCategory>,
        is_read_only: Option<bool>,
        limit: usize,
        offset: usize,
    ) -> Result<(Vec<DataEntity>, u64), InfrastructureError> {
        let conn = self.db.reader()?;
        let mut sql = String::from(
            "SELECT global_version_id, name, entity_set_name, category, data_service_enabled,
                    data_management_enabled, is_read_only, label_id
             FROM data_entities WHERE global_version_id = ?1",
        );
        if let Some(c) = category {
            sql.push_str(&format!(" AND category = '{}'", category_str(c)));
        }
        if let Some(ro) = is_read_only {
            sql.push_str(&format!(" AND is_read_only = {}", ro as i64));
        }
        let count_sql = format!("SELECT COUNT(*) FROM ({sql})");
        let total: i64 = conn.query_row(&count_sql, params![global_version_id], |r| r.get(0))?;

        sql.push_str(" ORDER BY name LIMIT ?2 OFFSET ?3");
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params![global_version_id, limit as i64, offset as i64], row_to_data_entity)?;
        Ok((rows.collect::<rusqlite::Result<Vec<_>>>()?, total as u64))
    }

    pub fn get_enumeration(&self, global_version_id: i64, name: &str) -> Result<Option<Enumeration>, InfrastructureError> {
        let conn = self.db.reader()?;
        let label_id: Option<Option<String>> = conn.query_row(
                "SELECT label_id FROM enumerations WHERE global_version_id = ?1 AND name = ?2",
                params![global_version_id, name],
                |r| r.get(0),
            ).optional()?;
        let Some(label_id) = label_id else {
            return Ok(None);
        };

        let mut stmt = conn.prepare(
            "SELECT name, value, configuration_enabled, label_id
             FROM enumeration_members WHERE global_version_id = ?1 AND enum_name = ?2
             ORDER BY value",
        )?;
        let members = stmt.query_map(params![global_version_id, name], |r| {
                Ok(EnumerationMember {
                    name: r.get(0)?,
                    value: r.get(1)?,
                    configuration_enabled: r.get(2)?,
                    label_id: r.get(3)?,
                    label_text: None,
                })
            })?.collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(Some(Enumeration {
            global_version_id,
            name: name.to_string(),
            label_id,
            label_text: None,
            members,
        }))
    }

    pub fn get_actions(
        &self,
        global_version_id: i64,
        entity_name: Option<&str>,
        binding_kind: Option<BindingKind>,
        name_pattern: Option<&str>,
        limit: usize,
        offset: usize,
    ) -> Result<(Vec<(String, EntityAction)>, u64), InfrastructureError> {
        let conn = self.db.reader()?;
        let mut sql = String::from(
            "SELECT owner_name, name, binding_kind, return_type_name, return_is_collection, field_lookup
             FROM entity_actions WHERE global_version_id = ?1",
        );
        if let Some(en) = entity_name {
            sql.push_str(&format!(" AND owner_name = '{}'", en.replace('\'', "''")));
        }
        if let Some(bk) = binding_kind {
            sql.push_str(&format!(" AND binding_kind = '{}'", binding_kind_str(bk)));
        }
        if let Some(pat) = name_pattern {
            sql.push_str(&format!(" AND name LIKE '%{}%'", pat.replace('\'', "''")));
        }
        let count_sql = format!("SELECT COUNT(*) FROM ({sql})");
        let total: i64 = conn.query_row(&count_sql, params![global_version_id], |r| r.get(0))?;

        sql.push_str(" ORDER BY owner_name, name LIMIT ?2 OFFSET ?3");
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params![global_version_id, limit as i64, offset as i64], |r| {
            let owner: String = r.get(0)?;
            let name: String = r.get(1)?;
            let binding: String = r.get(2)?;
            Ok((
                owner,
                EntityAction {
                    name,
                    binding_kind: parse_binding_kind(&binding),
                    return_type_name: r.get(3)?,
                    return_is_collection: r.get(4)?,
                    field_lookup: r.get(5)?,
                    parameters: Vec::new(),
                },
            ))
        })?;
        let mut out = rows.collect::<rusqlite::Result<Vec<_>>>()?;
        for (owner, action) in out.iter_mut() {
            action.parameters = read_action_parameters(&conn, global_version_id, owner, &action.name)?;
        }
        Ok((out, total as u64))
    }

    pub fn get_label(
        &self,
        global_version_id: i64,
        label_id: &str,
        language: &str,
    ) -> Result<Option<String>, InfrastructureError> {
        let conn = self.db.reader()?;
        Ok(conn.query_row(
                "SELECT label_text FROM labels WHERE global_version_id = ?1 AND label_id = ?2 AND language = ?3",
                params![global_version_id, label_id, language],
                |r| r.get(0),
            ).optional()?)
    }

    pub fn get_labels_batch(
        &self,
        global_version_id: i64,
        ids: &[String],
        language: &str,
    ) -> Result<HashMap<String, String>, InfrastructureError> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }
        let conn = self.db.reader()?;
        let placeholders: Vec<String> = (0..ids.len()).map(|i| format!("?{}", i + 3)).collect();
        let sql = format!(
            "SELECT label_id, label_text FROM labels
             WHERE global_version_id = ?1 AND language = ?2 AND label_id IN ({})",
            placeholders.join(",")
        );
        let mut stmt = conn.prepare(&sql)?;
        let mut params_vec: Vec<&dyn rusqlite::ToSql> = vec![&global_version_id, &language];
        for id in ids {
            params_vec.push(id);
        }
        let rows = stmt.query_map(params_vec.as_slice(), |r| Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?)))?;
        let mut out = HashMap::new();
        for row in rows {
            let (id, text) = row?;
            out.insert(id, text);
        }
        Ok(out)
    }

    pub fn get_global_version(&self, id: i64) -> Result<Option<GlobalVersion>, InfrastructureError> {
        let conn = self.db.reader()?;
        Ok(conn.query_row(
                "SELECT id, version_hash, modules_hash, first_seen_at, last_used_at, reference_count,
                        created_by_environment_id, application_version, platform_build_version
                 FROM global_versions WHERE id = ?1",
                params![id],
                row_to_global_version,
            ).optional()?)
    }

    pub fn counts_for_version(&self, global_version_id: i64) -> Result<(u64, u64, u64, u64), InfrastructureError> {
        let conn = self.db.reader()?;
        let entities: i64 = conn.query_row(
            "SELECT COUNT(*) FROM public_entities WHERE global_version_id = ?1",
            params![global_version_id],
            |r| r.get(0),
        )?;
        let actions: i64 = conn.query_row(
            "SELECT COUNT(*) FROM entity_actions WHERE global_version_id = ?1",
            params![global_version_id],
            |r| r.get(0),
        )?;
        let enums: i64 = conn.query_row(
            "SELECT COUNT(*) FROM enumerations WHERE global_version_id = ?1",
            params![global_version_id],
            |r| r.get(0),
        )?;
        let labels: i64 = conn.query_row(
            "SELECT COUNT(*) FROM labels WHERE global_version_id = ?1",
            params![global_version_id],
            |r| r.get(0),
        )?;
        Ok((entities as u64, actions as u64, enums as u64, labels as u64))
    }

    // --- SYNC SESSIONS ---

    pub fn create_sync_session(&self, session: &SyncSession) -> Result<(), InfrastructureError> {
        let conn = self.db.writer()?;
        conn.execute(
            "INSERT INTO sync_sessions
                (session_id, environment_id, target_global_version_id, strategy, state,
                 started_at, finished_at, phase, items_total, items_done, errors_count, error_messages_json)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            params![
                session.session_id,
                session.environment_id,
                session.target_global_version_id,
                strategy_str(session.strategy),
                state_str(session.state),
                session.started_at.to_rfc3339(),
                session.finished_at.map(|t| t.to_rfc3339()),
                session.phase,
                session.items_total,
                session.items_done,
                session.errors_count,
                serde_json::to_string(&session.error_messages)?,
            ],
        )?;
        Ok(())
    }

    pub fn update_sync_session(&self, session: &SyncSession) -> Result<(), InfrastructureError> {
        let conn = self.db.writer()?;
        conn.execute(
            "UPDATE sync_sessions SET
                target_global_version_id = ?2, strategy = ?3, state = ?4, finished_at = ?5,
                phase = ?6, items_total = ?7, items_done = ?8, errors_count = ?9, error_messages_json = ?10
             WHERE session_id = ?1",
            params![
                session.session_id,
                session.target_global_version_id,
                strategy_str(session.strategy),
                state_str(session.state),
                session.finished_at.map(|t| t.to_rfc3339()),
                session.phase,
                session.items_total,
                session.items_done,
                session.errors_count,
                serde_json::to_string(&session.error_messages)?,
            ],
        )?;
        Ok(())
    }

    pub fn get_sync_session(&self, session_id: &str) -> Result<Option<SyncSession>, InfrastructureError> {
        let conn = self.db.reader()?;
        Ok(conn.query_row(
                "SELECT session_id, environment_id, target_global_version_id, strategy, state,
                        started_at, finished_at, phase, items_total, items_done, errors_count, error_messages_json
                 FROM sync_sessions WHERE session_id = ?1",
                params![session_id],
                row_to_sync_session,
            ).optional()?)
    }

    pub fn has_running_session(&self, environment_id: i64) -> Result<bool, InfrastructureError> {
        let conn = self.db.reader()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM sync_sessions
             WHERE environment_id = ?1 AND state IN ('running', 'cancelling')",
            params![environment_id],
            |r| r.get(0),
        )?;
        Ok(count > 0)
    }

    pub fn list_sync_sessions(&self, state: Option<SyncState>) -> Result<Vec<SyncSession>, InfrastructureError> {
        let conn = self.db.reader()?;
        let sql = match state {
            Some(s) => format!(
                "SELECT session_id, environment_id, target_global_version_id, strategy, state,
                        started_at, finished_at, phase, items_total, items_done, errors_count, error_messages_json
                 FROM sync_sessions WHERE state = '{}' ORDER BY started_at DESC",
                state_str(s)
            ),
            None => "SELECT session_id, environment_id, target_global_version_id, strategy, state,
                        started_at, finished_at, phase, items_total, items_done, errors_count, error_messages_json
                 FROM sync_sessions ORDER BY started_at DESC".to_string(),
        };
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map([], row_to_sync_session)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    pub fn get_sync_history(&self, limit: usize, environment_id: Option<i64>) -> Result<Vec<SyncSession>, InfrastructureError> {
        let conn = self.db.reader()?;
        let sql = match environment_id {
            Some(_) => "SELECT session_id, environment_id, target_global_version_id, strategy, state,
                        started_at, finished_at, phase, items_total, items_done, errors_count, error_messages_json
                 FROM sync_sessions WHERE environment_id = ?1 ORDER BY started_at DESC LIMIT ?2".to_string(),
            None => "SELECT session_id, environment_id, target_global_version_id, strategy, state,
                        started_at, finished_at, phase, items_total, items_done, errors_count, error_messages_json
                 FROM sync_sessions ORDER BY started_at DESC LIMIT ?2".to_string(),
        };
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params![environment_id.unwrap_or(0), limit as i64], row_to_sync_session)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    pub fn db(&self) -> &MetadataDb {
        &self.db
    }
}

fn write_action(tx: &rusqlite::Transaction, gv: i64, owner: &str, a: &EntityAction) -> rusqlite::Result<()> {
    tx.execute(
        "INSERT OR REPLACE INTO entity_actions
            (global_version_id, owner_name, name, binding_kind, return_type_name, return_is_collection, field_lookup)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![gv, owner, a.name, binding_kind_str(a.binding_kind), a.return_type_name, a.return_is_collection, a.field_lookup],
    )?;
    for p in &a.parameters {
        tx.execute(
            "INSERT INTO action_parameters
                (global_version_id, owner_name, action_name, name, type_name, is_collection, parameter_order)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![gv, owner, a.name, p.name, p.type_name, p.is_collection, p.parameter_order],
        )?;
    }
    Ok(())
}

fn read_properties(conn: &Connection, gv: i64, entity_name: &str) -> rusqlite::Result<Vec<EntityProperty>> {
    let mut stmt = conn.prepare(
        "SELECT name, type_name, data_type, is_key, is_mandatory, allow_edit, allow_edit_on_create,
                is_dimension, property_order, label_id
         FROM entity_properties WHERE global_version_id = ?1 AND entity_name = ?2 ORDER BY property_order",
    )?;
    let rows = stmt.query_map(params![gv, entity_name], |r| {
        Ok(EntityProperty {
            name: r.get(0)?,
            type_name: r.get(1)?,
            data_type: r.get(2)?,
            is_key: r.get(3)?,
            is_mandatory: r.get(4)?,
            allow_edit: r.get(5)?,
            allow_edit_on_create: r.get(6)?,
            is_dimension: r.get(7)?,
            property_order: r.get(8)?,
            label_id: r.get(9)?,
            label_text: None,
        })
    })?;
    rows.collect()
}

fn read_navigations(conn: &Connection, gv: i64, entity_name: &str) -> rusqlite::Result<Vec<NavigationProperty>> {
    let mut stmt = conn.prepare(
        "SELECT name, related_entity, cardinality FROM navigation_properties
         WHERE global_version_id = ?1 AND entity_name = ?2",
    )?;
    let navs = stmt.query_map(params![gv, entity_name], |r| {
        let name: String = r.get(0)?;
        let related_entity: String = r.get(1)?;
        let cardinality: String = r.get(2)?;
        Ok((name, related_entity, cardinality))
    })?;
    let mut out = Vec::new();
    for nav in navs {
        let (name, related_entity, cardinality) = nav?;
        let constraints = read_constraints(conn, gv, entity_name, &name)?;
        out.push(NavigationProperty {
            name,
            related_entity,
            cardinality: parse_cardinality(&cardinality),
            constraints,
        });
    }
    Ok(out)
}

fn read_constraints(conn: &Connection, gv: i64, entity_name: &str, nav_name: &str) -> rusqlite::Result<Vec<RelationConstraint>> {
    let mut stmt = conn.prepare(
        "SELECT kind, source_property, target_property FROM relation_constraints
         WHERE global_version_id = ?1 AND entity_name = ?2 AND navigation_name = ?3",
    )?;
    let rows = stmt.query_map(params![gv, entity_name, nav_name], |r| {
        let kind: String = r.get(0)?;
        Ok(RelationConstraint {
            kind: parse_constraint_kind(&kind),
            source_property: r.get(1)?,
            target_property: r.get(2)?,
        })
    })?;
    rows.collect()
}

fn read_actions(conn: &Connection, gv: i64, owner_name: &str) -> rusqlite::Result<Vec<EntityAction>> {
    let mut stmt = conn.prepare(
        "SELECT name, binding_kind, return_type_name, return_is_collection, field_lookup
         FROM entity_actions WHERE global_version_id = ?1 AND owner_name = ?2",
    )?;
    let names = stmt.query_map(params![gv, owner_name], |r| {
        let name: String = r.get(0)?;
        let binding: String = r.get(1)?;
        Ok(EntityAction {
            name,
            binding_kind: parse_binding_kind(&binding),
            return_type_name: r.get(2)?,
            return_is_collection: r.get(3)?,
            field_lookup: r.get(4)?,
            parameters: Vec::new(),
        })
    })?;
    let mut out = Vec::new();
    for action in names {
        let mut action = action?;
        action.parameters = read_action_parameters(conn, gv, owner_name, &action.name)?;
        out.push(action);
    }
    Ok(out)
}

fn read_action_parameters(conn: &Connection, gv: i64, owner_name: &str, action_name: &str) -> rusqlite::Result<Vec<ActionParameter>> {
    let mut stmt = conn.prepare(
        "SELECT name, type_name, is_collection, parameter_order FROM action_parameters
         WHERE global_version_id = ?1 AND owner_name = ?2 AND action_name = ?3 ORDER BY parameter_order",
    )?;
    let rows = stmt.query_map(params![gv, owner_name, action_name], |r| {
        Ok(ActionParameter {
            name: r.get(0)?,
            type_name: r.get(1)?,
            is_collection: r.get(2)?,
            parameter_order: r.get(3)?,
        })
    })?;
    rows.collect()
}

fn find_environment(conn: &Connection, base_url: &str) -> rusqlite::Result<Option<Environment>> {
    conn.query_row(
        "SELECT id, base_url, display_name, created_at, last_sync_at FROM environments WHERE base_url = ?1",
        params![base_url],
        row_to_environment,
    ).optional()
}

fn get_environment(conn: &Connection, id: i64) -> rusqlite::Result<Option<Environment>> {
    conn.query_row(
        "SELECT id, base_url, display_name, created_at, last_sync_at FROM environments WHERE id = ?1",
        params![id],
        row_to_environment,
    ).optional()
}

fn find_global_version(conn: &Connection, modules_hash: &str) -> rusqlite::Result<Option<GlobalVersion>> {
    conn.query_row(
        "SELECT id, version_hash, modules_hash, first_seen_at, last_used_at, reference_count,
                created_by_environment_id, application_version, platform_build_version
         FROM global_versions WHERE modules_hash = ?1",
        params![modules_hash],
        row_to_global_version,
    ).optional()
}

fn row_to_environment(r: &rusqlite::Row) -> rusqlite::Result<Environment> {
    let created_at: String = r.get(3)?;
    let last_sync_at: Option<String> = r.get(4)?;
    Ok(Environment {
        id: r.get(0)?,
        base_url: r.get(1)?,
        display_name: r.get(2)?,
        created_at: parse_dt(&created_at),
        last_sync_at: last_sync_at.map(|s| parse_dt(&s)),
    })
}

fn row_to_global_version(r: &rusqlite::Row) -> rusqlite::Result<GlobalVersion> {
    let first_seen: String = r.get(3)?;
    let last_used: String = r.get(4)?;
    Ok(GlobalVersion {
        id: r.get(0)?,
        version_hash: r.get(1)?,
        modules_hash: r.get(2)?,
        first_seen_at: parse_dt(&first_seen),
        last_used_at: parse_dt(&last_used),
        reference_count: r.get(5)?,
        created_by_environment_id: r.get(6)?,
        application_version: r.get(7)?,
        platform_build_version: r.get(8)?,
    })
}

fn row_to_data_entity(r: &rusqlite::Row) -> rusqlite::Result<DataEntity> {
    let category: String = r.get(3)?;
    Ok(DataEntity {
        global_version_id: r.get(0)?,
        name: r.get(1)?,
        entity_set_name: r.get(2)?,
        category: parse_category(&category),
        data_service_enabled: r.get(4)?,
        data_management_enabled: r.get(5)?,
        is_read_only: r.get(6)?,
        label_id: r.get(7)?,
        label_text: None,
    })
}

fn row_to_environment_version(r: &rusqlite::Row) -> rusqlite::Result<EnvironmentVersion> {
    let detected_at: String = r.get(2)?;
    let sync_status: String = r.get(4)?;
    Ok(EnvironmentVersion {
        environment_id: r.get(0)?,
        global_version_id: r.get(1)?,
        detected_at: parse_dt(&detected_at),
        is_active: r.get(3)?,
        sync_status: parse_sync_status(&sync_status),
        last_sync_duration_ms: r.get(5)?,
    })
}

fn row_to_sync_session(r: &rusqlite::Row) -> rusqlite::Result<SyncSession> {
    let strategy: String = r.get(3)?;
    let state: String = r.get(4)?;
    let started_at: String = r.get(5)?;
    let finished_at: Option<String> = r.get(6)?;
    let error_messages_json: String = r.get(11)?;
    Ok(SyncSession {
        session_id: r.get(0)?,
        environment_id: r.get(1)?,
        target_global_version_id: r.get(2)?,
        strategy: parse_strategy(&strategy),
        state: parse_state(&state),
        started_at: parse_dt(&started_at),
        finished_at: finished_at.map(|s| parse_dt(&s)),
        phase: r.get(7)?,
        items_total: r.get(8)?,
        items_done: r.get(9)?,
        errors_count: r.get(10)?,
        error_messages: serde_json::from_str(&error_messages_json).unwrap_or_default(),
    })
}

fn parse_dt(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s).map(|d| d.with_timezone(&Utc)).unwrap_or_else(|_| Utc::now())
}

fn category_str(c: EntityCategory) -> &'static str {
    match c {
        EntityCategory::Master => "master",
        EntityCategory::Transaction => "transaction",
        EntityCategory::Document => "document",
        EntityCategory::Reference => "reference",
        EntityCategory::Parameter => "parameter",
        EntityCategory::Miscellaneous => "miscellaneous",
    }
}

fn parse_category(s: &str) -> EntityCategory {
    match s {
        "master" => EntityCategory::Master,
        "transaction" => EntityCategory::Transaction,
        "document" => EntityCategory::Document,
        "reference" => EntityCategory::Reference,
        "parameter" => EntityCategory::Parameter,
        _ => EntityCategory::Miscellaneous,
    }
}

fn cardinality_str(c: Cardinality) -> &'static str {
    match c {
        Cardinality::Single => "single",
        Cardinality::Multiple => "multiple",
    }
}

fn parse_cardinality(s: &str) -> Cardinality {
    if s == "multiple" { Cardinality::Multiple } else { Cardinality::Single }
}

fn constraint_kind_str(k: ConstraintKind) -> &'static str {
    match k {
        ConstraintKind::Referential => "referential",
        ConstraintKind::Fixed => "fixed",
        ConstraintKind::Related => "related",
    }
}

fn parse_constraint_kind(s: &str) -> ConstraintKind {
    match s {
        "fixed" => ConstraintKind::Fixed,
        "related" => ConstraintKind::Related,
        _ => ConstraintKind::Referential,
    }
}

fn binding_kind_str(b: BindingKind) -> &'static str {
    match b {
        BindingKind::Unbound => "unbound",
        BindingKind::BoundToEntitySet => "bound_to_entity_set",
        BindingKind::BoundToEntity => "bound_to_entity",
    }
}

fn parse_binding_kind(s: &str) -> BindingKind {
    match s {
        "bound_to_entity_set" => BindingKind::BoundToEntitySet,
        "bound_to_entity" => BindingKind::BoundToEntity,
        _ => BindingKind::Unbound,
    }
}

fn sync_status_str(s: SyncStatus) -> &'static str {
    match s {
        SyncStatus::Pending => "pending",
        SyncStatus::Syncing => "syncing",
        SyncStatus::Completed => "completed",
        SyncStatus::Failed => "failed",
    }
}

fn parse_sync_status(s: &str) -> SyncStatus {
    match s {
        "syncing" => SyncStatus::Syncing,
        "completed" => SyncStatus::Completed,
        "failed" => SyncStatus::Failed,
        _ => SyncStatus::Pending,
    }
}

fn strategy_str(s: SyncStrategy) -> &'static str {
    match s {
        SyncStrategy::Full => "full",
        SyncStrategy::EntitiesOnly => "entities_only",
        SyncStrategy::LabelsOnly => "labels_only",
        SyncStrategy::FullWithoutLabels => "full_without_labels",
        SyncStrategy::SharingMode => "sharing_mode",
        SyncStrategy::Incremental => "incremental",
    }
}

fn parse_strategy(s: &str) -> SyncStrategy {
    match s {
        "entities_only" => SyncStrategy::EntitiesOnly,
        "labels_only" => SyncStrategy::LabelsOnly,
        "full_without_labels" => SyncStrategy::FullWithoutLabels,
        "sharing_mode" => SyncStrategy::SharingMode,
        "incremental" => SyncStrategy::Incremental,
        _ => SyncStrategy::Full,
    }
}

fn state_str(s: SyncState) -> &'static str {
    match s {
        SyncState::Pending => "pending",
        SyncState::Running => "running",
        SyncState::Cancelling => "cancelling",
        SyncState::Completed => "completed",
        SyncState::Failed => "failed",
        SyncState::Cancelled => "cancelled",
    }
}

fn parse_state(s: &str) -> SyncState {
    match s {
        "running" => SyncState::Running,
        "cancelling" => SyncState::Cancelling,
        "completed" => SyncState::Completed,
        "failed" => SyncState::Failed,
        "cancelled" => SyncState::Cancelled,
        _ => SyncState::Pending,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::db::schema;

    fn repo() -> MetadataRepository {
        let db = MetadataDb::in_memory().unwrap();
        {
            let conn = db.writer().unwrap();
            schema::apply(&conn).unwrap();
            crate::infrastructure::db::fts::create_fts(&conn).unwrap();
        }
        MetadataRepository::new(db)
    }

    #[test]
    fn environment_round_trips() {
        let repo = repo();
        let now = Utc::now();
        let env = repo.find_or_create_environment("HTTPS://Foo.example.com/", "Foo", now).unwrap();
        let again = repo.find_or_create_environment("https://foo.example.com", "Foo", now).unwrap();
        assert_eq!(env.id, again.id);
    }

    #[test]
    fn global_version_dedupes_by_hash() {
        let repo = repo();
        let now = Utc::now();
        let env = repo.find_or_create_environment("https://a.example.com", "A", now).unwrap();
        let (v1, created1) = repo.get_or_create_global_version("hash1", "hash1ab", env.id, &[], now, None, None).unwrap();
        let (v2, created2) = repo.get_or_create_global_version("hash1", "hash1ab", env.id, &[], now, None, None).unwrap();
        assert!(created1);
        assert!(!created2);
        assert_eq!(v1.id, v2.id);
    }

    #[test]
    fn link_environment_deactivates_prior_link() {
        let repo = repo();
        let now = Utc::now();
        let env = repo.find_or_create_environment("https://a.example.com", "A", now).unwrap();
        let (v1, _) = repo.get_or_create_global_version("h1", "h1", env.id, &[], now, None, None).unwrap();
        let (v2, _) = repo.get_or_create_global_version("h2", "h2", env.id, &[], now, None, None).unwrap();

        repo.link_environment_to_version(env.id, v1.id, now).unwrap();
        repo.link_environment_to_version(env.id, v2.id, now).unwrap();

        let active = repo.get_active_environment_version(env.id).unwrap().unwrap();
        assert_eq!(active.global_version_id, v2.id);
    }

    #[test]
    fn cleanup_removes_only_retention_eligible_versions() {
        let repo = repo();
        let now = Utc::now();
        let env = repo.find_or_create_environment("https://a.example.com", "A", now).unwrap();
        let old_time = now - chrono::Duration::days(40);
        let (old, _) = repo.get_or_create_global_version("old", "old", env.id, &[], old_time, None, None).unwrap();
        let (_recent, _) = repo.get_or_create_global_version("recent", "recent", env.id, &[], now, None, None).unwrap();

        let removed = repo.cleanup_unused_versions(chrono::Duration::days(30), now).unwrap();
        assert_eq!(removed, 1);
        assert!(repo.find_global_version_by_hash("old").unwrap().is_none());
        let _ = old;
    }
}
