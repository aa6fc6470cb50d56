// d365fo-cache-core/src/infrastructure/db/schema.rs
//
// Schema as defined in spec §3/§6.3. Every metadata table carries an index
// on `(global_version_id, name)`; `labels` additionally carries one on
// `(global_version_id, label_id, language)`.

pub const CURRENT_SCHEMA_VERSION: i64 = 2;

pub const DDL: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL)",
    "CREATE TABLE IF NOT EXISTS environments (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        base_url TEXT NOT NULL UNIQUE,
        display_name TEXT NOT NULL,
        created_at TEXT NOT NULL,
        last_sync_at TEXT
    )",
    "CREATE TABLE IF NOT EXISTS global_versions (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        version_hash TEXT NOT NULL,
        modules_hash TEXT NOT NULL UNIQUE,
        first_seen_at TEXT NOT NULL,
        last_used_at TEXT NOT NULL,
        reference_count INTEGER NOT NULL DEFAULT 0,
        created_by_environment_id INTEGER NOT NULL REFERENCES environments(id),
        application_version TEXT,
        platform_build_version TEXT
    )",
    "CREATE INDEX IF NOT EXISTS idx_global_versions_last_used
        ON global_versions(reference_count, last_used_at)",
    "CREATE TABLE IF NOT EXISTS modules (
        global_version_id INTEGER NOT NULL REFERENCES global_versions(id) ON DELETE CASCADE,
        module_id TEXT NOT NULL,
        name TEXT NOT NULL,
        version TEXT NOT NULL,
        publisher TEXT NOT NULL,
        display_name TEXT NOT NULL,
        sort_order INTEGER NOT NULL,
        PRIMARY KEY (global_version_id, module_id)
    )",
    "CREATE TABLE IF NOT EXISTS environment_versions (
        environment_id INTEGER NOT NULL REFERENCES environments(id) ON DELETE CASCADE,
        global_version_id INTEGER NOT NULL REFERENCES global_versions(id),
        detected_at TEXT NOT NULL,
        is_active INTEGER NOT NULL DEFAULT 0,
        sync_status TEXT NOT NULL,
        last_sync_duration_ms INTEGER,
        PRIMARY KEY (environment_id, global_version_id)
    )",
    "CREATE INDEX IF NOT EXISTS idx_env_versions_active
        ON environment_versions(environment_id, is_active)",
    "CREATE TABLE IF NOT EXISTS data_entities (
        global_version_id INTEGER NOT NULL REFERENCES global_versions(id) ON DELETE CASCADE,
        name TEXT NOT NULL,
        entity_set_name TEXT NOT NULL,
        category TEXT NOT NULL,
        data_service_enabled INTEGER NOT NULL,
        data_management_enabled INTEGER NOT NULL,
        is_read_only INTEGER NOT NULL,
        label_id TEXT,
        PRIMARY KEY (global_version_id, name)
    )",
    "CREATE INDEX IF NOT EXISTS idx_data_entities_name ON data_entities(global_version_id, name)",
    "CREATE TABLE IF NOT EXISTS public_entities (
        global_version_id INTEGER NOT NULL REFERENCES global_versions(id) ON DELETE CASCADE,
        name TEXT NOT NULL,
        entity_set_name TEXT NOT NULL,
        label_id TEXT,
        PRIMARY KEY (global_version_id, name)
    )",
    "CREATE INDEX IF NOT EXISTS idx_public_entities_name ON public_entities(global_version_id, name)",
    "CREATE TABLE IF NOT EXISTS entity_properties (
        global_version_id INTEGER NOT NULL REFERENCES global_versions(id) ON DELETE CASCADE,
        entity_name TEXT NOT NULL,
        name TEXT NOT NULL,
        type_name TEXT NOT NULL,
        data_type TEXT NOT NULL,
        is_key INTEGER NOT NULL,
        is_mandatory INTEGER NOT NULL,
        allow_edit INTEGER NOT NULL,
        allow_edit_on_create INTEGER NOT NULL,
        is_dimension INTEGER NOT NULL,
        property_order INTEGER NOT NULL,
        label_id TEXT,
        PRIMARY KEY (global_version_id, entity_name, name)
    )",
    "CREATE INDEX IF NOT EXISTS idx_entity_properties_entity
        ON entity_properties(global_version_id, entity_name)",
    "CREATE TABLE IF NOT EXISTS navigation_properties (
        global_version_id INTEGER NOT NULL REFERENCES global_versions(id) ON DELETE CASCADE,
        entity_name TEXT NOT NULL,
        name TEXT NOT NULL,
        related_entity TEXT NOT NULL,
        cardinality TEXT NOT NULL,
        PRIMARY KEY (global_version_id, entity_name, name)
    )",
    "CREATE TABLE IF NOT EXISTS relation_constraints (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        global_version_id INTEGER NOT NULL REFERENCES global_versions(id) ON DELETE CASCADE,
        entity_name TEXT NOT NULL,
        navigation_name TEXT NOT NULL,
        kind TEXT NOT NULL,
        source_property TEXT NOT NULL,
        target_property TEXT NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS idx_relation_constraints_nav
        ON relation_constraints(global_version_id, entity_name, navigation_name)",
    "CREATE TABLE IF NOT EXISTS entity_actions (
        global_version_id INTEGER NOT NULL REFERENCES global_versions(id) ON DELETE CASCADE,
        owner_name TEXT NOT NULL,
        name TEXT NOT NULL,
        binding_kind TEXT NOT NULL,
        return_type_name TEXT,
        return_is_collection INTEGER NOT NULL,
        field_lookup TEXT,
        PRIMARY KEY (global_version_id, owner_name, name)
    )",
    "CREATE INDEX IF NOT EXISTS idx_entity_actions_name ON entity_actions(global_version_id, name)",
    "CREATE TABLE IF NOT EXISTS action_parameters (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        global_version_id INTEGER NOT NULL REFERENCES global_versions(id) ON DELETE CASCADE,
        owner_name TEXT NOT NULL,
        action_name TEXT NOT NULL,
        name TEXT NOT NULL,
        type_name TEXT NOT NULL,
        is_collection INTEGER NOT NULL,
        parameter_order INTEGER NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS idx_action_parameters_action
        ON action_parameters(global_version_id, owner_name, action_name)",
    "CREATE TABLE IF NOT EXISTS enumerations (
        global_version_id INTEGER NOT NULL REFERENCES global_versions(id) ON DELETE CASCADE,
        name TEXT NOT NULL,
        label_id TEXT,
        PRIMARY KEY (global_version_id, name)
    )",
    "CREATE INDEX IF NOT EXISTS idx_enumerations_name ON enumerations(global_version_id, name)",
    "CREATE TABLE IF NOT EXISTS enumeration_members (
        global_version_id INTEGER NOT NULL REFERENCES global_versions(id) ON DELETE CASCADE,
        enum_name TEXT NOT NULL,
        name TEXT NOT NULL,
        value INTEGER NOT NULL,
        configuration_enabled INTEGER NOT NULL,
        label_id TEXT,
        PRIMARY KEY (global_version_id, enum_name, name)
    )",
    "CREATE TABLE IF NOT EXISTS labels (
        global_version_id INTEGER NOT NULL REFERENCES global_versions(id) ON DELETE CASCADE,
        label_id TEXT NOT NULL,
        language TEXT NOT NULL,
        label_text TEXT NOT NULL,
        expires_at TEXT,
        PRIMARY KEY (global_version_id, label_id, language)
    )",
    "CREATE INDEX IF NOT EXISTS idx_labels_lookup
        ON labels(global_version_id, label_id, language)",
    "CREATE TABLE IF NOT EXISTS sync_sessions (
        session_id TEXT PRIMARY KEY,
        environment_id INTEGER NOT NULL REFERENCES environments(id),
        target_global_version_id INTEGER REFERENCES global_versions(id),
        strategy TEXT NOT NULL,
        state TEXT NOT NULL,
        started_at TEXT NOT NULL,
        finished_at TEXT,
        phase TEXT NOT NULL,
        items_total INTEGER NOT NULL DEFAULT 0,
        items_done INTEGER NOT NULL DEFAULT 0,
        errors_count INTEGER NOT NULL DEFAULT 0,
        error_messages_json TEXT NOT NULL DEFAULT '[]'
    )",
    "CREATE INDEX IF NOT EXISTS idx_sync_sessions_env ON sync_sessions(environment_id, started_at)",
];

pub fn apply(conn: &rusqlite::Connection) -> rusqlite::Result<()> {
    for stmt in DDL {
        conn.execute(stmt, [])?;
    }
    Ok(())
}
