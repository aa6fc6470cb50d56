// d365fo-cache-mcp/src/tools.rs
//
// USE CASE: exposes Core's public read/write API as MCP tools.
//
// §9 design note: the source's mixin-based tool registration becomes a flat
// registry here — `tool_list()` enumerates static `Tool` definitions and
// `dispatch()` is one `match` over tool name, each arm a free function that
// closes over the shared `Core` handle passed in. No hidden global state.

use d365fo_cache_core::application::Core;
use d365fo_cache_core::domain::metadata::entity::{BindingKind, EntityCategory};
use d365fo_cache_core::domain::ports::pagination::PagedQuery;
use d365fo_cache_core::domain::search::{EntityType, SearchFilters, SearchQuery};
use d365fo_cache_core::domain::sync::{SyncState, SyncStrategy};
use serde_json::{json, Map, Value};
use std::sync::Arc;

/// Wraps a page of results with the opaque `next_page_token` cursor (spec
/// §9 design note: lazy paginated reads), so a caller can restart at the
/// next page just by echoing `offset` back in as `limit`'s paired argument.
fn paginated(key: &str, items: Value, query: PagedQuery, returned: usize, total: Option<u64>) -> Value {
    let next = query.next(returned, total);
    let mut obj = Map::new();
    obj.insert(key.to_string(), items);
    obj.insert("total".to_string(), json!(total));
    obj.insert("next_page_token".to_string(), json!(next.map(|t| t.0)));
    Value::Object(obj)
}

pub const TOOL_NAMES: &[&str] = &[
    "get_entity",
    "list_entities",
    "get_enumeration",
    "get_actions",
    "search",
    "get_label",
    "get_labels_batch",
    "get_environment_info",
    "start_sync",
    "get_sync_progress",
    "cancel_sync",
    "list_sync_sessions",
    "get_sync_history",
];

/// Static tool catalogue.
pub fn tool_list() -> Vec<rmcp::model::Tool> {
    vec![
        tool("get_entity", "Fetch one entity's full record by name (tries the public-entity shape first, then falls back to the bare data-entity record).", schema(&[("name", "string", true)])),
        tool("list_entities", "List data entities for the active version, optionally filtered by category or read-only flag.", schema(&[
            ("category", "string", false),
            ("is_read_only", "boolean", false),
            ("limit", "integer", false),
            ("offset", "integer", false),
        ])),
        tool("get_enumeration", "Fetch one enumeration and its members by name.", schema(&[("name", "string", true)])),
        tool("get_actions", "List bound/unbound actions, optionally filtered by owning entity, binding kind or a name substring.", schema(&[
            ("entity_name", "string", false),
            ("binding_kind", "string", false),
            ("name_pattern", "string", false),
            ("limit", "integer", false),
            ("offset", "integer", false),
        ])),
        tool("search", "Full-text or LIKE search over cached entity/action/enumeration metadata.", schema(&[
            ("text", "string", true),
            ("entity_types", "array", false),
            ("limit", "integer", false),
            ("offset", "integer", false),
            ("use_fulltext", "boolean", false),
        ])),
        tool("get_label", "Resolve a single label id to localized text.", schema(&[
            ("label_id", "string", true),
            ("language", "string", false),
        ])),
        tool("get_labels_batch", "Resolve several label ids to localized text in one batch.", schema(&[
            ("label_ids", "array", true),
            ("language", "string", false),
        ])),
        tool("get_environment_info", "Report what the cache knows about the environment: active global version, app/platform version, and row counts.", schema(&[])),
        tool("start_sync", "Start a new metadata sync session against the live environment.", schema(&[
            ("strategy", "string", false),
            ("language", "string", false),
        ])),
        tool("get_sync_progress", "Fetch one sync session's current progress/state.", schema(&[("session_id", "string", true)])),
        tool("cancel_sync", "Request cooperative cancellation of a running sync session.", schema(&[("session_id", "string", true)])),
        tool("list_sync_sessions", "List sync sessions, optionally filtered by state.", schema(&[("state", "string", false)])),
        tool("get_sync_history", "List the most recent completed sync sessions for this environment.", schema(&[("limit", "integer", false)])),
    ]
}

fn tool(name: &'static str, description: &'static str, input_schema: Value) -> rmcp::model::Tool {
    let object = input_schema.as_object().cloned().unwrap_or_default();
    rmcp::model::Tool::new(name, description, Arc::new(object))
}

fn schema(fields: &[(&str, &str, bool)]) -> Value {
    let mut properties = Map::new();
    let mut required = Vec::new();
    for (name, ty, is_required) in fields {
        properties.insert((*name).to_string(), json!({ "type": ty }));
        if *is_required {
            required.push(Value::String((*name).to_string()));
        }
    }
    json!({
        "type": "object",
        "properties": Value::Object(properties),
        "required": required,
    })
}

/// Dispatches one tool call to `Core` and returns its JSON result.
/// `Err` carries the structured `{kind, message,...}` shape from
/// `CoreError::to_structured` so `call_tool` can surface it
/// without re-deriving the error taxonomy.
pub async fn dispatch(core: &Core, name: &str, args: &Value) -> Result<Value, Value> {
    let empty = Map::new();
    let args = args.as_object().unwrap_or(&empty);

    match name {
        "get_entity" => get_entity(core, args).await,
        "list_entities" => list_entities(core, args).await,
        "get_enumeration" => get_enumeration(core, args).await,
        "get_actions" => get_actions(core, args).await,
        "search" => search(core, args).await,
        "get_label" => get_label(core, args).await,
        "get_labels_batch" => get_labels_batch(core, args).await,
        "get_environment_info" => get_environment_info(core).await,
        "start_sync" => start_sync(core, args).await,
        "get_sync_progress" => get_sync_progress(core, args).await,
        "cancel_sync" => cancel_sync(core, args).await,
        "list_sync_sessions" => list_sync_sessions(core, args).await,
        "get_sync_history" => get_sync_history(core, args).await,
        other => Err(json!({ "kind": "InvalidTool", "message": format!("unknown tool '{other}'"), "retryable": false })),
    }
}

fn require_str<'a>(args: &'a Map<String, Value>, key: &str) -> Result<&'a str, Value> {
    args.get(key).and_then(Value::as_str).ok_or_else(|| json!({ "kind": "InvalidParams", "message": format!("missing required string argument '{key}'"), "retryable": false }))
}

fn opt_str<'a>(args: &'a Map<String, Value>, key: &str) -> Option<&'a str> {
    args.get(key).and_then(Value::as_str)
}

fn opt_bool(args: &Map<String, Value>, key: &str) -> Option<bool> {
    args.get(key).and_then(Value::as_bool)
}

fn opt_usize(args: &Map<String, Value>, key: &str, default: usize) -> usize {
    args.get(key).and_then(Value::as_u64).map(|v| v as usize).unwrap_or(default)
}

fn opt_str_list(args: &Map<String, Value>, key: &str) -> Vec<String> {
    args.get(key).and_then(Value::as_array).map(|a| a.iter().filter_map(Value::as_str).map(str::to_string).collect()).unwrap_or_default()
}

async fn get_entity(core: &Core, args: &Map<String, Value>) -> Result<Value, Value> {
    let name = require_str(args, "name")?;
    match core.get_entity(name).map_err(|e| e.to_structured(None))? {
        Some(entity) => Ok(serde_json::to_value(entity).unwrap_or(Value::Null)),
        None => Err(json!({ "kind": "NotFound", "message": format!("entity '{name}' not found for the active version"), "retryable": false })),
    }
}

async fn list_entities(core: &Core, args: &Map<String, Value>) -> Result<Value, Value> {
    let category = opt_str(args, "category").map(parse_category).transpose()?;
    let is_read_only = opt_bool(args, "is_read_only");
    let limit = opt_usize(args, "limit", 50);
    let offset = opt_usize(args, "offset", 0);

    let (entities, total) = core.list_entities(category, is_read_only, limit, offset).map_err(|e| e.to_structured(None))?;
    let returned = entities.len();
    Ok(paginated(
        "entities",
        serde_json::to_value(entities).unwrap_or(Value::Null),
        PagedQuery { limit, offset },
        returned,
        Some(total),
    ))
}

async fn get_enumeration(core: &Core, args: &Map<String, Value>) -> Result<Value, Value> {
    let name = require_str(args, "name")?;
    match core.get_enumeration(name).map_err(|e| e.to_structured(None))? {
        Some(enumeration) => Ok(serde_json::to_value(enumeration).unwrap_or(Value::Null)),
        None => Err(json!({ "kind": "NotFound", "message": format!("enumeration '{name}' not found for the active version"), "retryable": false })),
    }
}

async fn get_actions(core: &Core, args: &Map<String, Value>) -> Result<Value, Value> {
    let entity_name = opt_str(args, "entity_name");
    let binding_kind = opt_str(args, "binding_kind").map(parse_binding_kind).transpose()?;
    let name_pattern = opt_str(args, "name_pattern");
    let limit = opt_usize(args, "limit", 50);
    let offset = opt_usize(args, "offset", 0);

    let (actions, total) = core.get_actions(entity_name, binding_kind, name_pattern, limit, offset).map_err(|e| e.to_structured(None))?;
    let returned = actions.len();
    let actions: Vec<Value> = actions.into_iter().map(|(owner, action)| json!({ "owner": owner, "action": action })).collect();
    Ok(paginated(
        "actions",
        Value::Array(actions),
        PagedQuery { limit, offset },
        returned,
        Some(total),
    ))
}

async fn search(core: &Core, args: &Map<String, Value>) -> Result<Value, Value> {
    let text = require_str(args, "text")?.to_string();
    let entity_types = opt_str_list(args, "entity_types").iter().map(|s| parse_entity_type(s)).collect::<Result<Vec<_>, _>>()?;
    let limit = opt_usize(args, "limit", 20);
    let offset = opt_usize(args, "offset", 0);
    let use_fulltext = opt_bool(args, "use_fulltext").unwrap_or(true);

    let query = SearchQuery {
        text,
        entity_types,
        filters: SearchFilters::default(),
        limit,
        offset,
        use_fulltext,
    };
    let results = core.search(&query).map_err(|e| e.to_structured(None))?;
    let returned = results.len();
    Ok(paginated(
        "results",
        serde_json::to_value(results).unwrap_or(Value::Null),
        PagedQuery { limit, offset },
        returned,
        None,
    ))
}

async fn get_label(core: &Core, args: &Map<String, Value>) -> Result<Value, Value> {
    let label_id = require_str(args, "label_id")?;
    let language = opt_str(args, "language").unwrap_or("en-US");
    match core.get_label(label_id, language).await.map_err(|e| e.to_structured(None))? {
        Some(text) => Ok(json!({ "label_id": label_id, "language": language, "text": text })),
        None => Err(json!({ "kind": "NotFound", "message": format!("label '{label_id}' could not be resolved in '{language}'"), "retryable": false })),
    }
}

async fn get_labels_batch(core: &Core, args: &Map<String, Value>) -> Result<Value, Value> {
    let label_ids = opt_str_list(args, "label_ids");
    if label_ids.is_empty() {
        return Err(json!({ "kind": "InvalidParams", "message": "label_ids must be a non-empty array of strings", "retryable": false }));
    }
    let language = opt_str(args, "language").unwrap_or("en-US");
    let resolved = core.get_labels_batch(&label_ids, language).await.map_err(|e| e.to_structured(None))?;
    Ok(serde_json::to_value(resolved).unwrap_or(Value::Null))
}

async fn get_environment_info(core: &Core) -> Result<Value, Value> {
    let info = core.environment_info_full().map_err(|e| e.to_structured(None))?;
    Ok(serde_json::to_value(info).unwrap_or(Value::Null))
}

async fn start_sync(core: &Core, args: &Map<String, Value>) -> Result<Value, Value> {
    let strategy = opt_str(args, "strategy").map(parse_strategy).transpose()?;
    let language = opt_str(args, "language").map(str::to_string);
    let session_id = core.start_sync(strategy, language, None).await.map_err(|e| e.to_structured(None))?;
    Ok(json!({ "session_id": session_id }))
}

async fn get_sync_progress(core: &Core, args: &Map<String, Value>) -> Result<Value, Value> {
    let session_id = require_str(args, "session_id")?;
    let session = core.sync_progress(session_id).map_err(|e| e.to_structured(Some(session_id)))?;
    Ok(serde_json::to_value(session).unwrap_or(Value::Null))
}

async fn cancel_sync(core: &Core, args: &Map<String, Value>) -> Result<Value, Value> {
    let session_id = require_str(args, "session_id")?;
    core.cancel_sync(session_id).map_err(|e| e.to_structured(Some(session_id)))?;
    Ok(json!({ "session_id": session_id, "cancellation_requested": true }))
}

async fn list_sync_sessions(core: &Core, args: &Map<String, Value>) -> Result<Value, Value> {
    let state = opt_str(args, "state").map(parse_state).transpose()?;
    let sessions = core.list_sync_sessions(state).map_err(|e| e.to_structured(None))?;
    Ok(json!({ "sessions": sessions }))
}

async fn get_sync_history(core: &Core, args: &Map<String, Value>) -> Result<Value, Value> {
    let limit = opt_usize(args, "limit", 20);
    let sessions = core.sync_history(limit).map_err(|e| e.to_structured(None))?;
    Ok(json!({ "sessions": sessions }))
}

fn parse_category(s: &str) -> Result<EntityCategory, Value> {
    Ok(match s.to_lowercase().as_str() {
        "master" => EntityCategory::Master,
        "transaction" => EntityCategory::Transaction,
        "document" => EntityCategory::Document,
        "reference" => EntityCategory::Reference,
        "parameter" => EntityCategory::Parameter,
        "miscellaneous" => EntityCategory::Miscellaneous,
        other => return Err(invalid_param("category", other)),
    })
}

fn parse_binding_kind(s: &str) -> Result<BindingKind, Value> {
    Ok(match s.to_lowercase().replace(['-', ' '], "_").as_str() {
        "unbound" => BindingKind::Unbound,
        "bound_to_entity_set" => BindingKind::BoundToEntitySet,
        "bound_to_entity" => BindingKind::BoundToEntity,
        other => return Err(invalid_param("binding_kind", other)),
    })
}

fn parse_entity_type(s: &str) -> Result<EntityType, Value> {
    Ok(match s.to_lowercase().replace(['-', ' '], "_").as_str() {
        "data_entity" => EntityType::DataEntity,
        "public_entity" => EntityType::PublicEntity,
        "enumeration" => EntityType::Enumeration,
        "action" => EntityType::Action,
        other => return Err(invalid_param("entity_types", other)),
    })
}

fn parse_strategy(s: &str) -> Result<SyncStrategy, Value> {
    Ok(match s.to_lowercase().as_str() {
        "full" => SyncStrategy::Full,
        "entities_only" => SyncStrategy::EntitiesOnly,
        "labels_only" => SyncStrategy::LabelsOnly,
        "full_without_labels" => SyncStrategy::FullWithoutLabels,
        "sharing_mode" => SyncStrategy::SharingMode,
        "incremental" => SyncStrategy::Incremental,
        other => return Err(invalid_param("strategy", other)),
    })
}

fn parse_state(s: &str) -> Result<SyncState, Value> {
    Ok(match s.to_lowercase().as_str() {
        "pending" => SyncState::Pending,
        "running" => SyncState::Running,
        "cancelling" => SyncState::Cancelling,
        "completed" => SyncState::Completed,
        "failed" => SyncState::Failed,
        "cancelled" => SyncState::Cancelled,
        other => return Err(invalid_param("state", other)),
    })
}

fn invalid_param(field: &str, value: &str) -> Value {
    json!({ "kind": "InvalidParams", "message": format!("unrecognized {field} '{value}'"), "retryable": false })
}
