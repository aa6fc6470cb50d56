// d365fo-cache-core/src/infrastructure/db/fts.rs
//
// Content-bearing FTS5 index over entity/action/enumeration metadata.
// Content-bearing (the FTS5 default, as opposed to a `content=''`
// contentless table) means the column text is stored inside the index
// itself, so `snippet()` and `bm25()` work without a join back to a
// shadow table.

use crate::domain::search::{EntityType, SearchFilters, SearchResult};
use rusqlite::{params, Connection, OptionalExtension};

pub const FTS_TABLE: &str = "metadata_search";

pub fn create_fts(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute(
        &format!(
            "CREATE VIRTUAL TABLE IF NOT EXISTS {FTS_TABLE} USING fts5(
                entity_name,
                entity_type,
                entity_set_name,
                description,
                labels,
                properties_text,
                actions_text,
                global_version_id UNINDEXED,
                entity_id UNINDEXED
            )"
        ),
        [],
    )?;
    Ok(())
}

/// Returns true if an old contentless-shape FTS table is present (its DDL
/// in `sqlite_master` contains `content=''`), per spec §4.4's migration
/// trigger.
pub fn is_contentless(conn: &Connection) -> rusqlite::Result<bool> {
    let sql: Option<String> = conn.query_row(
            "SELECT sql FROM sqlite_master WHERE type='table' AND name=?1",
            params![FTS_TABLE],
            |r| r.get(0),
        ).optional()?;
    Ok(sql.map(|s| s.contains("content=''")).unwrap_or(false))
}

/// Drops and recreates the virtual table in the content-bearing shape.
/// Callers are responsible for requesting a rebuild of every environment's
/// active version afterward.
pub fn migrate_contentless_to_content_bearing(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute(&format!("DROP TABLE IF EXISTS {FTS_TABLE}"), [])?;
    create_fts(conn)
}

fn entity_type_str(t: EntityType) -> &'static str {
    match t {
        EntityType::DataEntity => "data_entity",
        EntityType::PublicEntity => "public_entity",
        EntityType::Enumeration => "enumeration",
        EntityType::Action => "action",
    }
}

pub struct FtsRow {
    pub entity_name: String,
    pub entity_type: EntityType,
    pub entity_set_name: Option<String>,
    pub description: Option<String>,
    pub labels: String,
    pub properties_text: String,
    pub actions_text: String,
    pub entity_id: String,
}

/// Rebuild is atomic per version: delete then reinsert inside the caller's
/// transaction.
pub fn rebuild_for_version(
    conn: &Connection,
    global_version_id: i64,
    rows: &[FtsRow],
) -> rusqlite::Result<()> {
    conn.execute(
        &format!("DELETE FROM {FTS_TABLE} WHERE global_version_id = ?1"),
        params![global_version_id],
    )?;

    let mut stmt = conn.prepare(&format!(
        "INSERT INTO {FTS_TABLE}
            (entity_name, entity_type, entity_set_name, description, labels,
             properties_text, actions_text, global_version_id, entity_id)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)"
    ))?;

    for row in rows {
        stmt.execute(params![
            row.entity_name,
            entity_type_str(row.entity_type),
            row.entity_set_name,
            row.description,
            row.labels,
            row.properties_text,
            row.actions_text,
            global_version_id,
            row.entity_id,
        ])?;
    }
    Ok(())
}

/// `Search(query)` with `use_fulltext=true`: an FTS `MATCH` with BM25
/// ranking. Lower `bm25()` means more relevant in SQLite's
/// convention, so relevance is reported as its negation (higher = better).
pub fn search_fulltext(
    conn: &Connection,
    global_version_id: i64,
    text: &str,
    entity_types: &[EntityType],
    limit: usize,
    offset: usize,
) -> rusqlite::Result<Vec<SearchResult>> {
    let type_filter = if entity_types.is_empty() {
        String::new()
    } else {
        let list: Vec<String> = entity_types.iter().map(|t| format!("'{}'", entity_type_str(*t))).collect();
        format!(" AND entity_type IN ({})", list.join(","))
    };

    let sql = format!(
        "SELECT entity_name, entity_type, entity_set_name, description,
                bm25({FTS_TABLE}) AS rank,
                snippet({FTS_TABLE}, 3, '<mark>', '</mark>', '...', 10) AS snip
         FROM {FTS_TABLE}
         WHERE {FTS_TABLE} MATCH ?1 AND global_version_id = ?2 {type_filter}
         ORDER BY rank
         LIMIT ?3 OFFSET ?4"
    );

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(
        params![quote_match(text), global_version_id, limit as i64, offset as i64],
        |r| {
            let entity_type: String = r.get(1)?;
            let rank: f64 = r.get(4)?;
            Ok(SearchResult {
                name: r.get(0)?,
                entity_type: parse_entity_type(&entity_type),
                entity_set_name: r.get(2)?,
                description: r.get(3)?,
                relevance: -rank,
                snippet: r.get(5)?,
            })
        },
    )?;

    rows.collect()
}

/// Fallback path when `use_fulltext=false`: `name LIKE` plus filter
/// predicates on the base `data_entities`/`public_entities` tables.
pub fn search_like(
    conn: &Connection,
    global_version_id: i64,
    text: &str,
    filters: &SearchFilters,
    limit: usize,
    offset: usize,
) -> rusqlite::Result<Vec<SearchResult>> {
    let mut sql = String::from(
        "SELECT name, entity_set_name, category, is_read_only, data_service_enabled
         FROM data_entities WHERE global_version_id = ?1 AND name LIKE ?2",
    );
    if let Some(cat) = &filters.entity_category {
        sql.push_str(&format!(" AND category = '{}'", cat.replace('\'', "''")));
    }
    if let Some(ro) = filters.is_read_only {
        sql.push_str(&format!(" AND is_read_only = {}", ro as i64));
    }
    if let Some(dse) = filters.data_service_enabled {
        sql.push_str(&format!(" AND data_service_enabled = {}", dse as i64));
    }
    sql.push_str(" ORDER BY name LIMIT ?3 OFFSET ?4");

    let like_pattern = format!("%{}%", text.replace('%', "").replace('_', ""));
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(
        params![global_version_id, like_pattern, limit as i64, offset as i64],
        |r| {
            Ok(SearchResult {
                name: r.get(0)?,
                entity_type: EntityType::DataEntity,
                entity_set_name: r.get(1)?,
                description: None,
                relevance: 1.0,
                snippet: None,
            })
        },
    )?;

    rows.collect()
}

fn parse_entity_type(s: &str) -> EntityType {
    match s {
        "data_entity" => EntityType::DataEntity,
        "public_entity" => EntityType::PublicEntity,
        "enumeration" => EntityType::Enumeration,
        _ => EntityType::Action,
    }
}

/// FTS5 MATCH treats bare punctuation specially; wrap the user's text as a
/// quoted phrase prefix query so arbitrary search terms never throw a
/// syntax error out of the query parser.
fn quote_match(text: &str) -> String {
    format!("\"{}\"*", text.replace('"', "\"\""))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(name: &str) -> FtsRow {
        FtsRow {
            entity_name: name.to_string(),
            entity_type: EntityType::PublicEntity,
            entity_set_name: Some(name.to_string()),
            description: Some(format!("{name} master")),
            labels: String::new(),
            properties_text: String::new(),
            actions_text: String::new(),
            entity_id: name.to_string(),
        }
    }

    #[test]
    fn rebuild_then_search_finds_entity() {
        let conn = Connection::open_in_memory().unwrap();
        create_fts(&conn).unwrap();
        rebuild_for_version(&conn, 1, &[row("Customers"), row("CustomerGroups"), row("SalesOrders")]).unwrap();

        let results = search_fulltext(&conn, 1, "customer", &[], 10, 0).unwrap();
        assert!(results.iter().any(|r| r.name == "Customers"));
        assert!(results.iter().any(|r| r.name == "CustomerGroups"));
        assert!(!results.iter().any(|r| r.name == "SalesOrders"));
    }

    #[test]
    fn rebuild_is_scoped_to_its_version() {
        let conn = Connection::open_in_memory().unwrap();
        create_fts(&conn).unwrap();
        rebuild_for_version(&conn, 1, &[row("Customers")]).unwrap();
        rebuild_for_version(&conn, 2, &[row("Vendors")]).unwrap();

        let v1 = search_fulltext(&conn, 1, "customer", &[], 10, 0).unwrap();
        assert_eq!(v1.len(), 1);
        let v1_vendor = search_fulltext(&conn, 1, "vendor", &[], 10, 0).unwrap();
        assert!(v1_vendor.is_empty());
    }

    #[test]
    fn detects_contentless_shape() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute(
            "CREATE VIRTUAL TABLE metadata_search USING fts5(entity_name, content='')",
            [],
        ).unwrap();
        assert!(is_contentless(&conn).unwrap());
    }
}
