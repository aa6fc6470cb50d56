// d365fo-cache-core/src/infrastructure/db/migrations.rs
//
// An internal `schema_version` table is consulted on open; missing or lower
// version triggers a forward-only migration function keyed by `(from, to)`
//. A failing migration leaves the DB unchanged: each step runs
// inside one transaction, and the whole file is backed up before migrating
// so a worse failure (corruption mid-write) can still be recovered from.

use crate::infrastructure::db::schema::{self, CURRENT_SCHEMA_VERSION};
use crate::infrastructure::error::DatabaseError;
use rusqlite::Connection;
use std::path::Path;

type MigrationFn = fn(&rusqlite::Transaction) -> rusqlite::Result<()>;

/// Registry of forward-only steps. Add an entry here whenever
/// `CURRENT_SCHEMA_VERSION` is bumped; never edit a past entry in place.
const MIGRATIONS: &[(i64, i64, MigrationFn)] = &[
    (1, 2, migrate_v1_to_v2),
];

/// Adds the application/platform build descriptors `GetEnvironmentInfo`
/// reports, captured by version detection but not persisted in
/// the original v1 `global_versions` shape.
fn migrate_v1_to_v2(tx: &rusqlite::Transaction) -> rusqlite::Result<()> {
    tx.execute("ALTER TABLE global_versions ADD COLUMN application_version TEXT", [])?;
    tx.execute("ALTER TABLE global_versions ADD COLUMN platform_build_version TEXT", [])?;
    Ok(())
}

pub fn current_version(conn: &Connection) -> rusqlite::Result<i64> {
    conn.query_row("SELECT version FROM schema_version LIMIT 1", [], |r| r.get(0)).or(Ok(0))
}

pub fn ensure_schema(conn: &Connection, db_path: &Path) -> Result<(), DatabaseError> {
    let existing = current_version(conn).unwrap_or(0);

    if existing == 0 {
        // Fresh database: create the current schema directly, no stepwise
        // migration needed.
        schema::apply(conn)?;
        conn.execute("DELETE FROM schema_version", [])?;
        conn.execute(
            "INSERT INTO schema_version (version) VALUES (?1)",
            [CURRENT_SCHEMA_VERSION],
        )?;
        return Ok(());
    }

    if existing < CURRENT_SCHEMA_VERSION {
        backup_file(db_path).map_err(|e| DatabaseError::MigrationFailed {
            from: existing,
            to: CURRENT_SCHEMA_VERSION,
            reason: format!("could not create pre-migration backup: {e}"),
        })?;
        run_steps(conn, existing, CURRENT_SCHEMA_VERSION)?;
    }

    Ok(())
}

fn run_steps(conn: &Connection, from: i64, to: i64) -> Result<(), DatabaseError> {
    let mut version = from;
    while version < to {
        let step = MIGRATIONS.iter().find(|(f, _, _)| *f == version).ok_or_else(|| DatabaseError::MigrationFailed {
                from: version,
                to,
                reason: "no migration step registered".to_string(),
            })?;

        let tx = conn.unchecked_transaction().map_err(DatabaseError::Sqlite)?;
        (step.2)(&tx).map_err(|e| DatabaseError::MigrationFailed {
            from: step.0,
            to: step.1,
            reason: e.to_string(),
        })?;
        tx.execute("DELETE FROM schema_version", []).map_err(DatabaseError::Sqlite)?;
        tx.execute("INSERT INTO schema_version (version) VALUES (?1)", [step.1]).map_err(DatabaseError::Sqlite)?;
        tx.commit().map_err(DatabaseError::Sqlite)?;

        version = step.1;
    }
    Ok(())
}

fn backup_file(db_path: &Path) -> std::io::Result<()> {
    if !db_path.exists() {
        return Ok(());
    }
    let backup_path = db_path.with_extension("sqlite.bak");
    std::fs::copy(db_path, backup_path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_database_lands_on_current_version() {
        let conn = Connection::open_in_memory().expect("open");
        schema::apply(&conn).expect("ddl");
        ensure_schema(&conn, Path::new(":memory:")).expect("ensure");
        assert_eq!(current_version(&conn).expect("version"), CURRENT_SCHEMA_VERSION);
    }
}
