// d365fo-cache-core/src/infrastructure/db/pool.rs
//
// Single writer, many readers. The writer pool is capped at
// one connection so every write is serialized through r2d2's checkout queue
// rather than a hand-rolled mutex; the reader pool opens connections
// read-only (`PRAGMA query_only=1`) against the same WAL file so concurrent
// MCP/CLI reads never block on a sync in progress.

use crate::infrastructure::error::{DatabaseError, InfrastructureError};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::OpenFlags;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

/// Disambiguates the shared-cache URI `in_memory()` opens so concurrent
/// tests in the same process never attach to the same named in-memory
/// database (SQLite's shared cache is keyed by this name alone).
static MEM_DB_SEQ: AtomicU64 = AtomicU64::new(0);

pub type Pool = r2d2::Pool<SqliteConnectionManager>;
pub type PooledConn = r2d2::PooledConnection<SqliteConnectionManager>;

#[derive(Clone)]
pub struct MetadataDb {
    write_pool: Pool,
    read_pool: Pool,
}

impl MetadataDb {
    pub fn open(db_path: &Path, max_readers: u32) -> Result<Self, InfrastructureError> {
        let writer_manager = SqliteConnectionManager::file(db_path).with_flags(
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        );
        let write_pool = r2d2::Pool::builder().max_size(1).build(writer_manager).map_err(DatabaseError::Pool)?;

        {
            let conn = write_pool.get().map_err(DatabaseError::Pool)?;
            conn.pragma_update(None, "journal_mode", "WAL")?;
            conn.pragma_update(None, "foreign_keys", true)?;
            conn.pragma_update(None, "synchronous", "NORMAL")?;
        }

        let reader_manager = SqliteConnectionManager::file(db_path).with_flags(OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX);
        let read_pool = r2d2::Pool::builder().max_size(max_readers.max(1)).build(reader_manager).map_err(DatabaseError::Pool)?;

        Ok(MetadataDb {
            write_pool,
            read_pool,
        })
    }

    pub fn in_memory() -> Result<Self, InfrastructureError> {
        // Shared-cache in-memory DB so the same logical database is visible
        // across the writer and reader pools, used by tests only. Each call
        // gets its own name so parallel test threads never see each other's
        // rows through SQLite's global shared-cache registry.
        let id = MEM_DB_SEQ.fetch_add(1, Ordering::SeqCst);
        let uri = format!("file:d365fo_cache_test_{id}?mode=memory&cache=shared");
        let writer_manager = SqliteConnectionManager::file(&uri).with_flags(
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_URI,
        );
        let write_pool = r2d2::Pool::builder().max_size(1).build(writer_manager).map_err(DatabaseError::Pool)?;
        {
            let conn = write_pool.get().map_err(DatabaseError::Pool)?;
            conn.pragma_update(None, "foreign_keys", true)?;
        }

        let reader_manager = SqliteConnectionManager::file(&uri).with_flags(
            OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_URI,
        );
        let read_pool = r2d2::Pool::builder().max_size(4).build(reader_manager).map_err(DatabaseError::Pool)?;

        Ok(MetadataDb {
            write_pool,
            read_pool,
        })
    }

    pub fn writer(&self) -> Result<PooledConn, InfrastructureError> {
        self.write_pool.get().map_err(|e| e.into())
    }

    pub fn reader(&self) -> Result<PooledConn, InfrastructureError> {
        self.read_pool.get().map_err(|e| e.into())
    }
}
