// d365fo-cache-core/src/infrastructure/error.rs

use crate::error::ErrorKind;
use crate::ports::odata::HttpError;
use miette::Diagnostic;
use thiserror::Error;

#[derive(Error, Debug, Diagnostic)]
pub enum DatabaseError {
    #[error("SQLite engine error: {0}")]
    #[diagnostic(
        code(d365fo::infra::database::sqlite),
        help("An error occurred inside the SQL engine.")
    )]
    Sqlite(#[from] rusqlite::Error),

    #[error("connection pool error: {0}")]
    #[diagnostic(code(d365fo::infra::database::pool))]
    Pool(#[from] r2d2::Error),

    #[error("schema migration failed going from v{from} to v{to}: {reason}")]
    #[diagnostic(
        code(d365fo::infra::database::migration),
        help("the database was restored from its pre-migration backup copy and opened read-only")
    )]
    MigrationFailed { from: i64, to: i64, reason: String },
}

#[derive(Error, Debug, Diagnostic)]
pub enum InfrastructureError {
    // --- DATABASE (abstracted) ---
    #[error(transparent)]
    #[diagnostic(transparent)]
    Database(#[from] DatabaseError),

    // --- FILESYSTEM (IO) ---
    #[error("filesystem error: {0}")]
    #[diagnostic(code(d365fo::infra::io), help("check file permissions or path validity"))]
    Io(#[from] std::io::Error),

    // --- CONFIG / YAML ---
    #[error("YAML parsing error: {0}")]
    #[diagnostic(code(d365fo::infra::yaml), help("check your YAML syntax (indentation, types)"))]
    YamlError(#[from] serde_yaml::Error),

    #[error("JSON parsing error: {0}")]
    #[diagnostic(code(d365fo::infra::json))]
    JsonError(#[from] serde_json::Error),

    #[error("configuration error: {0}")]
    ConfigError(String),

    #[error("profile '{0}' not found")]
    #[diagnostic(code(d365fo::infra::profile_missing))]
    ProfileNotFound(String),

    // --- TRANSPORT ---
    #[error(transparent)]
    #[diagnostic(code(d365fo::infra::transport))]
    Transport(#[from] HttpError),

    // --- PARSING OF REMOTE PAYLOADS ---
    #[error("failed to parse remote payload: {0}")]
    #[diagnostic(code(d365fo::infra::parse))]
    ParseError(String),
}

impl InfrastructureError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            InfrastructureError::Database(DatabaseError::MigrationFailed { .. }) => {
                ErrorKind::Schema
            }
            InfrastructureError::Transport(_) => ErrorKind::Transport,
            InfrastructureError::ParseError(_) => ErrorKind::Parse,
            _ => ErrorKind::Internal,
        }
    }
}

// Manual shortcuts so `?` works directly on rusqlite/r2d2 calls, same
// convenience the teacher keeps for `duckdb::Error`.
impl From<rusqlite::Error> for InfrastructureError {
    fn from(err: rusqlite::Error) -> Self {
        InfrastructureError::Database(DatabaseError::Sqlite(err))
    }
}

impl From<r2d2::Error> for InfrastructureError {
    fn from(err: r2d2::Error) -> Self {
        InfrastructureError::Database(DatabaseError::Pool(err))
    }
}
