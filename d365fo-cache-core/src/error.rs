// d365fo-cache-core/src/error.rs

use crate::domain::error::DomainError;
use crate::infrastructure::error::InfrastructureError;
use thiserror::Error;

/// Structured error kind, matching spec §7's error taxonomy one-to-one.
/// Kept separate from `CoreError` so callers (CLI, MCP tools) can match on
/// a plain enum without pattern-matching through the `#[from]` wrapper tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Auth,
    Transport,
    Parse,
    VersionDetection,
    SyncConflict,
    NotFound,
    Schema,
    Cancelled,
    NotCancellable,
    Internal,
}

#[derive(Error, Debug)]
pub enum CoreError {
    // --- DOMAIN ERRORS (invariant violations, state machine misuse) ---
    #[error(transparent)]
    Domain(#[from] DomainError),

    // --- INFRASTRUCTURE ERRORS (IO, SQL, HTTP, parsing) ---
    #[error(transparent)]
    Infrastructure(#[from] InfrastructureError),

    // --- AUTH ---
    #[error("authentication failed: {0}")]
    Auth(String),

    // --- VERSION DETECTION ---
    #[error("version detection failed: {0}")]
    VersionDetection(String),

    // --- SYNC ---
    #[error("a sync session is already running for this environment: {session_id}")]
    SyncConflict { session_id: String },

    #[error("sync session {0} cannot be cancelled (already terminal)")]
    NotCancellable(String),

    #[error("sync session {0} was cancelled")]
    Cancelled(String),

    // --- LOOKUPS ---
    #[error("{kind} '{name}' not found for the active version")]
    NotFound { kind: &'static str, name: String },

    // --- GENERIC ---
    #[error("internal error: {0}")]
    InternalError(String),
}

impl CoreError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            CoreError::Domain(_) => ErrorKind::Internal,
            CoreError::Infrastructure(e) => e.kind(),
            CoreError::Auth(_) => ErrorKind::Auth,
            CoreError::VersionDetection(_) => ErrorKind::VersionDetection,
            CoreError::SyncConflict { .. } => ErrorKind::SyncConflict,
            CoreError::NotCancellable(_) => ErrorKind::NotCancellable,
            CoreError::Cancelled(_) => ErrorKind::Cancelled,
            CoreError::NotFound { .. } => ErrorKind::NotFound,
            CoreError::InternalError(_) => ErrorKind::Internal,
        }
    }

    /// Whether the operation that produced this error is safe to retry
    /// per spec §7's propagation policy (idempotent transport errors only).
    pub fn retryable(&self) -> bool {
        matches!(
            self,
            CoreError::Infrastructure(InfrastructureError::Transport(_))
        )
    }

    pub fn http_status(&self) -> Option<u16> {
        match self {
            CoreError::Infrastructure(InfrastructureError::Transport(t)) => t.status,
            _ => None,
        }
    }

    /// The `{kind, message, session_id?, http_status?, retryable}` structured
    /// error shape from spec §7, as a JSON value MCP tools can return directly.
    pub fn to_structured(&self, session_id: Option<&str>) -> serde_json::Value {
        serde_json::json!({
            "kind": format!("{:?}", self.kind()),
            "message": self.to_string(),
            "session_id": session_id,
            "http_status": self.http_status(),
            "retryable": self.retryable(),
        })
    }
}

// Manual impls so `?` works directly on std/io and rusqlite calls without an
// intermediate `.map_err`, same shortcut the teacher keeps for `duckdb::Error`.
impl From<std::io::Error> for CoreError {
    fn from(err: std::io::Error) -> Self {
        CoreError::Infrastructure(InfrastructureError::Io(err))
    }
}

impl From<rusqlite::Error> for CoreError {
    fn from(err: rusqlite::Error) -> Self {
        CoreError::Infrastructure(InfrastructureError::Database(
            crate::infrastructure::error::DatabaseError::Sqlite(err),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_cancellable_reports_its_kind() {
        let err = CoreError::NotCancellable("sess-1".into());
        assert_eq!(err.kind(), ErrorKind::NotCancellable);
        assert!(!err.retryable());
    }

    #[test]
    fn structured_shape_carries_session_id() {
        let err = CoreError::SyncConflict {
            session_id: "sess-2".into(),
        };
        let v = err.to_structured(Some("sess-2"));
        assert_eq!(v["kind"], "SyncConflict");
        assert_eq!(v["session_id"], "sess-2");
    }
}
