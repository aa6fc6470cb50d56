// d365fo-cache-core/src/domain/error.rs

use miette::Diagnostic;
use thiserror::Error;

#[derive(Error, Debug, Diagnostic)]
pub enum DomainError {
    #[error("invalid sync session transition: {from:?} -> {to:?}")]
    #[diagnostic(
        code(d365fo::domain::sync_transition),
        help("terminal states (completed, failed, cancelled) cannot transition further")
    )]
    InvalidSyncTransition {
        from: crate::domain::sync::SyncState,
        to: crate::domain::sync::SyncState,
    },

    #[error("module list is empty, cannot compute a global version fingerprint")]
    #[diagnostic(code(d365fo::domain::empty_module_list))]
    EmptyModuleList,

    #[error("label id '{0}' does not match the '@<module><number>' shape")]
    #[diagnostic(code(d365fo::domain::bad_label_id))]
    MalformedLabelId(String),

    #[error("search query must set `text` when `use_fulltext` is true")]
    #[diagnostic(code(d365fo::domain::bad_search_query))]
    EmptyFulltextQuery,
}
