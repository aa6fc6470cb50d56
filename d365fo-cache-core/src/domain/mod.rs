pub mod environment;
pub mod error;
pub mod label;
pub mod metadata;
pub mod ports;
pub mod search;
pub mod sync;
pub mod version;

// Convenient re-exports so callers elsewhere in the crate don't chase paths.
pub use error::DomainError;
