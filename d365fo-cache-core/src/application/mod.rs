// d365fo-cache-core/src/application/mod.rs
//
// Use-case layer: orchestrates domain rules over infrastructure
// adapters. `core` is the facade every consumer (CLI, MCP) is built
// against; the other modules are its internal collaborators and stay
// `pub` only so they can be unit-tested and wired directly in tests that
// don't need the whole facade.

pub mod core;
pub mod global_version_manager;
pub mod label_resolver;
pub mod sync_orchestrator;
pub mod version_detector;

pub use core::Core;
pub use global_version_manager::GlobalVersionManager;
pub use label_resolver::LabelResolver;
pub use sync_orchestrator::{ProgressCallback, SyncOrchestrator};
pub use version_detector::{DetectedVersion, VersionDetector};
