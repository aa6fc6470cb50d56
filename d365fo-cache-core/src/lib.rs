// d365fo-cache-core/src/lib.rs

// 1. Mandatory documentation for production code
#![allow(missing_docs)] // relax doc-coverage for now, tighten once the public API stabilizes

// 2. Memory safety
#![deny(unsafe_code)]
// 3. Robustness
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]
// 4. Performance
#![warn(clippy::perf)]

// --- HEXAGONAL MODULES ---

// 1. Ports (external collaborator interfaces)
// TokenProvider, ODataClient, Clock, FsRoot — consumed, not implemented, by the core.
pub mod ports;

// 2. Domain (core business rules)
// Global versions, metadata shapes, sync session state machine, search ranking.
// Depends on nothing else (no infra, no application).
pub mod domain;

// 3. Infrastructure (adapters)
// SQLite-backed store, disk/memory cache tiers, default HTTP adapters, config loading.
// Depends on domain and ports.
pub mod infrastructure;

// 4. Application (use cases)
// Orchestration: version detection, sync, search, label resolution, the public read API.
// Depends on domain, infrastructure and ports.
pub mod application;

// --- TOP-LEVEL ERROR FACADE ---
pub mod error;

// --- RE-EXPORTS ---
// Lets downstream crates do: `use d365fo_cache_core::CoreError;`
pub use error::CoreError;
pub use application::core::Core;
