// d365fo-cache-core/src/infrastructure/db/mod.rs

pub mod fts;
pub mod migrations;
pub mod pool;
pub mod repository;
pub mod schema;

pub use pool::MetadataDb;
pub use repository::MetadataRepository;
