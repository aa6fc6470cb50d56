// d365fo-cache-core/src/infrastructure/config/mod.rs

pub mod profiles;
pub mod settings;

pub use profiles::{EnvironmentRef, ProfileRegistry};
pub use settings::{AuthMode, CacheConfig};
