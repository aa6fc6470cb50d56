pub mod global_version;

pub use global_version::{GlobalVersion, InstalledModule, Module};
