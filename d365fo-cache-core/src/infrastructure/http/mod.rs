// d365fo-cache-core/src/infrastructure/http/mod.rs

pub mod odata_client;
pub mod token;

pub use odata_client::ReqwestODataClient;
pub use token::{ClientCredentialsTokenProvider, StaticTokenProvider};
