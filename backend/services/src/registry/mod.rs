pub mod client;
pub mod error;
pub mod manifest;
pub mod rate_limit;

pub use client::{RegistryClient, RegistryConfig, RepositoryClient};
pub use error::RegistryError;
pub use manifest::{Manifest, VersionInfo, format_history};
pub use rate_limit::RateLimiter;
