use reqwest::StatusCode;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RegistryError {
    /// The token endpoint refused us; bad or revoked credentials.
    #[error("Failed to authenticate with registry: {0}")]
    Auth(String),
    /// Still 401 after fetching a fresh token. Usually the repository was
    /// deleted or made private.
    #[error("401 Unauthorized: {0}")]
    Unauthorized(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("No tags exist for {0}")]
    EmptyRepository(String),
    #[error("Rate limited by registry")]
    RateLimited,
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("Unexpected status {status} from {url}")]
    UnexpectedStatus { status: StatusCode, url: String },
    #[error("Invalid manifest: {0}")]
    InvalidManifest(String),
    #[error("Invalid content length for blob {0}")]
    InvalidContentLength(String),
}

impl RegistryError {
    /// Errors worth another attempt later rather than a verdict on the image.
    pub fn is_transient(&self) -> bool {
        match self {
            RegistryError::RateLimited => true,
            RegistryError::Network(e) => !e.is_decode(),
            RegistryError::UnexpectedStatus { status, .. } => status.is_server_error(),
            _ => false,
        }
    }
}
