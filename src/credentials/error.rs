use thiserror::Error;

#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("keyring error: {0}")]
    Keyring(#[from] keyring::Error),

    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("connection pool error: {0}")]
    Pool(#[from] r2d2::Error),

    #[error("malformed secret blob: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("no connection found with id {0}")]
    NotFound(String),

    #[error("http error during token refresh: {0}")]
    Http(#[from] reqwest::Error),
}
