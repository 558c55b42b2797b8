use thiserror::Error;

#[derive(Debug, Error)]
pub enum StateError {
    #[error("failed to read state file {path}: {source}")]
    Read { path: String, source: std::io::Error },

    #[error("failed to write state file {path}: {source}")]
    Write { path: String, source: std::io::Error },

    #[error("malformed state file: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("no connection found with id {0}")]
    ConnectionNotFound(String),

    #[error("no alias or provider/model found for {0}")]
    UnknownAlias(String),

    #[error("no combo named {0}")]
    UnknownCombo(String),
}
