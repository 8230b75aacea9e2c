use thiserror::Error;

#[derive(Error, Debug)]
pub enum HubError {
    #[error("Malformed key: {0}")]
    MalformedKey(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid channel: {0}")]
    InvalidChannel(String),

    #[error("Content key already assigned: {0}")]
    KeyAlreadyAssigned(String),

    #[error("Backend failure: {0}")]
    Backend(String),

    #[error("Peer unreachable: {0}")]
    PeerUnreachable(String),

    #[error("Peer configuration invalid: {0}")]
    PeerConfigInvalid(String),

    #[error("Transport failure: {0}")]
    Transport(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Object store error: {0}")]
    ObjectStore(#[from] object_store::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, HubError>;
