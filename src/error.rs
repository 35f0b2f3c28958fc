use thiserror::Error;

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Network error: {0}")]
    Network(String),

    #[error("API error ({status:?}): {message}")]
    Api { status: Option<u16>, message: String },

    #[error("Invalid subscription type: {0}")]
    InvalidSubscriptionType(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Cloud error: {0}")]
    Cloud(String),

    #[error("Corrupted backup: {0}")]
    CorruptBackup(String),

    #[error("Precondition failed: {0}")]
    Precondition(String),
}

impl SyncError {
    pub fn storage(msg: impl Into<String>) -> Self {
        SyncError::Storage(msg.into())
    }

    pub fn network(msg: impl Into<String>) -> Self {
        SyncError::Network(msg.into())
    }

    pub fn cloud(msg: impl Into<String>) -> Self {
        SyncError::Cloud(msg.into())
    }

    pub fn api(status: u16, msg: impl Into<String>) -> Self {
        SyncError::Api {
            status: Some(status),
            message: msg.into(),
        }
    }

    /// The account API answered 404, i.e. there is no account for this session.
    pub fn is_not_found(&self) -> bool {
        matches!(self, SyncError::Api { status: Some(404), .. })
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;
