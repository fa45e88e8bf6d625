use thiserror::Error;

pub const FK_VIOLATION_CODE: &str = "23503";

/// Failure reported by the remote store. `status` is HTTP-like; `0` means the
/// request never produced a response (transport error or timeout).
#[derive(Debug, Clone, Error)]
#[error("remote error ({status}): {message}")]
pub struct RemoteError {
    pub status: u16,
    pub code: Option<String>,
    pub message: String,
}

impl RemoteError {
    pub fn new(status: u16, message: impl Into<String>) -> Self {
        Self {
            status,
            code: None,
            message: message.into(),
        }
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    pub fn transport(message: impl Into<String>) -> Self {
        Self::new(0, message)
    }

    pub fn timeout(operation: &str, timeout_ms: u64) -> Self {
        Self::transport(format!("{operation} timed out after {timeout_ms}ms"))
    }

    pub fn is_foreign_key_violation(&self) -> bool {
        self.code.as_deref() == Some(FK_VIOLATION_CODE)
            || self.message.to_ascii_lowercase().contains("foreign key")
    }
}

impl From<reqwest::Error> for RemoteError {
    fn from(err: reqwest::Error) -> Self {
        match err.status() {
            Some(status) => RemoteError::new(status.as_u16(), err.to_string()),
            None => RemoteError::transport(err.to_string()),
        }
    }
}

#[derive(Debug, Error)]
pub enum ShadowError {
    #[error(transparent)]
    Remote(#[from] RemoteError),

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("checksum mismatch for {source_label}: recorded {recorded}, computed {computed}")]
    ChecksumMismatch {
        source_label: String,
        recorded: String,
        computed: String,
    },

    #[error("snapshot not found: {0}")]
    SnapshotNotFound(String),

    #[error("another cycle holds the lock at {0}")]
    Locked(String),
}

pub type ShadowResult<T> = std::result::Result<T, ShadowError>;
