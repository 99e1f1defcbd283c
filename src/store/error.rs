#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("save '{0}' not found")]
    NotFound(String),

    #[error("save limit of {limit} reached, delete an old save first")]
    QuotaExceeded { limit: usize },

    #[error("save data is corrupt: {0}")]
    Corrupt(String),

    #[error("not signed in")]
    Unauthenticated,

    #[error("storage I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("remote store error: {0}")]
    Remote(String),

    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StoreError {
    /// A local read that failed this way may be served from the remote copy.
    pub fn allows_remote_fallback(&self) -> bool {
        matches!(self, StoreError::NotFound(_) | StoreError::Corrupt(_))
    }
}

impl From<reqwest::Error> for StoreError {
    fn from(e: reqwest::Error) -> Self {
        if e.status().is_some_and(|s| s.as_u16() == 401) {
            StoreError::Unauthenticated
        } else {
            StoreError::Remote(e.to_string())
        }
    }
}
