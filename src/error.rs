use thiserror::Error;

#[derive(Error, Debug)]
pub enum GatewayError {
    /// Schema metadata unavailable or empty. The only error that aborts a request.
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Translation error: {0}")]
    Translation(String),

    #[error("Execution error: {0}")]
    Execution(String),

    #[error("Confirmation expired for session '{0}'")]
    ExpiredConfirmation(String),

    #[error("No pending operation for session '{0}'")]
    NoPendingOperation(String),

    #[error("LLM error: {0}")]
    Llm(String),

    #[error("Warehouse error: {0}")]
    Warehouse(String),

    #[error("Pending store error: {0}")]
    Store(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl GatewayError {
    /// Fatal errors surface as a protocol-level failure; everything else
    /// becomes a conversational reply.
    pub fn is_fatal(&self) -> bool {
        matches!(self, GatewayError::Configuration(_))
    }
}

impl From<rusqlite::Error> for GatewayError {
    fn from(e: rusqlite::Error) -> Self {
        GatewayError::Store(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, GatewayError>;
