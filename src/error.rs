use thiserror::Error;

#[derive(Error, Debug)]
pub enum LacatError {
    #[error("Wallet connection failed: {0}")]
    ConnectionError(String),

    #[error("Transaction rejected by signer: {0}")]
    Rejected(String),

    #[error("Fetch failed: {0}")]
    TransientFetch(String),

    #[error("Transaction submission failed: {0}")]
    SubmissionFailed(String),

    #[error("Transaction reverted: {0}")]
    Reverted(String),

    #[error("Timed out waiting for confirmation of {0}")]
    ConfirmationTimeout(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Internal error: {0}")]
    InternalError(String),
}

impl LacatError {
    /// True when the signer declined the request.
    pub fn is_rejection(&self) -> bool {
        matches!(self, LacatError::Rejected(_))
    }
}

pub type Result<T> = std::result::Result<T, LacatError>;
