use thiserror::Error;

/// Failure modes of `InferenceService::process_capture`.
#[derive(Debug, Error)]
pub enum InferenceError {
    /// Malformed upload. Nothing was persisted.
    #[error("invalid payload: {0}")]
    InvalidPayload(String),
    #[error("classification failed: {0:#}")]
    Classification(anyhow::Error),
    #[error("storage failed: {0:#}")]
    Storage(anyhow::Error),
}

impl InferenceError {
    pub fn is_client_error(&self) -> bool {
        matches!(self, InferenceError::InvalidPayload(_))
    }
}
