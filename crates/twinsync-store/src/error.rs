use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("entity {id} not found")]
    NotFound { id: String },
    #[error("entity {id} changed since it was read (precondition failed)")]
    PreconditionFailed { id: String },
    #[error("patch rejected for entity {id}: {message}")]
    Rejected { id: String, message: String },
    #[error("store returned HTTP {status}: {body}")]
    Http { status: u16, body: String },
    #[error("network error: {0}")]
    Network(String),
    #[error("invalid store response: {0}")]
    InvalidResponse(String),
    #[error("invalid store configuration: {0}")]
    Config(String),
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

impl From<reqwest::Error> for StoreError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            StoreError::InvalidResponse(err.to_string())
        } else {
            StoreError::Network(err.to_string())
        }
    }
}
