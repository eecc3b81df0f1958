use thiserror::Error;

#[derive(Error, Debug)]
pub enum RecError {
    /// No vote history, cold user or cold item. Recovered locally.
    #[error("Data unavailable: {0}")]
    DataUnavailable(String),

    #[error("Source {source_name} timed out after {timeout_ms}ms")]
    SourceTimeout {
        source_name: &'static str,
        timeout_ms: u64,
    },

    #[error("Source {source_name} failed: {message}")]
    SourceFailed {
        source_name: &'static str,
        message: String,
    },

    /// A contract violation inside the numeric core (e.g. a singular ALS system).
    #[error("Computation error: {0}")]
    Computation(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

impl RecError {
    /// Whether the error only removes one source from the merge.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, RecError::Computation(_) | RecError::InvalidRequest(_))
    }
}

pub type RecResult<T> = std::result::Result<T, RecError>;
