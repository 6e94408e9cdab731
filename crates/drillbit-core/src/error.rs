use std::fmt;

use thiserror::Error;

/// Which of the two datastores a failure came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreKind {
    Behavioral,
    Conversion,
}

impl fmt::Display for StoreKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreKind::Behavioral => f.write_str("behavioral"),
            StoreKind::Conversion => f.write_str("conversion"),
        }
    }
}

/// Engine-level error taxonomy.
///
/// `InvalidRequest` is raised before any query executes. `DownstreamUnavailable`
/// covers pool exhaustion, timeouts and driver failures against either store;
/// callers may retry it with backoff, the engine never does. Conversion
/// buckets that cannot be attributed are not errors and never surface here.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("invalid request: {field}: {message}")]
    InvalidRequest { field: String, message: String },

    #[error("{store} store unavailable: {reason}")]
    DownstreamUnavailable { store: StoreKind, reason: String },

    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl EngineError {
    pub fn invalid(field: impl Into<String>, message: impl Into<String>) -> Self {
        EngineError::InvalidRequest {
            field: field.into(),
            message: message.into(),
        }
    }

    pub fn unavailable(store: StoreKind, reason: impl Into<String>) -> Self {
        EngineError::DownstreamUnavailable {
            store,
            reason: reason.into(),
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, EngineError::DownstreamUnavailable { .. })
    }
}

pub type EngineResult<T> = Result<T, EngineError>;
