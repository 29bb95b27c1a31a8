use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::intent::types::SlotName;

/// Closed error taxonomy of the pipeline.
///
/// `LowConfidence` and `MissingSlot` are routing outcomes, not failures: they are
/// handled inside the resolver and never surface to the user as errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    ParseEmpty,
    LowConfidence,
    MissingSlot,
    CollaboratorTimeout,
    CollaboratorRateLimited,
    CollaboratorUnavailable,
    CollaboratorAuthRequired,
    InternalStateCorrupt,
}

impl ErrorKind {
    /// Timeouts and rate limits are retried by the dispatcher before surfacing.
    pub fn is_retryable(self) -> bool {
        matches!(self, ErrorKind::CollaboratorTimeout | ErrorKind::CollaboratorRateLimited)
    }
}

/// Failure of a single collaborator call.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CollaboratorError {
    #[error("collaborator call timed out")]
    Timeout,
    #[error("collaborator rate limited the request")]
    RateLimited,
    #[error("collaborator unavailable: {0}")]
    Unavailable(String),
    #[error("collaborator requires authorization")]
    AuthRequired,
    #[error("no match for {0:?}")]
    NotFound(String),
}

impl CollaboratorError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            CollaboratorError::Timeout => ErrorKind::CollaboratorTimeout,
            CollaboratorError::RateLimited => ErrorKind::CollaboratorRateLimited,
            CollaboratorError::AuthRequired => ErrorKind::CollaboratorAuthRequired,
            // A miss that reaches the taxonomy means the collaborator could not answer
            CollaboratorError::Unavailable(_) | CollaboratorError::NotFound(_) => {
                ErrorKind::CollaboratorUnavailable
            }
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.kind().is_retryable()
    }
}

/// Resolver-internal failures.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ResolveError {
    #[error("required slot {0} is not filled")]
    MissingSlot(SlotName),
    #[error("dialogue state invariant violated: {0}")]
    StateCorrupt(String),
}

impl ResolveError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ResolveError::MissingSlot(_) => ErrorKind::MissingSlot,
            ResolveError::StateCorrupt(_) => ErrorKind::InternalStateCorrupt,
        }
    }
}

/// Record-store failure. Surfaces to the dispatcher as an unavailable collaborator.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("record store I/O: {0}")]
    Io(#[from] std::io::Error),
    #[error("record store encoding: {0}")]
    Encoding(#[from] serde_json::Error),
}

impl From<StoreError> for CollaboratorError {
    fn from(err: StoreError) -> Self {
        CollaboratorError::Unavailable(err.to_string())
    }
}
