//! Typed errors for the harvester library.
//!
//! Uses `thiserror` for library errors (not `anyhow`) to provide
//! strongly-typed, composable error handling. Job-level failures are a
//! separate type: they never propagate as `Err`, they end up stored on the
//! job and published to the observer.

use thiserror::Error;

use crate::types::job::JobStatus;

/// Errors returned by harvester operations and collaborators.
#[derive(Debug, Error)]
pub enum HarvestError {
    /// Job store operation failed
    #[error("storage error: {0}")]
    Store(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// Tab driver failed to open, navigate or close a surface
    #[error("surface error: {0}")]
    Surface(String),

    /// Page extractor could not be reached or refused the request
    #[error("extractor error: {0}")]
    Extractor(String),

    /// Delivery to the ingestion endpoint failed
    #[error("delivery error: {0}")]
    Delivery(String),

    /// The source is not a page extraction can start from
    #[error("invalid source: {url}")]
    InvalidSource { url: String },

    /// A status change the state machine does not allow
    #[error("invalid transition from {from} to {to}")]
    InvalidTransition { from: JobStatus, to: JobStatus },

    /// Operation was cancelled
    #[error("operation cancelled")]
    Cancelled,

    /// Configuration error
    #[error("config error: {0}")]
    Config(String),

    /// JSON (de)serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl HarvestError {
    /// Wrap any error as a storage error.
    pub fn store(err: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        Self::Store(err.into())
    }
}

/// Why a job ended outside the happy path.
///
/// The `Display` text is the human-readable message stored in `Job::error`
/// and sent on the observer's error channel.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum JobFailure {
    #[error("could not resolve the first review page: {0}")]
    LocatorUnresolvable(String),

    #[error("verification challenge detected; manual intervention required")]
    ChallengeDetected,

    #[error("page extraction failed: {0}")]
    Extraction(String),

    #[error("pagination appears stuck; stopping extraction")]
    PaginationStuck,

    #[error("safety limit reached: more than {limit} pages")]
    SafetyLimitExceeded { limit: u32 },

    #[error("surface navigated away from the review pages ({location})")]
    NavigationIntegrity { location: String },

    #[error("the extraction surface was closed externally")]
    SurfaceLostExternally,

    #[error("navigation to the next page failed: {0}")]
    Navigation(String),

    #[error("failed to submit records: {0}")]
    DeliveryFailure(String),

    #[error("extraction cancelled by user")]
    UserCancelled,
}

/// Result type alias for harvester operations.
pub type Result<T> = std::result::Result<T, HarvestError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_messages_are_human_readable() {
        assert_eq!(
            JobFailure::SafetyLimitExceeded { limit: 100 }.to_string(),
            "safety limit reached: more than 100 pages"
        );
        assert!(JobFailure::ChallengeDetected
            .to_string()
            .contains("manual intervention"));
        assert_eq!(
            JobFailure::Extraction("boom".into()).to_string(),
            "page extraction failed: boom"
        );
    }

    #[test]
    fn test_transition_error_names_both_states() {
        let err = HarvestError::InvalidTransition {
            from: JobStatus::Done,
            to: JobStatus::Running,
        };
        assert_eq!(err.to_string(), "invalid transition from done to running");
    }
}
