//! Typed error hierarchy for the validation pipeline.

use thiserror::Error;

/// Errors from the pipeline orchestrator and its collaborators.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Run {id} not found")]
    RunNotFound { id: String },

    #[error("Run {id} is not awaiting a decision (status: {status})")]
    DecisionConflict { id: String, status: String },

    #[error("Invalid submission: {0}")]
    InvalidSubmission(String),

    #[error("Failed to fetch {url}: {message}")]
    FetchFailed { url: String, message: String },

    #[error("Store error: {0}")]
    Store(#[source] anyhow::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_not_found_carries_id() {
        let err = PipelineError::RunNotFound {
            id: "abc-123".to_string(),
        };
        match &err {
            PipelineError::RunNotFound { id } => assert_eq!(id, "abc-123"),
            _ => panic!("Expected RunNotFound"),
        }
        assert!(err.to_string().contains("abc-123"));
    }

    #[test]
    fn decision_conflict_names_current_status() {
        let err = PipelineError::DecisionConflict {
            id: "r1".to_string(),
            status: "checking".to_string(),
        };
        assert!(err.to_string().contains("checking"));
    }

    #[test]
    fn fetch_failed_carries_url_and_message() {
        let err = PipelineError::FetchFailed {
            url: "https://example.org".to_string(),
            message: "HTTP 503".to_string(),
        };
        match &err {
            PipelineError::FetchFailed { url, message } => {
                assert_eq!(url, "https://example.org");
                assert_eq!(message, "HTTP 503");
            }
            _ => panic!("Expected FetchFailed"),
        }
    }

    #[test]
    fn converts_from_anyhow() {
        let err: PipelineError = anyhow::anyhow!("boom").into();
        assert!(matches!(err, PipelineError::Other(_)));
    }

    #[test]
    fn implements_std_error() {
        fn assert_std_error<E: std::error::Error>(_: &E) {}
        assert_std_error(&PipelineError::InvalidSubmission("x".into()));
    }
}
