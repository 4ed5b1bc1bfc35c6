use crate::api::ApiError;
use crate::models::Phase;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SessionError {
    // Definition fetch failed or returned not-found; not retryable from the
    // session view, the caller should route back to a safe landing view.
    #[error("failed to load test definition: {0}")]
    Load(#[source] ApiError),

    // Submission failed; the session stays in progress and persisted answers
    // are retained, so a manual retry or reload can recover.
    #[error("failed to submit answers: {0}")]
    Submission(#[source] ApiError),

    #[error("authentication required")]
    AuthRequired,

    #[error("{operation} is not allowed in phase {phase:?}")]
    InvalidPhase {
        operation: &'static str,
        phase: Phase,
    },

    #[error("question {0} is not part of this test")]
    UnknownQuestion(i64),

    // The portal has not opened a grading session for this test yet.
    #[error("no open grading session for this test")]
    SessionNotOpen,
}

impl SessionError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, SessionError::Submission(_))
    }
}
