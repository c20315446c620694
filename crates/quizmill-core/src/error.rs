//! Assessment error types.
//!
//! Defined in `quizmill-core` so the attempt engine can classify errors for
//! retry decisions without string matching. Store implementations map their
//! backend failures onto these variants.

use thiserror::Error;

/// Errors surfaced by the assessment engine and its stores.
#[derive(Debug, Error)]
pub enum QuizError {
    /// A quiz, question, bank, attempt, or submission does not exist.
    #[error("{0}")]
    NotFound(String),

    /// The request is well-formed but not allowed in the current state
    /// (deadline passed, quota exhausted, already submitted, ownership
    /// mismatch).
    #[error("{0}")]
    BadRequest(String),

    /// A question or tag failed authoring-time validation, or a numeric
    /// expression could not be evaluated.
    #[error("validation error: {0}")]
    Validation(String),

    /// A transaction could not commit because a concurrent transaction won.
    /// Safe to retry the whole operation.
    #[error("transaction conflict: {0}")]
    Conflict(String),

    /// A persistence failure. Never carries backend internals to the caller.
    #[error("internal error: {0}")]
    Internal(String),
}

impl QuizError {
    /// Returns `true` if the operation that produced this error may be
    /// retried as a whole.
    pub fn is_transient(&self) -> bool {
        matches!(self, QuizError::Conflict(_))
    }
}

impl From<crate::expr::ExprError> for QuizError {
    fn from(err: crate::expr::ExprError) -> Self {
        QuizError::Validation(err.to_string())
    }
}
