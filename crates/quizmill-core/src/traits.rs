//! Store contracts the attempt engine runs against.
//!
//! These async traits are implemented by the `quizmill-store` crate.
//! Questions, banks, and quiz settings are authored elsewhere and read-only
//! here; attempt state goes through an explicit unit-of-work handle so every
//! multi-entity mutation commits or rolls back as one.

use async_trait::async_trait;
use uuid::Uuid;

use crate::attempt::{Attempt, Submission, UserQuizMetrics};
use crate::error::QuizError;
use crate::model::{Question, QuestionBank, QuizSettings};

// ---------------------------------------------------------------------------
// Question / bank catalog
// ---------------------------------------------------------------------------

/// Read access to the question catalog.
#[async_trait]
pub trait QuestionStore: Send + Sync {
    /// Fetch a question by id. `NotFound` if it does not exist.
    async fn question(&self, id: Uuid) -> Result<Question, QuizError>;

    /// Fetch a question bank by id. `NotFound` if it does not exist.
    async fn bank(&self, id: Uuid) -> Result<QuestionBank, QuizError>;
}

// ---------------------------------------------------------------------------
// Quiz settings
// ---------------------------------------------------------------------------

/// Read access to per-quiz configuration.
#[async_trait]
pub trait QuizStore: Send + Sync {
    /// Fetch the settings of a quiz. `NotFound` if the quiz does not exist.
    async fn settings(&self, quiz_id: Uuid) -> Result<QuizSettings, QuizError>;
}

// ---------------------------------------------------------------------------
// Attempt state unit of work
// ---------------------------------------------------------------------------

/// Opens transactions over attempt state.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Begin a transaction. All reads observe a consistent snapshot; writes
    /// become visible only on [`StateTx::commit`].
    async fn begin(&self) -> Result<Box<dyn StateTx>, QuizError>;
}

/// One transaction over attempts, submissions, and metrics.
///
/// Dropping the handle without committing discards every buffered write;
/// [`StateTx::commit`] fails with a transient [`QuizError::Conflict`] when a
/// concurrent transaction committed first, in which case the caller retries
/// the whole operation.
#[async_trait]
pub trait StateTx: Send {
    async fn attempt(&mut self, id: Uuid) -> Result<Option<Attempt>, QuizError>;

    /// Insert or overwrite an attempt.
    async fn put_attempt(&mut self, attempt: &Attempt) -> Result<(), QuizError>;

    /// The submission recorded for an attempt, if any. There is never more
    /// than one.
    async fn submission_for_attempt(
        &mut self,
        attempt_id: Uuid,
    ) -> Result<Option<Submission>, QuizError>;

    async fn put_submission(&mut self, submission: &Submission) -> Result<(), QuizError>;

    /// The metrics record for a `(user, quiz)` pair, if one exists yet.
    async fn metrics(
        &mut self,
        user_id: Uuid,
        quiz_id: Uuid,
    ) -> Result<Option<UserQuizMetrics>, QuizError>;

    async fn put_metrics(&mut self, metrics: &UserQuizMetrics) -> Result<(), QuizError>;

    /// Atomically publish every buffered write.
    async fn commit(self: Box<Self>) -> Result<(), QuizError>;

    /// Explicitly discard the transaction. Equivalent to dropping it.
    async fn rollback(self: Box<Self>) -> Result<(), QuizError>;
}
