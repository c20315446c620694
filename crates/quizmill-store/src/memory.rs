//! In-memory store with optimistic transactions.
//!
//! The catalog side (questions, banks, quiz settings) is plain keyed
//! storage. Attempt state lives in a versioned snapshot: a transaction
//! clones the snapshot, buffers its writes there, and commits by swapping
//! the shared state — failing with a retryable conflict when another
//! transaction committed in between, the same read-then-write atomicity a
//! database transaction provides.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

use async_trait::async_trait;
use uuid::Uuid;

use quizmill_core::attempt::{Attempt, Submission, UserQuizMetrics};
use quizmill_core::error::QuizError;
use quizmill_core::loader::BankFixture;
use quizmill_core::model::{Question, QuestionBank, QuizSettings};
use quizmill_core::traits::{QuestionStore, QuizStore, StateStore, StateTx};

#[derive(Debug, Default, Clone)]
struct StateSnapshot {
    version: u64,
    attempts: HashMap<Uuid, Attempt>,
    submissions: HashMap<Uuid, Submission>,
    metrics: HashMap<(Uuid, Uuid), UserQuizMetrics>,
}

/// An embedded store holding everything in process memory.
#[derive(Default)]
pub struct MemoryStore {
    questions: RwLock<HashMap<Uuid, Question>>,
    banks: RwLock<HashMap<Uuid, QuestionBank>>,
    quizzes: RwLock<HashMap<Uuid, QuizSettings>>,
    state: Arc<Mutex<StateSnapshot>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_question(&self, question: Question) {
        write_lock(&self.questions).insert(question.id, question);
    }

    pub fn insert_bank(&self, bank: QuestionBank) {
        write_lock(&self.banks).insert(bank.id, bank);
    }

    pub fn insert_quiz(&self, settings: QuizSettings) {
        write_lock(&self.quizzes).insert(settings.quiz_id, settings);
    }

    /// Current settings of a quiz, if present. Handy for tests that adjust
    /// a quiz mid-flight.
    pub fn settings_snapshot(&self, quiz_id: Uuid) -> Option<QuizSettings> {
        read_lock(&self.quizzes).get(&quiz_id).cloned()
    }

    /// Load a parsed bank fixture: the bank plus all its questions.
    pub fn insert_fixture(&self, fixture: BankFixture) {
        for question in fixture.questions {
            self.insert_question(question);
        }
        self.insert_bank(fixture.bank);
    }
}

fn write_lock<T>(lock: &RwLock<T>) -> std::sync::RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|err| err.into_inner())
}

fn read_lock<T>(lock: &RwLock<T>) -> std::sync::RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|err| err.into_inner())
}

fn state_lock(state: &Mutex<StateSnapshot>) -> std::sync::MutexGuard<'_, StateSnapshot> {
    state.lock().unwrap_or_else(|err| err.into_inner())
}

#[async_trait]
impl QuestionStore for MemoryStore {
    async fn question(&self, id: Uuid) -> Result<Question, QuizError> {
        read_lock(&self.questions)
            .get(&id)
            .cloned()
            .ok_or_else(|| QuizError::NotFound(format!("question {id} not found")))
    }

    async fn bank(&self, id: Uuid) -> Result<QuestionBank, QuizError> {
        read_lock(&self.banks)
            .get(&id)
            .cloned()
            .ok_or_else(|| QuizError::NotFound(format!("question bank {id} not found")))
    }
}

#[async_trait]
impl QuizStore for MemoryStore {
    async fn settings(&self, quiz_id: Uuid) -> Result<QuizSettings, QuizError> {
        read_lock(&self.quizzes)
            .get(&quiz_id)
            .cloned()
            .ok_or_else(|| QuizError::NotFound(format!("quiz {quiz_id} not found")))
    }
}

#[async_trait]
impl StateStore for MemoryStore {
    async fn begin(&self) -> Result<Box<dyn StateTx>, QuizError> {
        let snapshot = state_lock(&self.state).clone();
        tracing::trace!(version = snapshot.version, "transaction started");
        Ok(Box::new(MemoryTx {
            base_version: snapshot.version,
            snapshot,
            shared: Arc::clone(&self.state),
        }))
    }
}

/// One transaction over the state snapshot.
struct MemoryTx {
    base_version: u64,
    snapshot: StateSnapshot,
    shared: Arc<Mutex<StateSnapshot>>,
}

#[async_trait]
impl StateTx for MemoryTx {
    async fn attempt(&mut self, id: Uuid) -> Result<Option<Attempt>, QuizError> {
        Ok(self.snapshot.attempts.get(&id).cloned())
    }

    async fn put_attempt(&mut self, attempt: &Attempt) -> Result<(), QuizError> {
        self.snapshot.attempts.insert(attempt.id, attempt.clone());
        Ok(())
    }

    async fn submission_for_attempt(
        &mut self,
        attempt_id: Uuid,
    ) -> Result<Option<Submission>, QuizError> {
        Ok(self
            .snapshot
            .submissions
            .values()
            .find(|submission| submission.attempt_id == attempt_id)
            .cloned())
    }

    async fn put_submission(&mut self, submission: &Submission) -> Result<(), QuizError> {
        self.snapshot
            .submissions
            .insert(submission.id, submission.clone());
        Ok(())
    }

    async fn metrics(
        &mut self,
        user_id: Uuid,
        quiz_id: Uuid,
    ) -> Result<Option<UserQuizMetrics>, QuizError> {
        Ok(self.snapshot.metrics.get(&(user_id, quiz_id)).cloned())
    }

    async fn put_metrics(&mut self, metrics: &UserQuizMetrics) -> Result<(), QuizError> {
        self.snapshot
            .metrics
            .insert((metrics.user_id, metrics.quiz_id), metrics.clone());
        Ok(())
    }

    async fn commit(mut self: Box<Self>) -> Result<(), QuizError> {
        let mut shared = state_lock(&self.shared);
        if shared.version != self.base_version {
            tracing::trace!(
                base = self.base_version,
                current = shared.version,
                "commit lost the version race"
            );
            return Err(QuizError::Conflict(format!(
                "state moved from version {} to {}",
                self.base_version, shared.version
            )));
        }
        self.snapshot.version = self.base_version + 1;
        *shared = std::mem::take(&mut self.snapshot);
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), QuizError> {
        Ok(())
    }
}
