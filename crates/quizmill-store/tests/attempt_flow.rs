//! Attempt lifecycle tests: quota, deadlines, ownership, submission
//! uniqueness, and transactional retry, driven through the full
//! engine/store stack.

mod common;

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use uuid::Uuid;

use common::{harness, numeric_expression_question, select_one_question};
use quizmill_core::attempt::{Attempt, AttemptStatus, Submission, UserQuizMetrics};
use quizmill_core::engine::{AttemptEngine, EngineConfig};
use quizmill_core::error::QuizError;
use quizmill_core::grade::{Answer, QuestionAnswer};
use quizmill_core::model::QuizKind;
use quizmill_core::traits::{StateStore, StateTx};
use quizmill_store::MemoryStore;

fn numeric_answer(attempt: &Attempt, value: f64) -> Vec<QuestionAnswer> {
    vec![QuestionAnswer {
        question_id: attempt.question_details[0].question_id,
        answer: Answer::Numeric { value },
    }]
}

/// The correct answer for the numeric `x + y` question, computed from the
/// parameter map frozen on the attempt.
fn frozen_sum(attempt: &Attempt) -> f64 {
    let map = attempt.question_details[0]
        .parameter_map
        .as_ref()
        .expect("parameterized question must freeze a map");
    map["x"].parse::<f64>().unwrap() + map["y"].parse::<f64>().unwrap()
}

// --- Quota ---

#[tokio::test]
async fn quota_exhausts_after_max_attempts() {
    let h = harness(vec![numeric_expression_question(5.0)], |settings| {
        settings.max_attempts = 2;
    });

    h.engine.attempt(h.user_id, h.quiz_id).await.unwrap();
    h.engine.attempt(h.user_id, h.quiz_id).await.unwrap();

    let err = h.engine.attempt(h.user_id, h.quiz_id).await.unwrap_err();
    assert!(matches!(err, QuizError::BadRequest(_)), "got {err:?}");
    assert!(err.to_string().contains("No attempts remaining"));
}

#[tokio::test]
async fn unlimited_quota_never_exhausts() {
    let h = harness(vec![numeric_expression_question(5.0)], |settings| {
        settings.max_attempts = -1;
    });

    for _ in 0..5 {
        h.engine.attempt(h.user_id, h.quiz_id).await.unwrap();
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn racing_attempts_spend_a_single_attempt_quota() {
    let h = harness(vec![numeric_expression_question(5.0)], |settings| {
        settings.max_attempts = 1;
    });
    let engine = Arc::new(h.engine);
    let (user, quiz) = (h.user_id, h.quiz_id);

    let first = tokio::spawn({
        let engine = Arc::clone(&engine);
        async move { engine.attempt(user, quiz).await }
    });
    let second = tokio::spawn({
        let engine = Arc::clone(&engine);
        async move { engine.attempt(user, quiz).await }
    });

    let outcomes = [first.await.unwrap(), second.await.unwrap()];
    let successes = outcomes.iter().filter(|outcome| outcome.is_ok()).count();
    assert_eq!(successes, 1, "exactly one racing attempt may win");
    let loser = outcomes.iter().find(|outcome| outcome.is_err()).unwrap();
    assert!(matches!(
        loser.as_ref().unwrap_err(),
        QuizError::BadRequest(_)
    ));
}

// --- Deadlines ---

#[tokio::test]
async fn past_deadline_blocks_attempt_and_save() {
    let h = harness(vec![numeric_expression_question(5.0)], |settings| {
        settings.quiz_type = QuizKind::Deadline;
        settings.deadline = Some(Utc::now() + Duration::hours(1));
    });

    let started = h.engine.attempt(h.user_id, h.quiz_id).await.unwrap();

    // Move the deadline into the past and both attempt and save must stop.
    let mut settings = h
        .store
        .settings_snapshot(h.quiz_id)
        .expect("quiz settings present");
    settings.deadline = Some(Utc::now() - Duration::hours(1));
    h.store.insert_quiz(settings);

    let err = h.engine.attempt(h.user_id, h.quiz_id).await.unwrap_err();
    assert!(err.to_string().contains("deadline"));

    let attempt = h
        .engine
        .get_attempt(h.user_id, h.quiz_id, started.attempt_id)
        .await
        .unwrap();
    let err = h
        .engine
        .save(
            h.user_id,
            h.quiz_id,
            started.attempt_id,
            numeric_answer(&attempt, 1.0),
        )
        .await
        .unwrap_err();
    assert!(err.to_string().contains("deadline"));
}

#[tokio::test]
async fn missing_quiz_is_not_found() {
    let h = harness(vec![numeric_expression_question(5.0)], |_| {});
    let err = h
        .engine
        .attempt(h.user_id, Uuid::new_v4())
        .await
        .unwrap_err();
    assert!(matches!(err, QuizError::NotFound(_)));
}

// --- Save ---

#[tokio::test]
async fn save_overwrites_answers_and_is_repeatable() {
    let h = harness(vec![numeric_expression_question(5.0)], |_| {});
    let started = h.engine.attempt(h.user_id, h.quiz_id).await.unwrap();
    let attempt = h
        .engine
        .get_attempt(h.user_id, h.quiz_id, started.attempt_id)
        .await
        .unwrap();

    h.engine
        .save(
            h.user_id,
            h.quiz_id,
            started.attempt_id,
            numeric_answer(&attempt, 1.0),
        )
        .await
        .unwrap();
    h.engine
        .save(
            h.user_id,
            h.quiz_id,
            started.attempt_id,
            numeric_answer(&attempt, 2.0),
        )
        .await
        .unwrap();

    let reloaded = h
        .engine
        .get_attempt(h.user_id, h.quiz_id, started.attempt_id)
        .await
        .unwrap();
    assert_eq!(reloaded.answers.len(), 1);
    let Answer::Numeric { value } = reloaded.answers[0].answer else {
        panic!("wrong answer shape");
    };
    assert_eq!(value, 2.0);
    assert!(reloaded.updated_at >= reloaded.created_at);
}

#[tokio::test]
async fn foreign_attempts_are_rejected() {
    let h = harness(vec![numeric_expression_question(5.0)], |_| {});
    let started = h.engine.attempt(h.user_id, h.quiz_id).await.unwrap();
    let attempt = h
        .engine
        .get_attempt(h.user_id, h.quiz_id, started.attempt_id)
        .await
        .unwrap();

    let stranger = Uuid::new_v4();
    let err = h
        .engine
        .save(
            stranger,
            h.quiz_id,
            started.attempt_id,
            numeric_answer(&attempt, 1.0),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, QuizError::BadRequest(_)));

    let err = h
        .engine
        .get_attempt(stranger, h.quiz_id, started.attempt_id)
        .await
        .unwrap_err();
    assert!(matches!(err, QuizError::BadRequest(_)));

    let err = h
        .engine
        .save(h.user_id, h.quiz_id, Uuid::new_v4(), vec![])
        .await
        .unwrap_err();
    assert!(matches!(err, QuizError::NotFound(_)));
}

// --- Submit ---

#[tokio::test]
async fn at_most_one_submission_per_attempt() {
    let h = harness(vec![numeric_expression_question(5.0)], |_| {});
    let started = h.engine.attempt(h.user_id, h.quiz_id).await.unwrap();
    let attempt = h
        .engine
        .get_attempt(h.user_id, h.quiz_id, started.attempt_id)
        .await
        .unwrap();
    let answers = numeric_answer(&attempt, frozen_sum(&attempt));

    h.engine
        .submit(h.user_id, h.quiz_id, started.attempt_id, answers.clone())
        .await
        .unwrap();

    let err = h
        .engine
        .submit(h.user_id, h.quiz_id, started.attempt_id, answers)
        .await
        .unwrap_err();
    assert!(matches!(err, QuizError::BadRequest(_)), "got {err:?}");
    assert!(err.to_string().contains("already been submitted"));
}

#[tokio::test]
async fn metrics_track_the_attempt_lifecycle() {
    let h = harness(vec![numeric_expression_question(5.0)], |settings| {
        settings.max_attempts = 3;
    });

    let started = h.engine.attempt(h.user_id, h.quiz_id).await.unwrap();
    let metrics = read_metrics(&h.store, h.user_id, h.quiz_id).await;
    assert_eq!(metrics.remaining_attempts, 2);
    assert_eq!(metrics.latest_attempt_status, AttemptStatus::Attempted);
    assert_eq!(metrics.latest_attempt_id, Some(started.attempt_id));
    assert_eq!(metrics.attempts.len(), 1);
    assert!(metrics.attempts[0].submission_result_id.is_none());

    let attempt = h
        .engine
        .get_attempt(h.user_id, h.quiz_id, started.attempt_id)
        .await
        .unwrap();
    let outcome = h
        .engine
        .submit(
            h.user_id,
            h.quiz_id,
            started.attempt_id,
            numeric_answer(&attempt, frozen_sum(&attempt)),
        )
        .await
        .unwrap();

    let metrics = read_metrics(&h.store, h.user_id, h.quiz_id).await;
    assert_eq!(metrics.latest_attempt_status, AttemptStatus::Submitted);
    assert_eq!(
        metrics.latest_submission_result_id,
        Some(outcome.submission_id)
    );
    assert_eq!(
        metrics.attempts[0].submission_result_id,
        Some(outcome.submission_id)
    );
}

async fn read_metrics(store: &MemoryStore, user_id: Uuid, quiz_id: Uuid) -> UserQuizMetrics {
    let mut tx = store.begin().await.unwrap();
    let metrics = tx.metrics(user_id, quiz_id).await.unwrap();
    tx.rollback().await.unwrap();
    metrics.expect("metrics record must exist")
}

// --- Transactional retry ---

/// A state store that hands out a fixed number of transactions whose commit
/// fails with a transient conflict, then behaves normally.
struct ConflictingState {
    inner: Arc<MemoryStore>,
    failures_left: AtomicU32,
}

#[async_trait]
impl StateStore for ConflictingState {
    async fn begin(&self) -> Result<Box<dyn StateTx>, QuizError> {
        let tx = self.inner.begin().await?;
        if self.failures_left.load(Ordering::SeqCst) > 0 {
            self.failures_left.fetch_sub(1, Ordering::SeqCst);
            Ok(Box::new(FailingCommitTx { inner: tx }))
        } else {
            Ok(tx)
        }
    }
}

struct FailingCommitTx {
    inner: Box<dyn StateTx>,
}

#[async_trait]
impl StateTx for FailingCommitTx {
    async fn attempt(&mut self, id: Uuid) -> Result<Option<Attempt>, QuizError> {
        self.inner.attempt(id).await
    }

    async fn put_attempt(&mut self, attempt: &Attempt) -> Result<(), QuizError> {
        self.inner.put_attempt(attempt).await
    }

    async fn submission_for_attempt(
        &mut self,
        attempt_id: Uuid,
    ) -> Result<Option<Submission>, QuizError> {
        self.inner.submission_for_attempt(attempt_id).await
    }

    async fn put_submission(&mut self, submission: &Submission) -> Result<(), QuizError> {
        self.inner.put_submission(submission).await
    }

    async fn metrics(
        &mut self,
        user_id: Uuid,
        quiz_id: Uuid,
    ) -> Result<Option<UserQuizMetrics>, QuizError> {
        self.inner.metrics(user_id, quiz_id).await
    }

    async fn put_metrics(&mut self, metrics: &UserQuizMetrics) -> Result<(), QuizError> {
        self.inner.put_metrics(metrics).await
    }

    async fn commit(self: Box<Self>) -> Result<(), QuizError> {
        Err(QuizError::Conflict("injected commit conflict".into()))
    }

    async fn rollback(self: Box<Self>) -> Result<(), QuizError> {
        self.inner.rollback().await
    }
}

#[tokio::test]
async fn transient_conflicts_are_retried_to_success() {
    let h = harness(vec![select_one_question(2.0).0], |settings| {
        settings.max_attempts = 5;
    });
    let flaky = Arc::new(ConflictingState {
        inner: h.store.clone(),
        failures_left: AtomicU32::new(2),
    });
    let engine = AttemptEngine::new(
        h.store.clone(),
        h.store.clone(),
        flaky,
        EngineConfig::default(),
    )
    .with_seed(7);

    let started = engine.attempt(h.user_id, h.quiz_id).await.unwrap();
    assert_eq!(started.questions.len(), 1);

    // The failed commits must not have spent quota.
    let metrics = read_metrics(&h.store, h.user_id, h.quiz_id).await;
    assert_eq!(metrics.remaining_attempts, 4);
}

#[tokio::test]
async fn conflicts_beyond_the_retry_budget_surface() {
    let h = harness(vec![select_one_question(2.0).0], |_| {});
    let flaky = Arc::new(ConflictingState {
        inner: h.store.clone(),
        failures_left: AtomicU32::new(u32::MAX),
    });
    let engine = AttemptEngine::new(
        h.store.clone(),
        h.store.clone(),
        flaky,
        EngineConfig {
            max_tx_retries: 1,
            retry_delay: std::time::Duration::from_millis(1),
        },
    );

    let err = engine.attempt(h.user_id, h.quiz_id).await.unwrap_err();
    assert!(err.is_transient(), "the last conflict surfaces: {err:?}");
}
