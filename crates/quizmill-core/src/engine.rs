//! Attempt orchestrator.
//!
//! Drives the per-`(user, quiz)` lifecycle
//! `NotAttempted → Attempted → (save*) → Submitted` across the stores:
//! quota and deadline enforcement, parameter instantiation, answer saving,
//! grading, and disclosure filtering. Every multi-entity mutation runs in
//! one store transaction; transient commit conflicts retry the whole
//! operation with the guards re-checked each time.

use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::Utc;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::attempt::{Attempt, AttemptRef, AttemptStatus, QuestionDetail, Submission, UserQuizMetrics};
use crate::error::QuizError;
use crate::grade::{self, GradingResult, GradingStatus, QuestionAnswer, QuestionFeedback};
use crate::model::{Question, QuizSettings};
use crate::render::{self, QuestionRenderView};
use crate::tags;
use crate::traits::{QuestionStore, QuizStore, StateStore};

/// Configuration for the attempt engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Whole-operation retries on transient transaction conflicts.
    pub max_tx_retries: u32,
    /// Delay before the first retry; doubles per retry.
    pub retry_delay: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_tx_retries: 3,
            retry_delay: Duration::from_millis(25),
        }
    }
}

/// What a freshly created attempt hands back to the caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttemptStart {
    pub attempt_id: Uuid,
    /// Answer-safe views, one per selected question.
    pub questions: Vec<QuestionRenderView>,
}

/// The policy-filtered result of a submission. Fields the quiz's disclosure
/// flags withhold are absent, not zeroed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmissionOutcome {
    pub submission_id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_score: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_max_score: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub grading_status: Option<GradingStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub overall_feedback: Option<Vec<QuestionFeedback>>,
}

impl SubmissionOutcome {
    fn filtered(submission_id: Uuid, result: &GradingResult, settings: &QuizSettings) -> Self {
        let mut outcome = Self {
            submission_id,
            total_score: None,
            total_max_score: None,
            grading_status: None,
            overall_feedback: None,
        };
        if settings.show_score_after_submission {
            outcome.total_score = Some(result.total_score);
            outcome.total_max_score = Some(result.total_max_score);
            outcome.grading_status = Some(result.grading_status);
        }
        if settings.shows_feedback() {
            outcome.overall_feedback = Some(result.overall_feedback.clone());
        }
        outcome
    }
}

/// The central attempt orchestrator.
pub struct AttemptEngine {
    questions: Arc<dyn QuestionStore>,
    quizzes: Arc<dyn QuizStore>,
    state: Arc<dyn StateStore>,
    config: EngineConfig,
    rng: Mutex<StdRng>,
}

impl AttemptEngine {
    pub fn new(
        questions: Arc<dyn QuestionStore>,
        quizzes: Arc<dyn QuizStore>,
        state: Arc<dyn StateStore>,
        config: EngineConfig,
    ) -> Self {
        Self {
            questions,
            quizzes,
            state,
            config,
            rng: Mutex::new(StdRng::from_entropy()),
        }
    }

    /// Replace the randomness source with a seeded one, for deterministic
    /// parameter instantiation and shuffling in tests.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = Mutex::new(StdRng::seed_from_u64(seed));
        self
    }

    fn rng(&self) -> MutexGuard<'_, StdRng> {
        // Poisoning cannot corrupt the generator state.
        self.rng.lock().unwrap_or_else(|err| err.into_inner())
    }

    /// Start a new attempt: enforce deadline and quota, draw questions from
    /// the quiz's banks, freeze a parameter map per parameterized question,
    /// and return the rendered views.
    pub async fn attempt(&self, user_id: Uuid, quiz_id: Uuid) -> Result<AttemptStart, QuizError> {
        self.with_retries("attempt", || self.attempt_once(user_id, quiz_id))
            .await
    }

    /// Overwrite the attempt's saved answers. Idempotent; callable any
    /// number of times before submit.
    pub async fn save(
        &self,
        user_id: Uuid,
        quiz_id: Uuid,
        attempt_id: Uuid,
        answers: Vec<QuestionAnswer>,
    ) -> Result<(), QuizError> {
        self.with_retries("save", || {
            self.save_once(user_id, quiz_id, attempt_id, &answers)
        })
        .await
    }

    /// Save the answers, grade them against the frozen parameter maps, and
    /// persist the submission. Fails if the attempt was already submitted.
    pub async fn submit(
        &self,
        user_id: Uuid,
        quiz_id: Uuid,
        attempt_id: Uuid,
        answers: Vec<QuestionAnswer>,
    ) -> Result<SubmissionOutcome, QuizError> {
        self.with_retries("submit", || {
            self.submit_once(user_id, quiz_id, attempt_id, &answers)
        })
        .await
    }

    /// Ownership-checked read of an attempt.
    pub async fn get_attempt(
        &self,
        user_id: Uuid,
        quiz_id: Uuid,
        attempt_id: Uuid,
    ) -> Result<Attempt, QuizError> {
        let mut tx = self.state.begin().await?;
        let attempt = tx
            .attempt(attempt_id)
            .await?
            .ok_or_else(|| QuizError::NotFound(format!("attempt {attempt_id} not found")))?;
        tx.rollback().await?;
        if !attempt.belongs_to(user_id, quiz_id) {
            return Err(QuizError::BadRequest(
                "attempt does not belong to this user and quiz".into(),
            ));
        }
        Ok(attempt)
    }

    async fn with_retries<T, F, Fut>(&self, op: &str, mut run: F) -> Result<T, QuizError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, QuizError>>,
    {
        let mut delay = self.config.retry_delay;
        let mut last_error = None;
        for retry in 0..=self.config.max_tx_retries {
            if retry > 0 {
                tokio::time::sleep(delay).await;
                delay = (delay * 2).min(Duration::from_secs(1));
            }
            match run().await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_transient() => {
                    tracing::warn!("{op} hit a transaction conflict, retrying: {err}");
                    last_error = Some(err);
                }
                Err(err) => return Err(err),
            }
        }
        Err(last_error
            .unwrap_or_else(|| QuizError::Internal(format!("{op} exhausted its retries"))))
    }

    async fn attempt_once(&self, user_id: Uuid, quiz_id: Uuid) -> Result<AttemptStart, QuizError> {
        let settings = self.quizzes.settings(quiz_id).await?;
        let mut tx = self.state.begin().await?;

        let mut metrics = match tx.metrics(user_id, quiz_id).await? {
            Some(metrics) => metrics,
            None => UserQuizMetrics::new(user_id, quiz_id, settings.max_attempts),
        };

        if settings.deadline_passed(Utc::now()) {
            return Err(QuizError::BadRequest("Quiz deadline has passed".into()));
        }
        if !metrics.has_attempts_left() {
            return Err(QuizError::BadRequest(
                "No attempts remaining for this quiz".into(),
            ));
        }

        let selected = self.select_questions(&settings).await?;

        let mut question_details = Vec::with_capacity(selected.len());
        let mut views = Vec::with_capacity(selected.len());
        for question in &selected {
            let parameter_map = if question.is_parameterized {
                Some(tags::instantiate(&question.parameters, &mut *self.rng()))
            } else {
                None
            };
            let mut view = render::render(question, parameter_map.as_ref(), &mut *self.rng())?;
            if !settings.allow_hint {
                view.hint = None;
            }
            question_details.push(QuestionDetail {
                question_id: question.id,
                parameter_map,
            });
            views.push(view);
        }

        let attempt = Attempt::new(quiz_id, user_id, question_details);
        tx.put_attempt(&attempt).await?;

        metrics.spend_attempt();
        metrics.latest_attempt_id = Some(attempt.id);
        metrics.latest_attempt_status = AttemptStatus::Attempted;
        metrics.attempts.push(AttemptRef {
            attempt_id: attempt.id,
            submission_result_id: None,
        });
        tx.put_metrics(&metrics).await?;
        tx.commit().await?;

        tracing::debug!(
            attempt = %attempt.id,
            user = %user_id,
            quiz = %quiz_id,
            questions = views.len(),
            "attempt created"
        );
        Ok(AttemptStart {
            attempt_id: attempt.id,
            questions: views,
        })
    }

    async fn save_once(
        &self,
        user_id: Uuid,
        quiz_id: Uuid,
        attempt_id: Uuid,
        answers: &[QuestionAnswer],
    ) -> Result<(), QuizError> {
        let settings = self.quizzes.settings(quiz_id).await?;
        let mut tx = self.state.begin().await?;
        let mut attempt = tx
            .attempt(attempt_id)
            .await?
            .ok_or_else(|| QuizError::NotFound(format!("attempt {attempt_id} not found")))?;

        if settings.deadline_passed(Utc::now()) {
            return Err(QuizError::BadRequest("Quiz deadline has passed".into()));
        }
        if !attempt.belongs_to(user_id, quiz_id) {
            return Err(QuizError::BadRequest(
                "attempt does not belong to this user and quiz".into(),
            ));
        }

        attempt.answers = answers.to_vec();
        attempt.updated_at = Utc::now();
        tx.put_attempt(&attempt).await?;
        tx.commit().await?;

        tracing::debug!(attempt = %attempt_id, answers = answers.len(), "answers saved");
        Ok(())
    }

    async fn submit_once(
        &self,
        user_id: Uuid,
        quiz_id: Uuid,
        attempt_id: Uuid,
        answers: &[QuestionAnswer],
    ) -> Result<SubmissionOutcome, QuizError> {
        let settings = self.quizzes.settings(quiz_id).await?;
        let mut tx = self.state.begin().await?;
        let mut attempt = tx
            .attempt(attempt_id)
            .await?
            .ok_or_else(|| QuizError::NotFound(format!("attempt {attempt_id} not found")))?;

        if settings.deadline_passed(Utc::now()) {
            return Err(QuizError::BadRequest("Quiz deadline has passed".into()));
        }
        if !attempt.belongs_to(user_id, quiz_id) {
            return Err(QuizError::BadRequest(
                "attempt does not belong to this user and quiz".into(),
            ));
        }

        // Answers passed to submit are authoritative: the save happens in
        // the same transaction as the submission.
        attempt.answers = answers.to_vec();
        attempt.updated_at = Utc::now();
        tx.put_attempt(&attempt).await?;

        let mut metrics = tx.metrics(user_id, quiz_id).await?.ok_or_else(|| {
            QuizError::NotFound(format!(
                "metrics for user {user_id} and quiz {quiz_id} not found"
            ))
        })?;

        if tx.submission_for_attempt(attempt_id).await?.is_some() {
            return Err(QuizError::BadRequest(
                "attempt has already been submitted".into(),
            ));
        }

        let result = self.grade_attempt(&attempt, &settings).await?;

        let mut submission = Submission::new(quiz_id, user_id, attempt_id);
        submission.grading_result = Some(result.clone());
        tx.put_submission(&submission).await?;

        metrics.record_submission(attempt_id, submission.id);
        tx.put_metrics(&metrics).await?;
        tx.commit().await?;

        tracing::info!(
            attempt = %attempt_id,
            submission = %submission.id,
            status = ?result.grading_status,
            score = result.total_score,
            max = result.total_max_score,
            "attempt submitted"
        );
        Ok(SubmissionOutcome::filtered(
            submission.id,
            &result,
            &settings,
        ))
    }

    /// Grade every submitted answer against the original question and the
    /// attempt's frozen parameter map.
    async fn grade_attempt(
        &self,
        attempt: &Attempt,
        settings: &QuizSettings,
    ) -> Result<GradingResult, QuizError> {
        let mut feedback = Vec::with_capacity(attempt.answers.len());
        let mut total_max_score = 0.0;
        for answer in &attempt.answers {
            let question = self.questions.question(answer.question_id).await?;
            total_max_score += question.points;
            let parameter_map = attempt.parameter_map_for(answer.question_id);
            feedback.push(grade::grade_answer(
                &question,
                &answer.answer,
                settings,
                parameter_map,
            )?);
        }
        Ok(grade::summarize(
            feedback,
            total_max_score,
            settings.pass_threshold,
        ))
    }

    /// Draw questions from every bank the quiz references: filter, shuffle,
    /// take `count` per ref.
    async fn select_questions(
        &self,
        settings: &QuizSettings,
    ) -> Result<Vec<Question>, QuizError> {
        let mut selected = Vec::new();
        for bank_ref in &settings.bank_refs {
            let bank = self.questions.bank(bank_ref.bank_id).await?;
            if bank.questions.is_empty() {
                return Err(QuizError::NotFound(format!(
                    "question bank {} has no questions",
                    bank.id
                )));
            }
            let mut candidates = Vec::new();
            for question_id in &bank.questions {
                let question = self.questions.question(*question_id).await?;
                if bank_ref
                    .question_type
                    .is_some_and(|kind| question.kind() != kind)
                {
                    continue;
                }
                if !bank_ref.tags.is_empty()
                    && !question.tags.iter().any(|tag| bank_ref.tags.contains(tag))
                {
                    continue;
                }
                candidates.push(question);
            }
            candidates.shuffle(&mut *self.rng());
            candidates.truncate(bank_ref.count);
            selected.extend(candidates);
        }
        Ok(selected)
    }
}
