//! Attempt lifecycle entities.
//!
//! An [`Attempt`] freezes the questions and parameter maps a user received,
//! a [`Submission`] records the graded outcome (at most one per attempt),
//! and [`UserQuizMetrics`] tracks quota and latest status per
//! `(user, quiz)` pair.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::grade::{GradingResult, QuestionAnswer};
use crate::model::ParameterMap;

/// One question of an attempt with the parameter map instantiated for it at
/// creation time. `None` for unparameterized questions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuestionDetail {
    pub question_id: Uuid,
    #[serde(default)]
    pub parameter_map: Option<ParameterMap>,
}

/// A user's in-progress pass over a quiz.
///
/// `question_details` is frozen when the attempt is created; grading always
/// reads the parameter maps from here, so later edits to a question never
/// change what an old attempt is graded against.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Attempt {
    pub id: Uuid,
    pub quiz_id: Uuid,
    pub user_id: Uuid,
    pub question_details: Vec<QuestionDetail>,
    /// Overwritten whole on every save.
    #[serde(default)]
    pub answers: Vec<QuestionAnswer>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Attempt {
    pub fn new(quiz_id: Uuid, user_id: Uuid, question_details: Vec<QuestionDetail>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            quiz_id,
            user_id,
            question_details,
            answers: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// The frozen parameter map for one of this attempt's questions.
    pub fn parameter_map_for(&self, question_id: Uuid) -> Option<&ParameterMap> {
        self.question_details
            .iter()
            .find(|detail| detail.question_id == question_id)
            .and_then(|detail| detail.parameter_map.as_ref())
    }

    pub fn belongs_to(&self, user_id: Uuid, quiz_id: Uuid) -> bool {
        self.user_id == user_id && self.quiz_id == quiz_id
    }
}

/// The graded record of one submitted attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Submission {
    pub id: Uuid,
    pub quiz_id: Uuid,
    pub user_id: Uuid,
    pub attempt_id: Uuid,
    pub submitted_at: DateTime<Utc>,
    #[serde(default)]
    pub grading_result: Option<GradingResult>,
}

impl Submission {
    pub fn new(quiz_id: Uuid, user_id: Uuid, attempt_id: Uuid) -> Self {
        Self {
            id: Uuid::new_v4(),
            quiz_id,
            user_id,
            attempt_id,
            submitted_at: Utc::now(),
            grading_result: None,
        }
    }
}

/// Where a user stands with a quiz.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AttemptStatus {
    NotAttempted,
    Attempted,
    Submitted,
}

/// One attempt as tracked in the metrics record, with its submission once
/// one exists.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttemptRef {
    pub attempt_id: Uuid,
    #[serde(default)]
    pub submission_result_id: Option<Uuid>,
}

/// Quota and status bookkeeping per `(user, quiz)` pair. Created lazily on
/// the first attempt; exactly one record exists per pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserQuizMetrics {
    pub id: Uuid,
    pub user_id: Uuid,
    pub quiz_id: Uuid,
    /// `-1` means unlimited and is never decremented.
    pub remaining_attempts: i32,
    #[serde(default)]
    pub latest_attempt_id: Option<Uuid>,
    pub latest_attempt_status: AttemptStatus,
    #[serde(default)]
    pub latest_submission_result_id: Option<Uuid>,
    pub attempts: Vec<AttemptRef>,
}

impl UserQuizMetrics {
    pub fn new(user_id: Uuid, quiz_id: Uuid, max_attempts: i32) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id,
            quiz_id,
            remaining_attempts: max_attempts,
            latest_attempt_id: None,
            latest_attempt_status: AttemptStatus::NotAttempted,
            latest_submission_result_id: None,
            attempts: Vec::new(),
        }
    }

    pub fn has_attempts_left(&self) -> bool {
        self.remaining_attempts == -1 || self.remaining_attempts > 0
    }

    /// Spend one attempt from the quota. Unlimited quotas stay at `-1`.
    pub fn spend_attempt(&mut self) {
        if self.remaining_attempts > 0 {
            self.remaining_attempts -= 1;
        }
    }

    /// Record a submission against its attempt entry.
    pub fn record_submission(&mut self, attempt_id: Uuid, submission_id: Uuid) {
        self.latest_submission_result_id = Some(submission_id);
        self.latest_attempt_status = AttemptStatus::Submitted;
        for entry in &mut self.attempts {
            if entry.attempt_id == attempt_id {
                entry.submission_result_id = Some(submission_id);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quota_spends_down_but_unlimited_stays() {
        let user = Uuid::new_v4();
        let quiz = Uuid::new_v4();
        let mut limited = UserQuizMetrics::new(user, quiz, 2);
        assert!(limited.has_attempts_left());
        limited.spend_attempt();
        limited.spend_attempt();
        assert_eq!(limited.remaining_attempts, 0);
        assert!(!limited.has_attempts_left());

        let mut unlimited = UserQuizMetrics::new(user, quiz, -1);
        unlimited.spend_attempt();
        unlimited.spend_attempt();
        assert_eq!(unlimited.remaining_attempts, -1);
        assert!(unlimited.has_attempts_left());
    }

    #[test]
    fn record_submission_backfills_the_attempt_entry() {
        let user = Uuid::new_v4();
        let quiz = Uuid::new_v4();
        let attempt_id = Uuid::new_v4();
        let submission_id = Uuid::new_v4();
        let mut metrics = UserQuizMetrics::new(user, quiz, 3);
        metrics.attempts.push(AttemptRef {
            attempt_id,
            submission_result_id: None,
        });
        metrics.record_submission(attempt_id, submission_id);
        assert_eq!(metrics.latest_attempt_status, AttemptStatus::Submitted);
        assert_eq!(metrics.latest_submission_result_id, Some(submission_id));
        assert_eq!(
            metrics.attempts[0].submission_result_id,
            Some(submission_id)
        );
    }

    #[test]
    fn attempt_exposes_frozen_parameter_maps() {
        let question_id = Uuid::new_v4();
        let map: ParameterMap = [("x".to_string(), "2".to_string())].into_iter().collect();
        let attempt = Attempt::new(
            Uuid::new_v4(),
            Uuid::new_v4(),
            vec![
                QuestionDetail {
                    question_id,
                    parameter_map: Some(map.clone()),
                },
                QuestionDetail {
                    question_id: Uuid::new_v4(),
                    parameter_map: None,
                },
            ],
        );
        assert_eq!(attempt.parameter_map_for(question_id), Some(&map));
        assert_eq!(attempt.parameter_map_for(Uuid::new_v4()), None);
    }
}
