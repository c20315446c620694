//! Answer grading.
//!
//! Grades one submitted answer against the *original* question and the
//! attempt's frozen parameter map, then folds per-question feedback into an
//! aggregate result. Dispatch is an exhaustive match over the question
//! variant.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::QuizError;
use crate::expr;
use crate::model::{ParameterMap, Question, QuestionBody, QuizSettings};

/// A submitted answer, shaped per question variant.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Answer {
    #[serde(rename = "SELECT_ONE")]
    SelectOne { lot_item_id: Uuid },
    #[serde(rename = "SELECT_MANY")]
    SelectMany { lot_item_ids: Vec<Uuid> },
    #[serde(rename = "ORDER_LOTS")]
    OrderTheLots { orders: Vec<AnswerOrder> },
    #[serde(rename = "NUMERIC")]
    Numeric { value: f64 },
    #[serde(rename = "DESCRIPTIVE")]
    Descriptive { answer_text: String },
}

/// One submitted position of an order-the-lots answer, 1-based.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnswerOrder {
    pub lot_item_id: Uuid,
    pub order: u32,
}

/// An answer bound to its question.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuestionAnswer {
    pub question_id: Uuid,
    pub answer: Answer,
}

/// Per-question grading outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AnswerStatus {
    Correct,
    Partial,
    Incorrect,
    /// Awaiting manual review; only descriptive answers land here.
    Pending,
}

/// Feedback for one graded answer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuestionFeedback {
    pub question_id: Uuid,
    pub status: AnswerStatus,
    pub score: f64,
    #[serde(default)]
    pub answer_feedback: Option<String>,
}

/// Aggregate pass/fail outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GradingStatus {
    Passed,
    Failed,
    Pending,
}

/// The full grading record persisted on a submission.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GradingResult {
    pub total_score: f64,
    pub total_max_score: f64,
    pub grading_status: GradingStatus,
    pub overall_feedback: Vec<QuestionFeedback>,
    pub graded_at: DateTime<Utc>,
    pub graded_by: String,
}

/// Grade one answer. The `parameter_map` must be the one frozen on the
/// attempt, never a fresh instantiation.
pub fn grade_answer(
    question: &Question,
    answer: &Answer,
    settings: &QuizSettings,
    parameter_map: Option<&ParameterMap>,
) -> Result<QuestionFeedback, QuizError> {
    let feedback = match (&question.body, answer) {
        (QuestionBody::SelectOne { correct, .. }, Answer::SelectOne { lot_item_id }) => {
            let is_correct = *lot_item_id == correct.id;
            QuestionFeedback {
                question_id: question.id,
                status: if is_correct {
                    AnswerStatus::Correct
                } else {
                    AnswerStatus::Incorrect
                },
                score: if is_correct { question.points } else { 0.0 },
                answer_feedback: Some(
                    if is_correct {
                        "Correct answer!"
                    } else {
                        "Incorrect answer."
                    }
                    .to_string(),
                ),
            }
        }
        (QuestionBody::SelectMany { correct, .. }, Answer::SelectMany { lot_item_ids }) => {
            grade_select_many(question, correct, lot_item_ids, settings)
        }
        (QuestionBody::OrderTheLots { ordering }, Answer::OrderTheLots { orders }) => {
            grade_ordering(question, ordering, orders, settings)
        }
        (
            QuestionBody::Numeric {
                decimal_precision,
                lower_limit,
                upper_limit,
                value,
                expression,
            },
            Answer::Numeric { value: submitted },
        ) => {
            let expected = expected_value(
                *value,
                expression.as_deref(),
                parameter_map,
                *decimal_precision,
            )?;
            let rounded = round_to(*submitted, *decimal_precision);
            let is_correct =
                rounded >= expected - *lower_limit && rounded <= expected + *upper_limit;
            QuestionFeedback {
                question_id: question.id,
                status: if is_correct {
                    AnswerStatus::Correct
                } else {
                    AnswerStatus::Incorrect
                },
                score: if is_correct { question.points } else { 0.0 },
                answer_feedback: Some(if is_correct {
                    "Correct answer.".to_string()
                } else {
                    format!(
                        "Incorrect. Expected a value near {}.",
                        expr::format_number(expected)
                    )
                }),
            }
        }
        (QuestionBody::Descriptive { .. }, Answer::Descriptive { .. }) => QuestionFeedback {
            question_id: question.id,
            status: AnswerStatus::Pending,
            score: 0.0,
            answer_feedback: Some("This answer awaits manual review.".to_string()),
        },
        (body, answer) => {
            return Err(QuizError::BadRequest(format!(
                "answer shape does not match question type {}: {answer:?}",
                body.kind()
            )))
        }
    };
    Ok(feedback)
}

fn grade_select_many(
    question: &Question,
    correct: &[crate::model::LotItem],
    submitted: &[Uuid],
    settings: &QuizSettings,
) -> QuestionFeedback {
    let correct_ids: HashSet<Uuid> = correct.iter().map(|item| item.id).collect();
    let submitted_ids: HashSet<Uuid> = submitted.iter().copied().collect();

    let correct_selections = submitted_ids.intersection(&correct_ids).count();
    let incorrect_selections = submitted_ids.difference(&correct_ids).count();
    let exact = submitted_ids == correct_ids;

    let (status, score, feedback) = if settings.allow_partial_grading {
        let ratio = (correct_selections as f64 - incorrect_selections as f64)
            .max(0.0)
            / correct_ids.len() as f64;
        let score = ratio * question.points;
        let status = if exact {
            AnswerStatus::Correct
        } else if score > 0.0 {
            AnswerStatus::Partial
        } else {
            AnswerStatus::Incorrect
        };
        let feedback = format!(
            "You got {correct_selections} out of {} correct.",
            correct_ids.len()
        );
        (status, score, feedback)
    } else if exact {
        (
            AnswerStatus::Correct,
            question.points,
            "Correct answer!".to_string(),
        )
    } else {
        (AnswerStatus::Incorrect, 0.0, "Incorrect answer.".to_string())
    };

    QuestionFeedback {
        question_id: question.id,
        status,
        score,
        answer_feedback: Some(feedback),
    }
}

fn grade_ordering(
    question: &Question,
    ordering: &[crate::model::LotOrder],
    submitted: &[AnswerOrder],
    settings: &QuizSettings,
) -> QuestionFeedback {
    // Correct sequence of item ids, by declared order.
    let mut correct: Vec<_> = ordering.iter().collect();
    correct.sort_by_key(|entry| entry.order);
    let correct_ids: Vec<Uuid> = correct.iter().map(|entry| entry.item.id).collect();

    let mut answer: Vec<_> = submitted.iter().collect();
    answer.sort_by_key(|entry| entry.order);
    let answer_ids: Vec<Uuid> = answer.iter().map(|entry| entry.lot_item_id).collect();

    let same_items = answer_ids.len() == correct_ids.len()
        && answer_ids
            .iter()
            .collect::<HashSet<_>>()
            .len()
            == answer_ids.len()
        && answer_ids
            .iter()
            .all(|id| correct_ids.contains(id));
    if !same_items {
        return QuestionFeedback {
            question_id: question.id,
            status: AnswerStatus::Incorrect,
            score: 0.0,
            answer_feedback: Some(
                "The submitted ordering does not cover the question's items.".to_string(),
            ),
        };
    }

    let inversions = inversion_count(&correct_ids, &answer_ids);
    let n = correct_ids.len();
    let max_inversions = n * (n.saturating_sub(1)) / 2;

    if inversions == 0 {
        return QuestionFeedback {
            question_id: question.id,
            status: AnswerStatus::Correct,
            score: question.points,
            answer_feedback: Some("Great job! You ordered all items correctly.".to_string()),
        };
    }

    if settings.allow_partial_grading && max_inversions > 0 {
        let ratio = 1.0 - inversions as f64 / max_inversions as f64;
        let score = ratio * question.points;
        QuestionFeedback {
            question_id: question.id,
            status: if score > 0.0 {
                AnswerStatus::Partial
            } else {
                AnswerStatus::Incorrect
            },
            score,
            answer_feedback: Some(format!(
                "Your ordering is {inversions} adjacent swaps away from the correct order."
            )),
        }
    } else {
        QuestionFeedback {
            question_id: question.id,
            status: AnswerStatus::Incorrect,
            score: 0.0,
            answer_feedback: Some("The items are not in the correct order.".to_string()),
        }
    }
}

/// Number of pairs the submitted sequence places in the wrong relative
/// order; equals the adjacent swaps needed to reach the correct sequence.
fn inversion_count(correct: &[Uuid], submitted: &[Uuid]) -> usize {
    let rank_of = |id: &Uuid| correct.iter().position(|c| c == id).unwrap_or(usize::MAX);
    let ranks: Vec<usize> = submitted.iter().map(rank_of).collect();
    let mut inversions = 0;
    for i in 0..ranks.len() {
        for j in i + 1..ranks.len() {
            if ranks[i] > ranks[j] {
                inversions += 1;
            }
        }
    }
    inversions
}

/// Resolve the expected numeric value: a fixed `value` wins, else the
/// expression is evaluated against the attempt's parameter map. Both paths
/// round to the question's precision.
fn expected_value(
    value: Option<f64>,
    expression: Option<&str>,
    parameter_map: Option<&ParameterMap>,
    decimal_precision: u32,
) -> Result<f64, QuizError> {
    let raw = match (value, expression) {
        (Some(value), _) => value,
        (None, Some(expression)) => {
            let empty = ParameterMap::new();
            let params = parameter_map.unwrap_or(&empty);
            expr::parse(expression)?.eval(params)?
        }
        (None, None) => {
            return Err(QuizError::Validation(
                "numeric question has neither a value nor an expression".into(),
            ))
        }
    };
    Ok(round_to(raw, decimal_precision))
}

fn round_to(value: f64, decimal_precision: u32) -> f64 {
    let factor = 10f64.powi(decimal_precision as i32);
    (value * factor).round() / factor
}

/// Fold per-question feedback into the aggregate result.
///
/// The aggregate resolves to `Passed`/`Failed` even while individual
/// descriptive answers are still `Pending`; a manual regrade later replaces
/// the whole result.
pub fn summarize(
    overall_feedback: Vec<QuestionFeedback>,
    total_max_score: f64,
    pass_threshold: f64,
) -> GradingResult {
    let total_score: f64 = overall_feedback.iter().map(|feedback| feedback.score).sum();
    let grading_status = if total_max_score > 0.0 && total_score / total_max_score >= pass_threshold
    {
        GradingStatus::Passed
    } else {
        GradingStatus::Failed
    };
    GradingResult {
        total_score,
        total_max_score,
        grading_status,
        overall_feedback,
        graded_at: Utc::now(),
        graded_by: "system".to_string(),
    }
}
