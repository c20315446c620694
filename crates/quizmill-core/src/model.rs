//! Core data model for quizmill.
//!
//! Questions, their per-variant solution data, question banks, and quiz
//! settings. Attempts, submissions, and per-user metrics live in
//! [`crate::attempt`].

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::QuizError;
use crate::tags;

/// The concrete value chosen per declared parameter for one attempt instance
/// of a question. Treated as an immutable value everywhere: the renderer and
/// the grader both receive it by reference and never mutate it.
pub type ParameterMap = BTreeMap<String, String>;

/// What kind of value a question parameter holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParameterKind {
    Number,
    Text,
}

/// A randomizable parameter declared on a question.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuestionParameter {
    /// Name referenced by tags in the question text.
    pub name: String,
    /// The pool one value is drawn from per attempt.
    pub possible_values: Vec<String>,
    /// Value kind. Only `Number` parameters may appear in expression tags.
    pub kind: ParameterKind,
}

/// One selectable/orderable option of a lot-based question.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LotItem {
    pub id: Uuid,
    pub text: String,
    /// Shown to the learner only through post-submission feedback, never in
    /// a render view.
    #[serde(default)]
    pub explanation: String,
}

impl LotItem {
    pub fn new(text: impl Into<String>, explanation: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            text: text.into(),
            explanation: explanation.into(),
        }
    }
}

/// A lot item together with its correct position, 1-based.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LotOrder {
    pub item: LotItem,
    pub order: u32,
}

/// The five question shapes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum QuestionKind {
    #[serde(rename = "SELECT_ONE")]
    SelectOne,
    #[serde(rename = "SELECT_MANY")]
    SelectMany,
    #[serde(rename = "ORDER_LOTS")]
    OrderTheLots,
    #[serde(rename = "NUMERIC")]
    Numeric,
    #[serde(rename = "DESCRIPTIVE")]
    Descriptive,
}

impl fmt::Display for QuestionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            QuestionKind::SelectOne => "SELECT_ONE",
            QuestionKind::SelectMany => "SELECT_MANY",
            QuestionKind::OrderTheLots => "ORDER_LOTS",
            QuestionKind::Numeric => "NUMERIC",
            QuestionKind::Descriptive => "DESCRIPTIVE",
        };
        write!(f, "{s}")
    }
}

impl FromStr for QuestionKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "SELECT_ONE" => Ok(QuestionKind::SelectOne),
            "SELECT_MANY" => Ok(QuestionKind::SelectMany),
            "ORDER_LOTS" => Ok(QuestionKind::OrderTheLots),
            "NUMERIC" => Ok(QuestionKind::Numeric),
            "DESCRIPTIVE" => Ok(QuestionKind::Descriptive),
            other => Err(format!("unknown question type: {other}")),
        }
    }
}

/// Per-variant solution data. The renderer and the grader dispatch
/// exhaustively on this enum.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum QuestionBody {
    #[serde(rename = "SELECT_ONE")]
    SelectOne {
        correct: LotItem,
        incorrect: Vec<LotItem>,
    },
    #[serde(rename = "SELECT_MANY")]
    SelectMany {
        correct: Vec<LotItem>,
        incorrect: Vec<LotItem>,
    },
    #[serde(rename = "ORDER_LOTS")]
    OrderTheLots { ordering: Vec<LotOrder> },
    #[serde(rename = "NUMERIC")]
    Numeric {
        /// Decimal places the submitted and expected values are rounded to.
        decimal_precision: u32,
        /// Accepted tolerance below the expected value.
        lower_limit: f64,
        /// Accepted tolerance above the expected value.
        upper_limit: f64,
        /// Fixed expected value; takes precedence over `expression`.
        #[serde(default)]
        value: Option<f64>,
        /// Arithmetic expression evaluated against the attempt's parameter
        /// map at grading time, in place of `value`.
        #[serde(default)]
        expression: Option<String>,
    },
    #[serde(rename = "DESCRIPTIVE")]
    Descriptive {
        /// Reference solution for manual review. Not auto-gradable.
        solution_text: String,
    },
}

impl QuestionBody {
    pub fn kind(&self) -> QuestionKind {
        match self {
            QuestionBody::SelectOne { .. } => QuestionKind::SelectOne,
            QuestionBody::SelectMany { .. } => QuestionKind::SelectMany,
            QuestionBody::OrderTheLots { .. } => QuestionKind::OrderTheLots,
            QuestionBody::Numeric { .. } => QuestionKind::Numeric,
            QuestionBody::Descriptive { .. } => QuestionKind::Descriptive,
        }
    }
}

/// A quiz question.
///
/// Immutable once referenced by a live attempt: attempts snapshot the
/// instantiated parameter map, never the question itself, so later edits do
/// not retroactively alter the grading of past attempts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Question {
    pub id: Uuid,
    pub text: String,
    pub is_parameterized: bool,
    #[serde(default)]
    pub parameters: Vec<QuestionParameter>,
    #[serde(default)]
    pub hint: Option<String>,
    pub time_limit_seconds: u32,
    pub points: f64,
    /// Tags for bank-ref filtering.
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(flatten)]
    pub body: QuestionBody,
}

impl Question {
    pub fn kind(&self) -> QuestionKind {
        self.body.kind()
    }

    /// Authoring-time validation. Fails fast so a malformed question never
    /// reaches a render or grading path.
    ///
    /// Checks, for parameterized questions: every tag in `text`, `hint`, and
    /// the variant solution text references a declared parameter; expression
    /// tags reference only numeric parameters; a lot-based question carries a
    /// tag in at least one lot item; every parameter has at least one
    /// possible value and a unique name. A question that is not
    /// parameterized must not contain tags at all.
    pub fn validate(&self) -> Result<(), QuizError> {
        if !self.is_parameterized {
            for text in self.tagged_texts() {
                if tags::contains_tag(text) {
                    return Err(QuizError::Validation(format!(
                        "question {} is not parameterized but contains tags",
                        self.id
                    )));
                }
            }
            return Ok(());
        }

        if self.parameters.is_empty() {
            return Err(QuizError::Validation(format!(
                "parameterized question {} declares no parameters",
                self.id
            )));
        }
        let mut names = HashSet::new();
        for param in &self.parameters {
            if !names.insert(param.name.as_str()) {
                return Err(QuizError::Validation(format!(
                    "duplicate parameter name '{}'",
                    param.name
                )));
            }
            if param.possible_values.is_empty() {
                return Err(QuizError::Validation(format!(
                    "parameter '{}' has no possible values",
                    param.name
                )));
            }
        }

        for text in self.tagged_texts() {
            tags::validate_tags(text, &self.parameters)?;
        }

        match &self.body {
            QuestionBody::SelectOne { correct, incorrect } => {
                let any_tag = std::iter::once(correct)
                    .chain(incorrect.iter())
                    .any(|item| tags::contains_tag(&item.text));
                if !any_tag {
                    return Err(QuizError::Validation(
                        "at least one lot item must contain a tag".into(),
                    ));
                }
            }
            QuestionBody::SelectMany { correct, incorrect } => {
                let any_tag = correct
                    .iter()
                    .chain(incorrect.iter())
                    .any(|item| tags::contains_tag(&item.text));
                if !any_tag {
                    return Err(QuizError::Validation(
                        "at least one lot item must contain a tag".into(),
                    ));
                }
            }
            QuestionBody::OrderTheLots { ordering } => {
                let any_tag = ordering
                    .iter()
                    .any(|entry| tags::contains_tag(&entry.item.text));
                if !any_tag {
                    return Err(QuizError::Validation(
                        "at least one lot item must contain a tag".into(),
                    ));
                }
            }
            QuestionBody::Numeric { expression, .. } => {
                if let Some(expression) = expression {
                    tags::validate_expression(expression, &self.parameters)?;
                }
            }
            QuestionBody::Descriptive { .. } => {}
        }

        Ok(())
    }

    /// Every text field that may carry tags, across all variants.
    fn tagged_texts(&self) -> Vec<&str> {
        let mut texts = vec![self.text.as_str()];
        if let Some(hint) = &self.hint {
            texts.push(hint);
        }
        match &self.body {
            QuestionBody::SelectOne { correct, incorrect } => {
                for item in std::iter::once(correct).chain(incorrect.iter()) {
                    texts.push(&item.text);
                    texts.push(&item.explanation);
                }
            }
            QuestionBody::SelectMany { correct, incorrect } => {
                for item in correct.iter().chain(incorrect.iter()) {
                    texts.push(&item.text);
                    texts.push(&item.explanation);
                }
            }
            QuestionBody::OrderTheLots { ordering } => {
                for entry in ordering {
                    texts.push(&entry.item.text);
                    texts.push(&entry.item.explanation);
                }
            }
            QuestionBody::Numeric { .. } => {}
            QuestionBody::Descriptive { solution_text } => texts.push(solution_text),
        }
        texts
    }
}

/// A named pool of questions scoped to a course version.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuestionBank {
    pub id: Uuid,
    #[serde(default)]
    pub course_id: Option<String>,
    #[serde(default)]
    pub course_version_id: Option<String>,
    pub title: String,
    #[serde(default)]
    pub description: String,
    /// Member question ids.
    pub questions: Vec<Uuid>,
    #[serde(default)]
    pub tags: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// How a quiz draws questions from a bank.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuestionBankRef {
    pub bank_id: Uuid,
    /// How many questions to draw from the bank.
    pub count: usize,
    /// Only draw questions of this type.
    #[serde(default)]
    pub question_type: Option<QuestionKind>,
    /// Only draw questions carrying at least one of these tags.
    #[serde(default)]
    pub tags: Vec<String>,
}

/// Whether a quiz enforces a deadline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum QuizKind {
    #[serde(rename = "DEADLINE")]
    Deadline,
    #[serde(rename = "NO_DEADLINE")]
    NoDeadline,
}

/// Per-quiz configuration, attached to a course item of kind QUIZ.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuizSettings {
    pub quiz_id: Uuid,
    pub bank_refs: Vec<QuestionBankRef>,
    /// Fraction of the maximum score required to pass, in `[0, 1]`.
    pub pass_threshold: f64,
    /// `-1` means unlimited.
    pub max_attempts: i32,
    pub quiz_type: QuizKind,
    #[serde(default)]
    pub deadline: Option<DateTime<Utc>>,
    /// How many questions the client shows at once. Carried through for the
    /// UI; the engine does not interpret it.
    pub question_visibility: u32,
    #[serde(default)]
    pub approximate_time_to_complete: Option<String>,
    pub allow_partial_grading: bool,
    pub allow_hint: bool,
    pub show_score_after_submission: bool,
    pub show_correct_answers_after_submission: bool,
    pub show_explanation_after_submission: bool,
}

impl QuizSettings {
    /// Whether per-question feedback is returned after submission.
    pub fn shows_feedback(&self) -> bool {
        self.show_correct_answers_after_submission || self.show_explanation_after_submission
    }

    /// Whether the quiz can no longer be attempted or saved at `now`.
    pub fn deadline_passed(&self, now: DateTime<Utc>) -> bool {
        self.quiz_type == QuizKind::Deadline && self.deadline.is_some_and(|d| now > d)
    }
}
