//! Answer-safe question render views.
//!
//! A render view is what a test-taker sees: substituted text, merged and
//! shuffled options, and never anything that reveals the solution. The lot
//! shuffle is intentionally non-deterministic across renders so a learner
//! cannot infer correctness from item order.

use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::QuizError;
use crate::model::{LotItem, ParameterMap, Question, QuestionBody};
use crate::tags;

/// A lot item as shown to the test-taker. The explanation stays server-side
/// until post-submission feedback.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LotItemView {
    pub id: Uuid,
    pub text: String,
}

/// Variant-specific portion of a render view.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum RenderedBody {
    #[serde(rename = "SELECT_ONE")]
    SelectOne { lot_items: Vec<LotItemView> },
    #[serde(rename = "SELECT_MANY")]
    SelectMany { lot_items: Vec<LotItemView> },
    #[serde(rename = "ORDER_LOTS")]
    OrderTheLots { lot_items: Vec<LotItemView> },
    #[serde(rename = "NUMERIC")]
    Numeric {
        decimal_precision: u32,
        lower_limit: f64,
        upper_limit: f64,
    },
    #[serde(rename = "DESCRIPTIVE")]
    Descriptive,
}

/// An answer-safe view of one question for one attempt.
///
/// Carries the parameter map the server instantiated so the client can keep
/// its wording consistent with what will be graded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuestionRenderView {
    pub question_id: Uuid,
    pub text: String,
    #[serde(default)]
    pub hint: Option<String>,
    pub time_limit_seconds: u32,
    pub points: f64,
    pub is_parameterized: bool,
    #[serde(default)]
    pub parameter_map: Option<ParameterMap>,
    #[serde(flatten)]
    pub body: RenderedBody,
}

/// Build the render view for a question under one instantiated parameter
/// map. Pure aside from the injected shuffle rng.
pub fn render(
    question: &Question,
    parameter_map: Option<&ParameterMap>,
    rng: &mut impl Rng,
) -> Result<QuestionRenderView, QuizError> {
    let text = substituted(&question.text, parameter_map)?;
    let hint = question
        .hint
        .as_deref()
        .map(|hint| substituted(hint, parameter_map))
        .transpose()?;

    let body = match &question.body {
        QuestionBody::SelectOne { correct, incorrect } => RenderedBody::SelectOne {
            lot_items: lot_views(
                std::iter::once(correct).chain(incorrect.iter()),
                parameter_map,
                rng,
            )?,
        },
        QuestionBody::SelectMany { correct, incorrect } => RenderedBody::SelectMany {
            lot_items: lot_views(correct.iter().chain(incorrect.iter()), parameter_map, rng)?,
        },
        QuestionBody::OrderTheLots { ordering } => RenderedBody::OrderTheLots {
            lot_items: lot_views(ordering.iter().map(|entry| &entry.item), parameter_map, rng)?,
        },
        QuestionBody::Numeric {
            decimal_precision,
            lower_limit,
            upper_limit,
            ..
        } => RenderedBody::Numeric {
            decimal_precision: *decimal_precision,
            lower_limit: *lower_limit,
            upper_limit: *upper_limit,
        },
        QuestionBody::Descriptive { .. } => RenderedBody::Descriptive,
    };

    Ok(QuestionRenderView {
        question_id: question.id,
        text,
        hint,
        time_limit_seconds: question.time_limit_seconds,
        points: question.points,
        is_parameterized: question.is_parameterized,
        parameter_map: parameter_map.cloned(),
        body,
    })
}

fn substituted(text: &str, parameter_map: Option<&ParameterMap>) -> Result<String, QuizError> {
    match parameter_map {
        Some(map) => tags::substitute(text, map),
        None => Ok(text.to_string()),
    }
}

/// Merge, substitute, strip explanations, shuffle.
fn lot_views<'a>(
    items: impl Iterator<Item = &'a LotItem>,
    parameter_map: Option<&ParameterMap>,
    rng: &mut impl Rng,
) -> Result<Vec<LotItemView>, QuizError> {
    let mut views = items
        .map(|item| {
            Ok(LotItemView {
                id: item.id,
                text: substituted(&item.text, parameter_map)?,
            })
        })
        .collect::<Result<Vec<_>, QuizError>>()?;
    views.shuffle(rng);
    Ok(views)
}
