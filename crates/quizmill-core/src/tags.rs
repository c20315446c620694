//! Parameter tag parsing and substitution.
//!
//! Question text may embed three tag kinds: `<QParam>name</QParam>` renders
//! the chosen parameter value verbatim, `<NumExpr>expr</NumExpr>` evaluates
//! an arithmetic expression over parameter values and collapses it to a
//! number, and `<NumExprTex>expr</NumExprTex>` substitutes values but keeps
//! the expression structure as a `$…$`-delimited display string.
//!
//! Substitution is a single left-to-right pass over the *original* stored
//! text. Re-running it on already-substituted output is undefined; callers
//! must always substitute from the stored question fields. Tags do not nest,
//! and unknown angle-bracket markup passes through untouched.

use rand::seq::SliceRandom;
use rand::Rng;

use crate::error::QuizError;
use crate::expr;
use crate::model::{ParameterKind, ParameterMap, QuestionParameter};

/// The three recognized tag kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TagKind {
    Param,
    NumExpr,
    NumExprTex,
}

impl TagKind {
    fn name(self) -> &'static str {
        match self {
            TagKind::Param => "QParam",
            TagKind::NumExpr => "NumExpr",
            TagKind::NumExprTex => "NumExprTex",
        }
    }
}

// Longest name first so `<NumExprTex>` is never mistaken for `<NumExpr>`.
const TAG_KINDS: [TagKind; 3] = [TagKind::NumExprTex, TagKind::NumExpr, TagKind::Param];

/// A piece of tag-bearing text: either literal text or one tag's content.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Piece<'a> {
    Text(&'a str),
    Tag(TagKind, &'a str),
}

/// Split text into literal runs and tag contents, left to right.
fn split_tags(text: &str) -> Vec<Piece<'_>> {
    let mut pieces = Vec::new();
    let mut rest = text;
    let mut cursor = 0usize;

    'outer: while let Some(offset) = rest[cursor..].find('<') {
        let at = cursor + offset;
        for kind in TAG_KINDS {
            let open = format!("<{}>", kind.name());
            let close = format!("</{}>", kind.name());
            if rest[at..].starts_with(&open) {
                let content_start = at + open.len();
                if let Some(end) = rest[content_start..].find(&close) {
                    if at > 0 {
                        pieces.push(Piece::Text(&rest[..at]));
                    }
                    pieces.push(Piece::Tag(kind, &rest[content_start..content_start + end]));
                    rest = &rest[content_start + end + close.len()..];
                    cursor = 0;
                    continue 'outer;
                }
            }
        }
        // Not a recognized, closed tag: keep scanning past this '<'.
        cursor = at + 1;
    }

    if !rest.is_empty() {
        pieces.push(Piece::Text(rest));
    }
    pieces
}

/// Whether the text contains at least one recognized tag.
pub fn contains_tag(text: &str) -> bool {
    split_tags(text)
        .iter()
        .any(|piece| matches!(piece, Piece::Tag(..)))
}

/// Pick one value uniformly at random from each parameter's pool.
pub fn instantiate(parameters: &[QuestionParameter], rng: &mut impl Rng) -> ParameterMap {
    parameters
        .iter()
        .filter_map(|param| {
            param
                .possible_values
                .choose(rng)
                .map(|value| (param.name.clone(), value.clone()))
        })
        .collect()
}

/// Replace every tag occurrence with its parameter-derived value.
pub fn substitute(text: &str, params: &ParameterMap) -> Result<String, QuizError> {
    let mut out = String::with_capacity(text.len());
    for piece in split_tags(text) {
        match piece {
            Piece::Text(literal) => out.push_str(literal),
            Piece::Tag(TagKind::Param, name) => {
                let name = name.trim();
                let value = params.get(name).ok_or_else(|| {
                    QuizError::Validation(format!("parameter '{name}' is not instantiated"))
                })?;
                out.push_str(value);
            }
            Piece::Tag(TagKind::NumExpr, raw) => {
                let value = expr::parse(raw)?.eval(params)?;
                out.push_str(&expr::format_number(value));
            }
            Piece::Tag(TagKind::NumExprTex, raw) => {
                let rendered = expr::parse(raw)?.display_with(params)?;
                out.push('$');
                out.push_str(&rendered);
                out.push('$');
            }
        }
    }
    Ok(out)
}

/// Authoring-time tag check: every tag must reference declared parameters,
/// and expression tags may only reference numeric ones.
pub fn validate_tags(text: &str, declared: &[QuestionParameter]) -> Result<(), QuizError> {
    for piece in split_tags(text) {
        match piece {
            Piece::Text(_) => {}
            Piece::Tag(TagKind::Param, name) => {
                let name = name.trim();
                if !declared.iter().any(|param| param.name == name) {
                    return Err(QuizError::Validation(format!(
                        "tag references undeclared parameter '{name}'"
                    )));
                }
            }
            Piece::Tag(TagKind::NumExpr | TagKind::NumExprTex, raw) => {
                validate_expression(raw, declared)?;
            }
        }
    }
    Ok(())
}

/// Check an expression outside tag syntax (numeric questions store their
/// expected-value expression bare).
pub fn validate_expression(raw: &str, declared: &[QuestionParameter]) -> Result<(), QuizError> {
    let parsed = expr::parse(raw)?;
    for name in parsed.variables() {
        let Some(param) = declared.iter().find(|param| param.name == name) else {
            return Err(QuizError::Validation(format!(
                "expression references undeclared parameter '{name}'"
            )));
        };
        if param.kind != ParameterKind::Number {
            return Err(QuizError::Validation(format!(
                "expression references parameter '{name}', which is not numeric"
            )));
        }
    }
    Ok(())
}
