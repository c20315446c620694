//! TOML question-bank loader.
//!
//! Loads authored question banks from TOML files and directories and runs
//! every question through creation-time validation before handing it over,
//! so malformed tags never reach an attempt.

use std::path::Path;

use anyhow::{Context, Result};
use chrono::Utc;
use serde::Deserialize;
use uuid::Uuid;

use crate::model::{
    LotItem, LotOrder, ParameterKind, Question, QuestionBank, QuestionBody, QuestionKind,
    QuestionParameter,
};

/// A parsed bank together with its member questions.
#[derive(Debug, Clone)]
pub struct BankFixture {
    pub bank: QuestionBank,
    pub questions: Vec<Question>,
}

/// Intermediate TOML structure for bank files.
#[derive(Debug, Deserialize)]
struct TomlBankFile {
    bank: TomlBankHeader,
    #[serde(default)]
    questions: Vec<TomlQuestion>,
}

#[derive(Debug, Deserialize)]
struct TomlBankHeader {
    title: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    course_id: Option<String>,
    #[serde(default)]
    course_version_id: Option<String>,
    #[serde(default)]
    tags: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct TomlQuestion {
    #[serde(rename = "type")]
    question_type: String,
    text: String,
    #[serde(default)]
    is_parameterized: bool,
    #[serde(default)]
    parameters: Vec<TomlParameter>,
    #[serde(default)]
    hint: Option<String>,
    #[serde(default = "default_time_limit")]
    time_limit_seconds: u32,
    points: f64,
    #[serde(default)]
    tags: Vec<String>,
    solution: toml::Value,
}

fn default_time_limit() -> u32 {
    60
}

#[derive(Debug, Deserialize)]
struct TomlParameter {
    name: String,
    possible_values: Vec<String>,
    #[serde(default = "default_parameter_kind")]
    kind: String,
}

fn default_parameter_kind() -> String {
    "text".to_string()
}

#[derive(Debug, Deserialize)]
struct TomlLotItem {
    text: String,
    #[serde(default)]
    explanation: String,
}

impl From<TomlLotItem> for LotItem {
    fn from(item: TomlLotItem) -> Self {
        LotItem::new(item.text, item.explanation)
    }
}

#[derive(Debug, Deserialize)]
struct TomlSelectOneSolution {
    correct: TomlLotItem,
    #[serde(default)]
    incorrect: Vec<TomlLotItem>,
}

#[derive(Debug, Deserialize)]
struct TomlSelectManySolution {
    correct: Vec<TomlLotItem>,
    #[serde(default)]
    incorrect: Vec<TomlLotItem>,
}

#[derive(Debug, Deserialize)]
struct TomlOrderEntry {
    text: String,
    #[serde(default)]
    explanation: String,
    order: u32,
}

#[derive(Debug, Deserialize)]
struct TomlOrderSolution {
    ordering: Vec<TomlOrderEntry>,
}

#[derive(Debug, Deserialize)]
struct TomlNumericSolution {
    #[serde(default)]
    decimal_precision: u32,
    #[serde(default)]
    lower_limit: f64,
    #[serde(default)]
    upper_limit: f64,
    #[serde(default)]
    value: Option<f64>,
    #[serde(default)]
    expression: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TomlDescriptiveSolution {
    solution_text: String,
}

/// Parse a single TOML file into a bank fixture.
pub fn parse_bank(path: &Path) -> Result<BankFixture> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read bank file: {}", path.display()))?;
    parse_bank_str(&content, path)
}

/// Parse a TOML string into a bank fixture (useful for testing).
pub fn parse_bank_str(content: &str, source_path: &Path) -> Result<BankFixture> {
    let parsed: TomlBankFile = toml::from_str(content)
        .with_context(|| format!("failed to parse TOML: {}", source_path.display()))?;

    let now = Utc::now();
    let questions = parsed
        .questions
        .into_iter()
        .enumerate()
        .map(|(index, q)| {
            build_question(q).with_context(|| {
                format!("question #{} in {}", index + 1, source_path.display())
            })
        })
        .collect::<Result<Vec<_>>>()?;

    let bank = QuestionBank {
        id: Uuid::new_v4(),
        course_id: parsed.bank.course_id,
        course_version_id: parsed.bank.course_version_id,
        title: parsed.bank.title,
        description: parsed.bank.description,
        questions: questions.iter().map(|question| question.id).collect(),
        tags: parsed.bank.tags,
        created_at: now,
        updated_at: now,
    };

    Ok(BankFixture { bank, questions })
}

fn build_question(q: TomlQuestion) -> Result<Question> {
    let kind: QuestionKind = q
        .question_type
        .parse()
        .map_err(|err: String| anyhow::anyhow!(err))?;

    let body = match kind {
        QuestionKind::SelectOne => {
            let solution: TomlSelectOneSolution = q
                .solution
                .try_into()
                .context("invalid SELECT_ONE solution")?;
            QuestionBody::SelectOne {
                correct: solution.correct.into(),
                incorrect: solution.incorrect.into_iter().map(Into::into).collect(),
            }
        }
        QuestionKind::SelectMany => {
            let solution: TomlSelectManySolution = q
                .solution
                .try_into()
                .context("invalid SELECT_MANY solution")?;
            QuestionBody::SelectMany {
                correct: solution.correct.into_iter().map(Into::into).collect(),
                incorrect: solution.incorrect.into_iter().map(Into::into).collect(),
            }
        }
        QuestionKind::OrderTheLots => {
            let solution: TomlOrderSolution =
                q.solution.try_into().context("invalid ORDER_LOTS solution")?;
            QuestionBody::OrderTheLots {
                ordering: solution
                    .ordering
                    .into_iter()
                    .map(|entry| LotOrder {
                        item: LotItem::new(entry.text, entry.explanation),
                        order: entry.order,
                    })
                    .collect(),
            }
        }
        QuestionKind::Numeric => {
            let solution: TomlNumericSolution =
                q.solution.try_into().context("invalid NUMERIC solution")?;
            QuestionBody::Numeric {
                decimal_precision: solution.decimal_precision,
                lower_limit: solution.lower_limit,
                upper_limit: solution.upper_limit,
                value: solution.value,
                expression: solution.expression,
            }
        }
        QuestionKind::Descriptive => {
            let solution: TomlDescriptiveSolution = q
                .solution
                .try_into()
                .context("invalid DESCRIPTIVE solution")?;
            QuestionBody::Descriptive {
                solution_text: solution.solution_text,
            }
        }
    };

    let question = Question {
        id: Uuid::new_v4(),
        text: q.text,
        is_parameterized: q.is_parameterized,
        parameters: q
            .parameters
            .into_iter()
            .map(|param| {
                let kind = match param.kind.as_str() {
                    "number" => ParameterKind::Number,
                    "text" => ParameterKind::Text,
                    other => anyhow::bail!("unknown parameter kind: {other}"),
                };
                Ok(QuestionParameter {
                    name: param.name,
                    possible_values: param.possible_values,
                    kind,
                })
            })
            .collect::<Result<Vec<_>>>()?,
        hint: q.hint,
        time_limit_seconds: q.time_limit_seconds,
        points: q.points,
        tags: q.tags,
        body,
    };

    question
        .validate()
        .with_context(|| format!("question '{}' failed validation", question.text))?;
    Ok(question)
}

/// Recursively load all `.toml` bank files from a directory. Files that fail
/// to parse or validate are skipped with a warning.
pub fn load_bank_directory(dir: &Path) -> Result<Vec<BankFixture>> {
    let mut fixtures = Vec::new();

    if !dir.is_dir() {
        anyhow::bail!("not a directory: {}", dir.display());
    }

    for entry in std::fs::read_dir(dir)
        .with_context(|| format!("failed to read directory: {}", dir.display()))?
    {
        let entry = entry?;
        let path = entry.path();

        if path.is_dir() {
            fixtures.extend(load_bank_directory(&path)?);
        } else if path.extension().is_some_and(|ext| ext == "toml") {
            match parse_bank(&path) {
                Ok(fixture) => fixtures.push(fixture),
                Err(err) => {
                    tracing::warn!("skipping {}: {err:#}", path.display());
                }
            }
        }
    }

    Ok(fixtures)
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;

    const VALID_TOML: &str = r#"
[bank]
title = "Arithmetic drills"
description = "Parameterized sums"
course_id = "math-101"
tags = ["arithmetic"]

[[questions]]
type = "NUMERIC"
text = "What is <NumExpr>x + y</NumExpr>?"
is_parameterized = true
points = 5.0
tags = ["sums"]

[[questions.parameters]]
name = "x"
possible_values = ["2", "3"]
kind = "number"

[[questions.parameters]]
name = "y"
possible_values = ["5", "7"]
kind = "number"

[questions.solution]
decimal_precision = 0
expression = "x + y"

[[questions]]
type = "SELECT_ONE"
text = "Pick the even number."
points = 1.0

[questions.solution]
correct = { text = "4", explanation = "Divisible by two." }
incorrect = [{ text = "3" }, { text = "7" }]
"#;

    #[test]
    fn parse_valid_bank() {
        let fixture = parse_bank_str(VALID_TOML, &PathBuf::from("bank.toml")).unwrap();
        assert_eq!(fixture.bank.title, "Arithmetic drills");
        assert_eq!(fixture.questions.len(), 2);
        assert_eq!(fixture.bank.questions.len(), 2);
        assert_eq!(fixture.questions[0].kind(), QuestionKind::Numeric);
        assert_eq!(fixture.questions[1].kind(), QuestionKind::SelectOne);
        assert_eq!(fixture.questions[0].parameters.len(), 2);
    }

    #[test]
    fn undeclared_tag_fails_validation() {
        let toml = r#"
[bank]
title = "Broken"

[[questions]]
type = "NUMERIC"
text = "What is <QParam>z</QParam>?"
is_parameterized = true
points = 1.0

[[questions.parameters]]
name = "x"
possible_values = ["1"]
kind = "number"

[questions.solution]
value = 1.0
"#;
        let err = parse_bank_str(toml, &PathBuf::from("broken.toml")).unwrap_err();
        assert!(format!("{err:#}").contains("failed validation"));
    }

    #[test]
    fn unknown_question_type_fails() {
        let toml = r#"
[bank]
title = "Broken"

[[questions]]
type = "MATCH_THE_LOTS"
text = "match"
points = 1.0

[questions.solution]
value = 1.0
"#;
        assert!(parse_bank_str(toml, &PathBuf::from("broken.toml")).is_err());
    }

    #[test]
    fn malformed_toml_fails() {
        let bad = "this is not [valid toml }{";
        assert!(parse_bank_str(bad, &PathBuf::from("bad.toml")).is_err());
    }

    #[test]
    fn load_directory() {
        let dir = tempfile::tempdir().unwrap();
        let file_path = dir.path().join("bank.toml");
        std::fs::write(&file_path, VALID_TOML).unwrap();

        let fixtures = load_bank_directory(dir.path()).unwrap();
        assert_eq!(fixtures.len(), 1);
        assert_eq!(fixtures[0].bank.title, "Arithmetic drills");
    }
}
