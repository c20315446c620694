//! Shared fixtures for the engine/store integration tests.

#![allow(dead_code)]

use std::sync::Arc;

use chrono::Utc;
use uuid::Uuid;

use quizmill_core::engine::{AttemptEngine, EngineConfig};
use quizmill_core::model::{
    LotItem, ParameterKind, Question, QuestionBank, QuestionBankRef, QuestionBody,
    QuestionParameter, QuizKind, QuizSettings,
};
use quizmill_store::MemoryStore;

/// A store, an engine over it, and the ids the tests drive.
pub struct Harness {
    pub store: Arc<MemoryStore>,
    pub engine: AttemptEngine,
    pub quiz_id: Uuid,
    pub user_id: Uuid,
}

/// Build a store holding one quiz over one bank with the given questions,
/// and an engine seeded for determinism.
pub fn harness(questions: Vec<Question>, configure: impl FnOnce(&mut QuizSettings)) -> Harness {
    let store = Arc::new(MemoryStore::new());
    let bank_id = Uuid::new_v4();
    let quiz_id = Uuid::new_v4();
    let count = questions.len();

    let now = Utc::now();
    store.insert_bank(QuestionBank {
        id: bank_id,
        course_id: Some("course-1".into()),
        course_version_id: Some("v1".into()),
        title: "test bank".into(),
        description: String::new(),
        questions: questions.iter().map(|question| question.id).collect(),
        tags: vec![],
        created_at: now,
        updated_at: now,
    });
    for question in questions {
        store.insert_question(question);
    }

    let mut settings = QuizSettings {
        quiz_id,
        bank_refs: vec![QuestionBankRef {
            bank_id,
            count,
            question_type: None,
            tags: vec![],
        }],
        pass_threshold: 0.7,
        max_attempts: -1,
        quiz_type: QuizKind::NoDeadline,
        deadline: None,
        question_visibility: 4,
        approximate_time_to_complete: None,
        allow_partial_grading: false,
        allow_hint: true,
        show_score_after_submission: true,
        show_correct_answers_after_submission: true,
        show_explanation_after_submission: true,
    };
    configure(&mut settings);
    store.insert_quiz(settings);

    let engine = AttemptEngine::new(
        store.clone(),
        store.clone(),
        store.clone(),
        EngineConfig::default(),
    )
    .with_seed(42);

    Harness {
        store,
        engine,
        quiz_id,
        user_id: Uuid::new_v4(),
    }
}

/// A parameterized numeric question graded by an expression over `x` and
/// `y`, exact match required.
pub fn numeric_expression_question(points: f64) -> Question {
    Question {
        id: Uuid::new_v4(),
        text: "What is <NumExpr>x + y</NumExpr>?".into(),
        is_parameterized: true,
        parameters: vec![
            QuestionParameter {
                name: "x".into(),
                possible_values: vec!["2".into(), "3".into()],
                kind: ParameterKind::Number,
            },
            QuestionParameter {
                name: "y".into(),
                possible_values: vec!["5".into(), "7".into()],
                kind: ParameterKind::Number,
            },
        ],
        hint: Some("Add <QParam>x</QParam> and <QParam>y</QParam>.".into()),
        time_limit_seconds: 60,
        points,
        tags: vec![],
        body: QuestionBody::Numeric {
            decimal_precision: 0,
            lower_limit: 0.0,
            upper_limit: 0.0,
            value: None,
            expression: Some("x + y".into()),
        },
    }
}

/// An unparameterized single-choice question; returns the correct item id
/// alongside.
pub fn select_one_question(points: f64) -> (Question, Uuid) {
    let correct = LotItem::new("the right one", "it is right");
    let correct_id = correct.id;
    let question = Question {
        id: Uuid::new_v4(),
        text: "Pick the right one.".into(),
        is_parameterized: false,
        parameters: vec![],
        hint: None,
        time_limit_seconds: 30,
        points,
        tags: vec![],
        body: QuestionBody::SelectOne {
            correct,
            incorrect: vec![LotItem::new("a wrong one", ""), LotItem::new("another", "")],
        },
    };
    (question, correct_id)
}
