use criterion::{black_box, criterion_group, criterion_main, Criterion};
use uuid::Uuid;

use quizmill_core::grade::{grade_answer, Answer, AnswerOrder};
use quizmill_core::model::{
    LotItem, LotOrder, Question, QuestionBody, QuizKind, QuizSettings,
};

fn settings() -> QuizSettings {
    QuizSettings {
        quiz_id: Uuid::nil(),
        bank_refs: vec![],
        pass_threshold: 0.7,
        max_attempts: -1,
        quiz_type: QuizKind::NoDeadline,
        deadline: None,
        question_visibility: 4,
        approximate_time_to_complete: None,
        allow_partial_grading: true,
        allow_hint: true,
        show_score_after_submission: true,
        show_correct_answers_after_submission: true,
        show_explanation_after_submission: true,
    }
}

fn base_question(body: QuestionBody) -> Question {
    Question {
        id: Uuid::nil(),
        text: "bench".into(),
        is_parameterized: false,
        parameters: vec![],
        hint: None,
        time_limit_seconds: 60,
        points: 10.0,
        tags: vec![],
        body,
    }
}

fn bench_select_many(c: &mut Criterion) {
    let correct: Vec<LotItem> = (0..8).map(|i| LotItem::new(format!("c{i}"), "")).collect();
    let incorrect: Vec<LotItem> = (0..8).map(|i| LotItem::new(format!("i{i}"), "")).collect();
    let picked: Vec<Uuid> = correct.iter().take(6).map(|item| item.id).collect();
    let question = base_question(QuestionBody::SelectMany { correct, incorrect });
    let answer = Answer::SelectMany {
        lot_item_ids: picked,
    };
    let settings = settings();

    c.bench_function("grade_select_many_partial", |b| {
        b.iter(|| grade_answer(black_box(&question), black_box(&answer), &settings, None))
    });
}

fn bench_ordering(c: &mut Criterion) {
    let items: Vec<LotItem> = (0..12).map(|i| LotItem::new(format!("o{i}"), "")).collect();
    let question = base_question(QuestionBody::OrderTheLots {
        ordering: items
            .iter()
            .enumerate()
            .map(|(i, item)| LotOrder {
                item: item.clone(),
                order: (i + 1) as u32,
            })
            .collect(),
    });
    // Reverse order: worst case for the inversion count.
    let answer = Answer::OrderTheLots {
        orders: items
            .iter()
            .rev()
            .enumerate()
            .map(|(i, item)| AnswerOrder {
                lot_item_id: item.id,
                order: (i + 1) as u32,
            })
            .collect(),
    };
    let settings = settings();

    c.bench_function("grade_ordering_reversed", |b| {
        b.iter(|| grade_answer(black_box(&question), black_box(&answer), &settings, None))
    });
}

criterion_group!(benches, bench_select_many, bench_ordering);
criterion_main!(benches);
