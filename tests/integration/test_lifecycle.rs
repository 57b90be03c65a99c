//! End-to-end tests of the exam lifecycle against the mock endpoint:
//! generation, answering, timed expiry, grading, history and export.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{grading_report, mcq_exam, MockEndpoint, Reply};
use nova_report::json::JsonGenerator;
use nova_report::{MarkdownGenerator, ResultsSummary};
use nova_session::{
    Accommodations, Answer, ExamController, ExamMode, ExamRequestConfig, FileStore, GeminiBackend,
    LengthClass, NovaError, QuestionKind, Section, SessionEvent, SessionStatus, StructureTable,
    SubjectStructure, View,
};

fn controller(endpoint: &MockEndpoint) -> ExamController {
    let config = endpoint.config();
    let backend = GeminiBackend::from_config(&config).expect("Failed to build backend");
    ExamController::builder(config, Arc::new(backend)).build()
}

fn biology(length: LengthClass, mode: ExamMode) -> ExamRequestConfig {
    ExamRequestConfig::new("AP Biology", "Photosynthesis", length, mode)
}

async fn wait_until_graded(controller: &ExamController) {
    for _ in 0..500 {
        if controller.session().await.is_none() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("session was never graded");
}

// ============================================================================
// Generation
// ============================================================================

#[tokio::test]
async fn test_diagnostic_timed_exam_becomes_active() {
    let endpoint = MockEndpoint::start(vec![Reply::Text(mcq_exam(5))]).await;
    let controller = controller(&endpoint);

    controller
        .start_exam(biology(LengthClass::Diagnostic, ExamMode::Timed))
        .await
        .expect("Expected generation to succeed");

    let session = controller.session().await.expect("Expected a session");
    assert_eq!(session.status(), SessionStatus::Active);
    assert_eq!(session.current_index(), 0);
    assert_eq!(session.questions().len(), 5);
    assert_eq!(session.time_budget_seconds(), Some(40 * 60));
    assert_eq!(session.time_left_seconds(), Some(40 * 60));
    assert_eq!(session.exam_title(), "AP Biology Diagnostic: Photosynthesis");

    let prompt = endpoint.requests()[0].prompt().to_string();
    assert!(prompt.contains("AP Biology"));
    assert!(prompt.contains("Photosynthesis"));

    controller.abandon().await.expect("Expected abandon to succeed");
}

#[tokio::test]
async fn test_code_fenced_generation_reply_is_accepted() {
    let fenced = format!("```json\n{}\n```", mcq_exam(3));
    let endpoint = MockEndpoint::start(vec![Reply::Text(fenced)]).await;
    let controller = controller(&endpoint);

    controller
        .start_exam(biology(LengthClass::Quick, ExamMode::Untimed))
        .await
        .expect("Expected fenced JSON to parse");

    let session = controller.session().await.expect("Expected a session");
    assert_eq!(session.status(), SessionStatus::Active);
    assert_eq!(session.questions().len(), 3);
    assert_eq!(session.time_left_seconds(), None);
}

#[tokio::test]
async fn test_generation_transport_failure_returns_to_configuring() {
    let endpoint = MockEndpoint::start(vec![
        Reply::Status(503),
        Reply::Status(503),
        Reply::Status(503),
        Reply::Text(mcq_exam(2)),
    ])
    .await;
    let controller = controller(&endpoint);
    let mut events = controller.subscribe();

    let err = controller
        .start_exam(biology(LengthClass::Quick, ExamMode::Untimed))
        .await
        .expect_err("Expected a transport error");
    assert!(matches!(err, NovaError::TransportError { attempts: 3, .. }));
    assert_eq!(endpoint.request_count(), 3);

    let session = controller.session().await.expect("Expected a session");
    assert_eq!(session.status(), SessionStatus::Configuring);
    assert!(session.last_error().is_some());

    let mut saw_error = false;
    while let Ok(event) = events.try_recv() {
        if let SessionEvent::Error(payload) = event {
            assert!(payload.retryable);
            saw_error = true;
        }
    }
    assert!(saw_error);

    // Triggering generation again reuses the configuring session.
    controller
        .start_exam(biology(LengthClass::Quick, ExamMode::Untimed))
        .await
        .expect("Expected the second attempt to succeed");
    let retried = controller.session().await.expect("Expected a session");
    assert_eq!(retried.id(), session.id());
    assert_eq!(retried.status(), SessionStatus::Active);
}

#[tokio::test]
async fn test_empty_question_list_is_content_error() {
    let empty = r#"{"exam_title": "Empty", "subject": "AP Biology", "questions": []}"#;
    let endpoint = MockEndpoint::start(vec![Reply::Text(empty.to_string())]).await;
    let controller = controller(&endpoint);

    let err = controller
        .start_exam(biology(LengthClass::Quick, ExamMode::Timed))
        .await
        .expect_err("Expected a content error");

    assert!(matches!(err, NovaError::ContentValidationError { .. }));
    assert_eq!(endpoint.request_count(), 1);
    assert_eq!(
        controller.session().await.map(|s| s.status()),
        Some(SessionStatus::Configuring)
    );
}

// ============================================================================
// Answering and Grading
// ============================================================================

#[tokio::test]
async fn test_partial_answers_are_graded_and_recorded() {
    let endpoint = MockEndpoint::start(vec![
        Reply::Text(mcq_exam(3)),
        Reply::Text(grading_report(3)),
    ])
    .await;
    let controller = controller(&endpoint);
    let mut events = controller.subscribe();

    controller
        .start_exam(biology(LengthClass::Quick, ExamMode::Untimed))
        .await
        .expect("Expected generation to succeed");
    controller
        .answer(0, Answer::Choice("A".to_string()))
        .await
        .expect("Expected answer to be accepted");
    assert!(controller.navigate(2).await);
    controller
        .answer_current("b")
        .await
        .expect("Expected answer to be accepted");

    let entry = controller.submit().await.expect("Expected grading to succeed");

    let grading_prompt = endpoint.requests()[1].prompt().to_string();
    assert!(grading_prompt.contains("\"0\": \"A\""));
    assert!(grading_prompt.contains("\"2\": \"B\""));
    assert!(!grading_prompt.contains("\"1\": \""));

    assert_eq!(entry.answers.len(), 2);
    assert!(!entry.answers.contains_key(&1));
    assert_eq!(entry.report.per_question_analysis.len(), 3);
    assert!(controller.session().await.is_none());
    assert_eq!(controller.history().await, vec![entry.clone()]);

    let mut graded = 0;
    while let Ok(event) = events.try_recv() {
        if let SessionEvent::Graded(payload) = event {
            assert_eq!(payload.entry_id, entry.id);
            assert_eq!(payload.ap_score, 3);
            graded += 1;
        }
    }
    assert_eq!(graded, 1);

    let summary = ResultsSummary::from_entry(&entry);
    assert_eq!(summary.mcq.correct, 1);
    assert_eq!(summary.mcq.total, 3);
}

#[tokio::test]
async fn test_grading_failure_keeps_answers_for_retry() {
    let endpoint = MockEndpoint::start(vec![
        Reply::Text(mcq_exam(2)),
        Reply::Text("The model could not grade this exam.".to_string()),
        Reply::Text(grading_report(2)),
    ])
    .await;
    let controller = controller(&endpoint);

    controller
        .start_exam(biology(LengthClass::Quick, ExamMode::Untimed))
        .await
        .expect("Expected generation to succeed");
    controller
        .answer(1, Answer::Choice("C".to_string()))
        .await
        .expect("Expected answer to be accepted");

    let err = controller.submit().await.expect_err("Expected a content error");
    assert!(matches!(err, NovaError::ContentValidationError { .. }));
    assert!(err.is_retryable());

    let session = controller.session().await.expect("Expected a session");
    assert_eq!(session.status(), SessionStatus::Grading);
    assert_eq!(session.answers().len(), 1);
    assert!(controller
        .answer(0, Answer::Choice("A".to_string()))
        .await
        .is_err());

    let entry = controller.submit().await.expect("Expected the retry to succeed");
    assert_eq!(entry.answers.len(), 1);
    assert_eq!(endpoint.request_count(), 3);
    assert_eq!(controller.history().await.len(), 1);
}

#[tokio::test]
async fn test_timer_expiry_submits_with_unanswered_questions_absent() {
    let endpoint = MockEndpoint::start(vec![
        Reply::Text(mcq_exam(5)),
        Reply::Text(grading_report(5)),
    ])
    .await;
    let config = endpoint.config();
    let backend = GeminiBackend::from_config(&config).expect("Failed to build backend");
    let table = StructureTable::new(
        vec![(
            "AP Biology".to_string(),
            SubjectStructure {
                sections: vec![Section::new(QuestionKind::Mcq, 5)],
                time_budget_minutes: 1,
            },
        )],
        SubjectStructure {
            sections: vec![Section::new(QuestionKind::Mcq, 5)],
            time_budget_minutes: 1,
        },
    );
    let controller = ExamController::builder(config, Arc::new(backend))
        .table(table)
        .tick_period(Duration::from_millis(2))
        .build();
    let mut events = controller.subscribe();

    controller
        .start_exam(biology(LengthClass::Full, ExamMode::Timed))
        .await
        .expect("Expected generation to succeed");
    for (id, label) in [(0, "A"), (2, "B"), (4, "C")] {
        controller
            .answer(id, Answer::Choice(label.to_string()))
            .await
            .expect("Expected answer to be accepted");
    }

    wait_until_graded(&controller).await;

    let history = controller.history().await;
    assert_eq!(history.len(), 1);
    let ids: Vec<u32> = history[0].answers.keys().copied().collect();
    assert_eq!(ids, [0, 2, 4]);

    let grading_prompt = endpoint.requests()[1].prompt().to_string();
    assert!(!grading_prompt.contains("\"1\": \""));
    assert!(!grading_prompt.contains("\"3\": \""));

    let mut saw_expiry = false;
    let mut last_tick = None;
    while let Ok(event) = events.try_recv() {
        match event {
            SessionEvent::TimeExpired => saw_expiry = true,
            SessionEvent::Tick(tick) => {
                if let Some(previous) = last_tick {
                    assert!(tick.time_left_seconds < previous);
                }
                last_tick = Some(tick.time_left_seconds);
            }
            _ => {}
        }
    }
    assert!(saw_expiry);
    assert_eq!(last_tick, Some(0));
}

#[tokio::test]
async fn test_extended_time_starts_at_scaled_budget() {
    let endpoint = MockEndpoint::start(vec![Reply::Text(mcq_exam(3))]).await;
    let config = endpoint.config();
    let backend = GeminiBackend::from_config(&config).expect("Failed to build backend");
    let controller = ExamController::builder(config, Arc::new(backend))
        .accommodations(Accommodations {
            extended_time: true,
            ..Accommodations::default()
        })
        .build();

    controller
        .start_exam(biology(LengthClass::Quick, ExamMode::Timed))
        .await
        .expect("Expected generation to succeed");

    let session = controller.session().await.expect("Expected a session");
    assert_eq!(session.time_budget_seconds(), Some(20 * 60 * 3 / 2));
    controller.abandon().await.expect("Expected abandon to succeed");
}

// ============================================================================
// Persistence and Export
// ============================================================================

#[tokio::test]
async fn test_session_survives_restart_and_exports() {
    let dir = std::env::temp_dir().join(format!("nova-integration-{}", std::process::id()));
    std::fs::remove_dir_all(&dir).ok();

    let endpoint = MockEndpoint::start(vec![
        Reply::Text(mcq_exam(2)),
        Reply::Text(grading_report(2)),
    ])
    .await;

    {
        let backend =
            GeminiBackend::from_config(&endpoint.config()).expect("Failed to build backend");
        let controller = ExamController::builder(endpoint.config(), Arc::new(backend))
            .store(FileStore::new(&dir))
            .build();
        controller
            .start_exam(biology(LengthClass::Quick, ExamMode::Untimed))
            .await
            .expect("Expected generation to succeed");
        controller
            .answer(1, Answer::Choice("A".to_string()))
            .await
            .expect("Expected answer to be accepted");
    }

    let backend = GeminiBackend::from_config(&endpoint.config()).expect("Failed to build backend");
    let controller = ExamController::builder(endpoint.config(), Arc::new(backend))
        .store(FileStore::new(&dir))
        .build();
    assert_eq!(controller.resume().await, Some(SessionStatus::Active));
    let session = controller.session().await.expect("Expected a restored session");
    assert_eq!(session.answers().len(), 1);

    let entry = controller.submit().await.expect("Expected grading to succeed");
    assert_eq!(controller.snapshot().await.view, View::ExamResults);

    let markdown = MarkdownGenerator::new(&entry).generate();
    assert!(markdown.starts_with("# AP Biology Results"));
    assert!(markdown.contains("| AP Score Estimate | 3 / 5 |"));

    let export = dir.join("export.json");
    JsonGenerator::entry(&entry)
        .write_to_file(&export, true)
        .expect("Expected export to be written");
    let value: serde_json::Value = serde_json::from_str(
        &std::fs::read_to_string(&export).expect("Expected export to be readable"),
    )
    .expect("Expected valid JSON");
    assert_eq!(value["summary"]["apScore"], 3);
    assert_eq!(value["entry"]["id"], entry.id.as_str());

    std::fs::remove_dir_all(&dir).ok();
}
