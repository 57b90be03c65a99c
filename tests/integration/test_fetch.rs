//! Integration tests for the retrying fetch client and the model backend
//! over real HTTP.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{envelope, MockEndpoint, Reply};
use nova_session::{
    GeminiBackend, HttpTransport, ModelBackend, ModelRequest, NovaError, RetryPolicy,
    RetryingClient, TransportErrorKind,
};
use serde_json::json;

fn client(max_attempts: u32) -> RetryingClient {
    let transport = HttpTransport::new(Duration::from_secs(5)).expect("Failed to build transport");
    RetryingClient::new(Arc::new(transport), RetryPolicy::immediate(max_attempts))
}

fn request() -> ModelRequest {
    ModelRequest {
        system_instruction: "You write AP exam questions.".to_string(),
        prompt: "Write one question.".to_string(),
        expected_schema: json!({ "type": "OBJECT" }),
    }
}

// ============================================================================
// Retrying Client
// ============================================================================

#[tokio::test]
async fn test_retries_server_error_then_succeeds() {
    let endpoint =
        MockEndpoint::start(vec![Reply::Status(503), Reply::Body(envelope("{\"ok\":true}"))])
            .await;

    let body = client(3)
        .post(&endpoint.url(), &json!({ "contents": [] }))
        .await
        .expect("Expected success on the second attempt");

    assert_eq!(body, envelope("{\"ok\":true}"));
    assert_eq!(endpoint.request_count(), 2);
}

#[tokio::test]
async fn test_gives_up_after_max_attempts() {
    let endpoint = MockEndpoint::start(vec![
        Reply::Status(500),
        Reply::Status(500),
        Reply::Status(500),
        Reply::Body(envelope("never reached")),
    ])
    .await;

    let err = client(3)
        .post(&endpoint.url(), &json!({}))
        .await
        .expect_err("Expected a transport error");

    match err {
        NovaError::TransportError {
            attempts,
            kind,
            message,
            ..
        } => {
            assert_eq!(attempts, 3);
            assert_eq!(kind, TransportErrorKind::Server);
            assert!(message.contains("HTTP 500"), "unexpected message: {message}");
        }
        other => panic!("Expected TransportError, got: {other:?}"),
    }
    assert_eq!(endpoint.request_count(), 3);
}

#[tokio::test]
async fn test_rate_limit_is_classified() {
    let endpoint = MockEndpoint::start(vec![Reply::Status(429)]).await;

    let err = client(1)
        .post(&endpoint.url(), &json!({}))
        .await
        .expect_err("Expected a transport error");

    assert!(matches!(
        err,
        NovaError::TransportError {
            attempts: 1,
            kind: TransportErrorKind::RateLimit,
            ..
        }
    ));
    assert!(err.is_retryable());
}

#[tokio::test]
async fn test_unreachable_endpoint_is_network_error() {
    // Bind and drop to get a port nothing listens on.
    let port = std::net::TcpListener::bind("127.0.0.1:0")
        .and_then(|l| l.local_addr())
        .expect("Failed to get local addr")
        .port();
    let url = format!("http://127.0.0.1:{port}/models/m:generateContent");

    let err = client(2)
        .post(&url, &json!({}))
        .await
        .expect_err("Expected a transport error");

    assert!(matches!(
        err,
        NovaError::TransportError {
            attempts: 2,
            kind: TransportErrorKind::Network,
            ..
        }
    ));
}

// ============================================================================
// Model Backend
// ============================================================================

#[tokio::test]
async fn test_backend_sends_envelope_and_extracts_text() {
    let endpoint = MockEndpoint::start(vec![Reply::Text("{\"answer\":42}".to_string())]).await;
    let config = endpoint.config();
    let backend = GeminiBackend::from_config(&config).expect("Failed to build backend");

    let text = backend.generate(&request()).await.expect("Expected reply text");
    assert_eq!(text, "{\"answer\":42}");

    let recorded = endpoint.requests();
    assert_eq!(recorded.len(), 1);
    assert_eq!(
        recorded[0].call,
        format!("{}:generateContent", config.endpoint.model)
    );
    assert_eq!(recorded[0].prompt(), "Write one question.");
    assert_eq!(
        recorded[0].body["systemInstruction"]["parts"][0]["text"],
        "You write AP exam questions."
    );
    assert_eq!(
        recorded[0].body["generationConfig"]["responseMimeType"],
        "application/json"
    );
}

#[tokio::test]
async fn test_missing_candidates_is_content_error_without_retry() {
    let endpoint = MockEndpoint::start(vec![
        Reply::Body(json!({ "promptFeedback": { "blockReason": "SAFETY" } })),
        Reply::Text("unused".to_string()),
    ])
    .await;
    let backend = GeminiBackend::from_config(&endpoint.config()).expect("Failed to build backend");

    let err = backend
        .generate(&request())
        .await
        .expect_err("Expected a content error");

    assert!(matches!(err, NovaError::ContentValidationError { .. }));
    assert_eq!(endpoint.request_count(), 1);
}
