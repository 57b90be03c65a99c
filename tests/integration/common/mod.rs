//! In-process stand-in for the model's `generateContent` endpoint.
//!
//! Replies are scripted up front and served in order; every request body
//! is recorded so tests can inspect the prompts that were sent.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use nova_session::{Config, RetryConfig};
use serde_json::{json, Value};
use tokio::task::JoinHandle;

/// One scripted reply.
#[derive(Debug, Clone)]
pub enum Reply {
    /// 200 with the text wrapped in a candidates envelope.
    Text(String),
    /// 200 with an arbitrary JSON body.
    Body(Value),
    /// An error status with a short body.
    Status(u16),
}

/// A request the endpoint received.
#[derive(Debug, Clone)]
pub struct Recorded {
    /// The `{model}:generateContent` path segment.
    pub call: String,
    /// The decoded JSON body.
    pub body: Value,
}

impl Recorded {
    /// The user prompt inside the request body.
    pub fn prompt(&self) -> &str {
        self.body["contents"][0]["parts"][0]["text"]
            .as_str()
            .unwrap_or_default()
    }
}

#[derive(Default)]
struct MockState {
    replies: Mutex<VecDeque<Reply>>,
    requests: Mutex<Vec<Recorded>>,
}

/// A running mock endpoint bound to an ephemeral local port.
pub struct MockEndpoint {
    pub base_url: String,
    state: Arc<MockState>,
    handle: JoinHandle<()>,
}

impl MockEndpoint {
    /// Starts serving the scripted replies.
    pub async fn start(replies: Vec<Reply>) -> Self {
        let state = Arc::new(MockState {
            replies: Mutex::new(replies.into()),
            requests: Mutex::new(Vec::new()),
        });

        let router = Router::new()
            .route("/models/:call", post(generate_content))
            .with_state(state.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind");
        let addr = listener.local_addr().expect("Failed to get local addr");

        let handle = tokio::spawn(async move {
            axum::serve(listener, router).await.expect("Server failed");
        });

        Self {
            base_url: format!("http://{addr}"),
            state,
            handle,
        }
    }

    /// Every request received so far.
    pub fn requests(&self) -> Vec<Recorded> {
        self.state.requests.lock().expect("poisoned").clone()
    }

    /// Number of requests received so far.
    pub fn request_count(&self) -> usize {
        self.state.requests.lock().expect("poisoned").len()
    }

    /// Configuration pointing at this endpoint with no backoff delay and
    /// no API key.
    pub fn config(&self) -> Config {
        let mut config = Config::default();
        config.endpoint.base_url.clone_from(&self.base_url);
        config.endpoint.api_key_env = "NOVA_INTEGRATION_UNSET_KEY".to_string();
        config.retry = RetryConfig {
            max_attempts: 3,
            base_delay_ms: 0,
            max_jitter_ms: 0,
        };
        config
    }

    /// URL of the configured model's `generateContent` call.
    pub fn url(&self) -> String {
        self.config().endpoint.generate_url(None)
    }
}

impl Drop for MockEndpoint {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn generate_content(
    State(state): State<Arc<MockState>>,
    Path(call): Path<String>,
    Json(body): Json<Value>,
) -> Response {
    state
        .requests
        .lock()
        .expect("poisoned")
        .push(Recorded { call, body });

    let reply = state.replies.lock().expect("poisoned").pop_front();
    match reply {
        Some(Reply::Text(text)) => Json(envelope(&text)).into_response(),
        Some(Reply::Body(body)) => Json(body).into_response(),
        Some(Reply::Status(code)) => {
            let status = StatusCode::from_u16(code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
            (status, "scripted failure").into_response()
        }
        None => (StatusCode::INTERNAL_SERVER_ERROR, "no scripted reply left").into_response(),
    }
}

/// Wraps reply text the way the model endpoint does.
pub fn envelope(text: &str) -> Value {
    json!({
        "candidates": [{
            "content": { "parts": [{ "text": text }], "role": "model" },
            "finishReason": "STOP"
        }]
    })
}

/// A generated exam of `count` multiple-choice questions, all answered "A".
pub fn mcq_exam(count: usize) -> String {
    let questions: Vec<Value> = (0..count)
        .map(|i| {
            json!({
                "type": "MCQ",
                "question_text": format!("Which molecule captures light energy? ({})", i + 1),
                "options": ["A) Chlorophyll", "B) Glucose", "C) ATP synthase", "D) Rubisco"],
                "correct_answer": "A",
                "explanation": "Chlorophyll absorbs red and blue wavelengths.",
                "time_estimate_minutes": 1.5
            })
        })
        .collect();
    json!({
        "exam_title": "AP Biology Diagnostic: Photosynthesis",
        "subject": "AP Biology",
        "questions": questions
    })
    .to_string()
}

/// A grading report covering `count` questions; even ids correct.
pub fn grading_report(count: u32) -> String {
    let analysis: Vec<Value> = (0..count)
        .map(|id| {
            json!({
                "question_id": id,
                "status": if id % 2 == 0 { "Correct" } else { "Incorrect" },
                "note": if id % 2 == 0 { "" } else { "Review the light reactions." }
            })
        })
        .collect();
    json!({
        "ap_score_estimate": 3,
        "raw_score": format!("{}/{count}", count.div_ceil(2)),
        "feedback": "Good understanding of pigments; revisit electron transport.",
        "strengths": ["Pigments"],
        "weaknesses": ["Electron transport chain"],
        "per_question_analysis": analysis
    })
    .to_string()
}
