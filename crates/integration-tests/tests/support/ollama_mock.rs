#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::Arc;

use axum::extract::State;
use axum::http::{StatusCode, header::CONTENT_TYPE};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio::sync::{Mutex, oneshot};

/// Scripted behaviour for one `/api/chat` call.
#[derive(Debug, Clone)]
pub enum MockTurn {
    /// Answers with this text; streamed requests receive it split into
    /// the given chunks.
    Reply(Vec<String>),
    Status(StatusCode),
}

impl MockTurn {
    pub fn reply(text: &str) -> Self {
        Self::Reply(vec![text.to_string()])
    }

    pub fn chunks(chunks: &[&str]) -> Self {
        Self::Reply(chunks.iter().map(|chunk| chunk.to_string()).collect())
    }
}

#[derive(Clone, Default)]
struct MockState {
    turns: Arc<Mutex<VecDeque<MockTurn>>>,
    payloads: Arc<Mutex<Vec<Value>>>,
}

pub struct MockOllama {
    pub base_url: String,
    state: MockState,
    shutdown_tx: Option<oneshot::Sender<()>>,
    handle: tokio::task::JoinHandle<()>,
}

impl MockOllama {
    pub async fn start(turns: Vec<MockTurn>) -> Self {
        let state = MockState {
            turns: Arc::new(Mutex::new(VecDeque::from(turns))),
            payloads: Arc::default(),
        };
        let app = Router::new()
            .route("/api/chat", post(chat_handler))
            .with_state(state.clone());

        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("mock ollama should bind");
        let local_addr = listener
            .local_addr()
            .expect("mock ollama address should resolve");
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let handle = tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    let _ = shutdown_rx.await;
                })
                .await
                .expect("mock ollama should run");
        });

        Self {
            base_url: format!("http://{local_addr}"),
            state,
            shutdown_tx: Some(shutdown_tx),
            handle,
        }
    }

    pub async fn payloads(&self) -> Vec<Value> {
        self.state.payloads.lock().await.clone()
    }
}

impl Drop for MockOllama {
    fn drop(&mut self) {
        if let Some(shutdown_tx) = self.shutdown_tx.take() {
            let _ = shutdown_tx.send(());
        }
        self.handle.abort();
    }
}

async fn chat_handler(State(state): State<MockState>, Json(payload): Json<Value>) -> Response {
    let streaming = payload["stream"].as_bool().unwrap_or(false);
    let model = payload["model"].as_str().unwrap_or("llama3").to_string();
    state.payloads.lock().await.push(payload);

    let turn = state
        .turns
        .lock()
        .await
        .pop_front()
        .unwrap_or(MockTurn::Status(StatusCode::SERVICE_UNAVAILABLE));

    match turn {
        MockTurn::Status(status) => {
            (status, Json(json!({"error": "scripted failure"}))).into_response()
        }
        MockTurn::Reply(chunks) if streaming => {
            let mut body = String::new();
            for chunk in &chunks {
                body.push_str(
                    &json!({
                        "model": model,
                        "message": {"role": "assistant", "content": chunk},
                        "done": false
                    })
                    .to_string(),
                );
                body.push('\n');
            }
            body.push_str(
                &json!({
                    "model": model,
                    "message": {"role": "assistant", "content": ""},
                    "done": true
                })
                .to_string(),
            );
            body.push('\n');
            (
                StatusCode::OK,
                [(CONTENT_TYPE, "application/x-ndjson")],
                body,
            )
                .into_response()
        }
        MockTurn::Reply(chunks) => (
            StatusCode::OK,
            Json(json!({
                "model": model,
                "message": {"role": "assistant", "content": chunks.concat()},
                "done": true
            })),
        )
            .into_response(),
    }
}
