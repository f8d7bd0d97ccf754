#![allow(dead_code)]

use std::collections::HashSet;
use std::net::IpAddr;
use std::sync::Arc;

use api_server::http::{AppState, RateLimitPolicy, RateLimiter, TokenVerifier, build_router};
use axum::body::{Body, to_bytes};
use axum::http::{Method, Request, StatusCode, header};
use chrono::{Duration, Utc};
use jsonwebtoken::{EncodingKey, Header, encode};
use serde::Serialize;
use serde_json::Value;
use shared::chat::{ChatDependencies, ChatOrchestrator, ChatSettings};
use shared::config::{OllamaConfig, SecurityLogConfig};
use shared::llm::OllamaModelClient;
use shared::repos::Store;
use shared::security::{
    InMemoryAttemptCounter, InputValidator, OutputValidator, SecurityIncidentLogger,
};
use tower::ServiceExt;
use uuid::Uuid;

pub const TEST_JWT_SECRET: &str = "integration-test-jwt-secret";
pub const TEST_SYSTEM_PROMPT: &str =
    "You are a support assistant for the chat guard test suite. Keep every answer short.";

pub struct TestApp {
    pub router: axum::Router,
}

pub async fn build_test_router(store: Store, ollama_base_url: &str) -> TestApp {
    build_test_router_with_policy(store, ollama_base_url, RateLimitPolicy::default()).await
}

pub async fn build_test_router_with_policy(
    store: Store,
    ollama_base_url: &str,
    policy: RateLimitPolicy,
) -> TestApp {
    let model_client = OllamaModelClient::new(&OllamaConfig {
        base_url: ollama_base_url.to_string(),
        default_model: "llama3".to_string(),
        timeout_ms: 5_000,
        stream_timeout_ms: 5_000,
    })
    .expect("model client should build");

    let incidents = SecurityIncidentLogger::new(
        SecurityLogConfig::default(),
        Arc::new(InMemoryAttemptCounter::new()),
        Arc::new(store.clone()),
        None,
    );
    let orchestrator = ChatOrchestrator::new(
        ChatDependencies {
            store: Arc::new(store.clone()),
            model_client: Arc::new(model_client),
            input_screen: Arc::new(
                InputValidator::with_default_rules().expect("input rules should compile"),
            ),
            output_screen: Arc::new(
                OutputValidator::with_default_rules(Some(TEST_SYSTEM_PROMPT))
                    .expect("output rules should compile"),
            ),
            incidents,
        },
        ChatSettings {
            default_model: "llama3".to_string(),
            system_prompt: Some(TEST_SYSTEM_PROMPT.to_string()),
            max_history_messages: 20,
        },
    );

    let router = build_router(AppState {
        store,
        orchestrator: Arc::new(orchestrator),
        token_verifier: TokenVerifier::new(TEST_JWT_SECRET),
        rate_limiter: RateLimiter::new(policy),
        trusted_proxy_ips: HashSet::<IpAddr>::new(),
    });

    TestApp { router }
}

#[derive(Serialize)]
struct TestClaims {
    sub: String,
    exp: i64,
}

pub fn bearer_for(user_id: Uuid) -> String {
    let token = encode(
        &Header::default(),
        &TestClaims {
            sub: user_id.to_string(),
            exp: (Utc::now() + Duration::minutes(10)).timestamp(),
        },
        &EncodingKey::from_secret(TEST_JWT_SECRET.as_bytes()),
    )
    .expect("test token should encode");
    format!("Bearer {token}")
}

pub struct TestResponse {
    pub status: StatusCode,
    pub headers: axum::http::HeaderMap,
    pub body: Vec<u8>,
}

impl TestResponse {
    pub fn json(&self) -> Value {
        serde_json::from_slice(&self.body).expect("response body should be json")
    }

    pub fn error_code(&self) -> Option<String> {
        self.json()["error"]["code"].as_str().map(str::to_string)
    }

    /// Splits an SSE body into `(event, data)` pairs.
    pub fn sse_events(&self) -> Vec<(String, Value)> {
        let text = String::from_utf8(self.body.clone()).expect("sse body should be utf-8");
        text.split("\n\n")
            .filter_map(|block| {
                let mut event = None;
                let mut data = String::new();
                for line in block.lines() {
                    if let Some(name) = line.strip_prefix("event:") {
                        event = Some(name.trim().to_string());
                    } else if let Some(chunk) = line.strip_prefix("data:") {
                        data.push_str(chunk.strip_prefix(' ').unwrap_or(chunk));
                    }
                }
                let event = event?;
                let data = serde_json::from_str(&data).expect("sse data should be json");
                Some((event, data))
            })
            .collect()
    }
}

pub async fn send(
    app: &TestApp,
    method: Method,
    uri: &str,
    auth: Option<&str>,
    body: Option<Value>,
) -> TestResponse {
    let mut builder = Request::builder()
        .method(method)
        .uri(uri)
        .header(header::USER_AGENT, "integration-tests");
    if let Some(auth) = auth {
        builder = builder.header(header::AUTHORIZATION, auth);
    }
    let request = match body {
        Some(body) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string())),
        None => builder.body(Body::empty()),
    }
    .expect("request should build");

    let response = app
        .router
        .clone()
        .oneshot(request)
        .await
        .expect("router should respond");
    let status = response.status();
    let headers = response.headers().clone();
    let body = to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("response body should read")
        .to_vec();

    TestResponse {
        status,
        headers,
        body,
    }
}
