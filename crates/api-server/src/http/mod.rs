use std::collections::HashSet;
use std::net::IpAddr;
use std::sync::Arc;

use axum::routing::{get, post};
use axum::{Router, middleware};
use shared::chat::ChatOrchestrator;
use shared::repos::Store;
use uuid::Uuid;

mod authn;
mod chat;
mod client_meta;
mod errors;
mod health;
mod observability;
mod rate_limit;

pub use authn::TokenVerifier;
pub use rate_limit::{RateLimitPolicy, RateLimiter};

#[derive(Clone)]
pub struct AppState {
    pub store: Store,
    pub orchestrator: Arc<ChatOrchestrator>,
    pub token_verifier: TokenVerifier,
    pub rate_limiter: RateLimiter,
    pub trusted_proxy_ips: HashSet<IpAddr>,
}

#[derive(Clone, Copy)]
pub(super) struct AuthUser {
    pub(super) user_id: Uuid,
}

pub fn build_router(app_state: AppState) -> Router {
    let public_routes = Router::new()
        .route("/healthz", get(health::healthz))
        .route("/readyz", get(health::readyz))
        .with_state(app_state.clone());

    // Layers run bottom-up: auth resolves the caller before the limiter keys on it.
    let chat_routes = Router::new()
        .route("/v1/chat", post(chat::chat))
        .route("/v1/chat/stream", post(chat::chat_stream))
        .route("/v1/chat/sessions/{session_id}", post(chat::chat_in_session))
        .route(
            "/v1/chat/sessions/{session_id}/stream",
            post(chat::chat_stream_in_session),
        )
        .layer(middleware::from_fn_with_state(
            app_state.clone(),
            client_meta::client_meta_middleware,
        ))
        .layer(middleware::from_fn_with_state(
            app_state.clone(),
            rate_limit::chat_rate_limit_middleware,
        ))
        .layer(middleware::from_fn_with_state(
            app_state.clone(),
            authn::auth_middleware,
        ))
        .with_state(app_state);

    public_routes
        .merge(chat_routes)
        .layer(middleware::from_fn(
            observability::request_observability_middleware,
        ))
}
