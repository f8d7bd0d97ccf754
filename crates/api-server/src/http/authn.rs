use axum::extract::{Request, State};
use axum::http::header;
use axum::middleware::Next;
use axum::response::Response;
use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode};
use serde::Deserialize;
use tracing::warn;
use uuid::Uuid;

use super::errors::unauthorized_response;
use super::{AppState, AuthUser};

/// Verifies HS256 bearer tokens minted by the account service.
#[derive(Clone)]
pub struct TokenVerifier {
    decoding_key: DecodingKey,
    validation: Validation,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum TokenRejection {
    Malformed,
    MissingSubject,
    InvalidSubject,
}

impl TokenRejection {
    fn as_str(self) -> &'static str {
        match self {
            Self::Malformed => "malformed_or_expired",
            Self::MissingSubject => "missing_subject",
            Self::InvalidSubject => "invalid_subject",
        }
    }
}

#[derive(Debug, Deserialize)]
struct BearerClaims {
    #[serde(default)]
    sub: Option<String>,
    #[serde(default)]
    user_id: Option<String>,
}

impl TokenVerifier {
    pub fn new(secret: &str) -> Self {
        Self {
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            validation: Validation::new(Algorithm::HS256),
        }
    }

    pub(super) fn verify(&self, token: &str) -> Result<Uuid, TokenRejection> {
        let data = decode::<BearerClaims>(token, &self.decoding_key, &self.validation)
            .map_err(|_| TokenRejection::Malformed)?;

        let subject = data
            .claims
            .sub
            .or(data.claims.user_id)
            .ok_or(TokenRejection::MissingSubject)?;
        Uuid::parse_str(subject.trim()).map_err(|_| TokenRejection::InvalidSubject)
    }
}

pub(super) async fn auth_middleware(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Response {
    let auth_header = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();

    let token = auth_header
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|token| !token.is_empty());

    let Some(token) = token else {
        warn!("missing or invalid authorization header");
        return unauthorized_response();
    };

    let user_id = match state.token_verifier.verify(token) {
        Ok(user_id) => user_id,
        Err(rejection) => {
            warn!(reason = rejection.as_str(), "bearer token rejected");
            return unauthorized_response();
        }
    };

    req.extensions_mut().insert(AuthUser { user_id });
    next.run(req).await
}
