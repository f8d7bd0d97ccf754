use std::sync::Arc;

use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::llm::{ConversationAssembler, ModelClient};
use crate::models::{ChatRequest, ChatResponse, IncidentSource, RequestMeta};
use crate::repos::{ChatStore, CommitTurn, PrepareTurn};
use crate::security::{
    IncidentReport, InputScreen, InputVerdict, OutputScreen, OutputVerdict,
    SecurityIncidentLogger, sanitize,
};

use super::errors::{ChatError, ChatRequestError};
use super::request::{estimate_tokens, non_blank, validate_chat_request};

/// Lifecycle of one chat turn. `Aborted` is terminal and reachable from any
/// earlier state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnState {
    Received,
    Validated,
    ContextBuilt,
    ModelCalled,
    OutputValidated,
    Persisted,
    Responded,
    Aborted,
}

impl TurnState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Received => "received",
            Self::Validated => "validated",
            Self::ContextBuilt => "context_built",
            Self::ModelCalled => "model_called",
            Self::OutputValidated => "output_validated",
            Self::Persisted => "persisted",
            Self::Responded => "responded",
            Self::Aborted => "aborted",
        }
    }
}

pub(super) struct TurnTrace {
    turn_id: Uuid,
    user_id: Uuid,
    state: TurnState,
}

impl TurnTrace {
    pub(super) fn start(user_id: Uuid) -> Self {
        let trace = Self {
            turn_id: Uuid::new_v4(),
            user_id,
            state: TurnState::Received,
        };
        debug!(turn_id = %trace.turn_id, user_id = %user_id, state = trace.state.as_str(), "chat turn received");
        trace
    }

    pub(super) fn advance(&mut self, next: TurnState) {
        debug!(
            turn_id = %self.turn_id,
            user_id = %self.user_id,
            from = self.state.as_str(),
            to = next.as_str(),
            "chat turn advanced"
        );
        self.state = next;
    }

    pub(super) fn abort(&mut self, reason: &str) {
        info!(
            turn_id = %self.turn_id,
            user_id = %self.user_id,
            from = self.state.as_str(),
            reason,
            "chat turn aborted"
        );
        self.state = TurnState::Aborted;
    }
}

#[derive(Debug, Clone)]
pub struct ChatSettings {
    pub default_model: String,
    pub system_prompt: Option<String>,
    pub max_history_messages: usize,
}

pub struct ChatDependencies {
    pub store: Arc<dyn ChatStore>,
    pub model_client: Arc<dyn ModelClient>,
    pub input_screen: Arc<dyn InputScreen>,
    pub output_screen: Arc<dyn OutputScreen>,
    pub incidents: SecurityIncidentLogger,
}

/// Drives a chat turn through screening, persistence and the model call.
/// Persistence is split so no transaction spans the model call.
pub struct ChatOrchestrator {
    pub(super) store: Arc<dyn ChatStore>,
    pub(super) model_client: Arc<dyn ModelClient>,
    pub(super) input_screen: Arc<dyn InputScreen>,
    pub(super) output_screen: Arc<dyn OutputScreen>,
    pub(super) incidents: SecurityIncidentLogger,
    pub(super) assembler: ConversationAssembler,
    pub(super) default_model: String,
}

impl ChatOrchestrator {
    pub fn new(dependencies: ChatDependencies, settings: ChatSettings) -> Self {
        Self {
            store: dependencies.store,
            model_client: dependencies.model_client,
            input_screen: dependencies.input_screen,
            output_screen: dependencies.output_screen,
            incidents: dependencies.incidents,
            assembler: ConversationAssembler::new(
                settings.system_prompt,
                settings.max_history_messages,
            ),
            default_model: settings.default_model,
        }
    }

    pub async fn chat(
        &self,
        user_id: Uuid,
        request: ChatRequest,
        meta: RequestMeta,
    ) -> Result<ChatResponse, ChatError> {
        let mut trace = TurnTrace::start(user_id);
        let user_text = match self.admit(user_id, &request, &meta) {
            Ok(text) => text,
            Err(err) => {
                trace.abort(err.code());
                return Err(err);
            }
        };
        trace.advance(TurnState::Validated);

        let prepared = match self
            .store
            .prepare_turn(self.prepare_request(user_id, &request, &user_text))
            .await
        {
            Ok(prepared) => prepared,
            Err(err) => {
                let err = ChatError::from(err);
                trace.abort(err.code());
                return Err(err);
            }
        };
        let context = self.assembler.assemble(&prepared.history, &user_text);
        trace.advance(TurnState::ContextBuilt);

        let reply = match self.model_client.chat(&prepared.model, &context).await {
            Ok(reply) => reply,
            Err(err) => {
                warn!(
                    user_id = %user_id,
                    session_id = %prepared.session.session_id,
                    model = %prepared.model,
                    "model call failed; user message kept without a reply: {err}"
                );
                trace.abort("model_unavailable");
                return Err(err.into());
            }
        };
        trace.advance(TurnState::ModelCalled);

        let assistant_text = self.screen_reply(user_id, &reply, &meta);
        trace.advance(TurnState::OutputValidated);

        let token_count = estimate_tokens(&assistant_text);
        let committed = match self
            .store
            .commit_turn(CommitTurn {
                session_id: prepared.session.session_id,
                assistant_text: assistant_text.clone(),
                token_count,
                model: prepared.model.clone(),
            })
            .await
        {
            Ok(committed) => committed,
            Err(err) => {
                let err = ChatError::from(err);
                trace.abort(err.code());
                return Err(err);
            }
        };
        trace.advance(TurnState::Persisted);

        let response = ChatResponse {
            session_id: prepared.session.session_id,
            user_message_id: prepared.user_message.id,
            assistant_message_id: committed.assistant_message.id,
            assistant_text,
            model: prepared.model,
            token_count,
            is_new_session: prepared.is_new_session,
        };
        trace.advance(TurnState::Responded);
        Ok(response)
    }

    /// Validates, screens and sanitizes the inbound message. A rejection is
    /// reported as an incident before returning.
    pub(super) fn admit(
        &self,
        user_id: Uuid,
        request: &ChatRequest,
        meta: &RequestMeta,
    ) -> Result<String, ChatError> {
        validate_chat_request(request)?;

        if let InputVerdict::Reject(rejection) = self.input_screen.screen(&request.message) {
            warn!(
                user_id = %user_id,
                category = %rejection.category,
                "chat message rejected by input screening"
            );
            self.incidents.report(IncidentReport {
                user_id,
                source: IncidentSource::Input,
                category: rejection.category.clone(),
                offending_text: request.message.clone(),
                request: meta.clone(),
            });
            return Err(ChatError::Rejected {
                category: rejection.category,
            });
        }

        let sanitized = sanitize(&request.message);
        if sanitized.is_empty() {
            return Err(ChatRequestError::EmptyMessage.into());
        }
        Ok(sanitized)
    }

    pub(super) fn prepare_request(
        &self,
        user_id: Uuid,
        request: &ChatRequest,
        user_text: &str,
    ) -> PrepareTurn {
        PrepareTurn {
            user_id,
            session_id: request.session_id,
            session_title: non_blank(request.session_title.as_deref()),
            requested_model: non_blank(request.model.as_deref()),
            default_model: self.default_model.clone(),
            user_text: user_text.to_string(),
            user_token_count: estimate_tokens(user_text),
            history_limit: self.assembler.max_history_messages(),
        }
    }

    /// Screens a complete reply; a blocked reply is swapped for the refusal
    /// text and reported.
    pub(super) fn screen_reply(
        &self,
        user_id: Uuid,
        reply: &str,
        meta: &RequestMeta,
    ) -> String {
        match self.output_screen.screen(reply) {
            OutputVerdict::Safe(text) => text,
            OutputVerdict::Blocked {
                replacement,
                violations,
            } => {
                self.report_blocked_output(user_id, reply, &violations, meta);
                replacement
            }
        }
    }

    pub(super) fn report_blocked_output(
        &self,
        user_id: Uuid,
        reply: &str,
        violations: &[String],
        meta: &RequestMeta,
    ) {
        let category = violations.join(",");
        warn!(
            user_id = %user_id,
            violations = %category,
            "model reply blocked by output screening"
        );
        self.incidents.report(IncidentReport {
            user_id,
            source: IncidentSource::Output,
            category,
            offending_text: reply.to_string(),
            request: meta.clone(),
        });
    }
}
