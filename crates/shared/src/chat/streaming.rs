use std::sync::Arc;

use futures::StreamExt;
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::models::{ChatRequest, RequestMeta};
use crate::repos::CommitTurn;
use crate::security::OutputVerdict;

use super::errors::ChatError;
use super::orchestrator::{ChatOrchestrator, TurnState, TurnTrace};
use super::request::estimate_tokens;

const STREAM_EVENT_BUFFER: usize = 64;

/// Events of a streamed turn, in order: `Session`, zero or more `Message`,
/// then exactly one of `Done` or `Error`. `Error` may also arrive first when
/// the turn fails before a session is resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatStreamEvent {
    Session {
        session_id: Uuid,
        user_message_id: i64,
    },
    Message(String),
    Done {
        assistant_message_id: i64,
        replacement: Option<String>,
    },
    Error {
        code: String,
        message: String,
    },
}

impl ChatStreamEvent {
    pub fn from_error(err: &ChatError) -> Self {
        Self::Error {
            code: err.code().to_string(),
            message: err.public_message(),
        }
    }
}

struct EventSink {
    sender: mpsc::Sender<ChatStreamEvent>,
    connected: bool,
    user_id: Uuid,
}

impl EventSink {
    /// Delivery is best-effort. Once the consumer is gone the turn keeps
    /// running and later events are dropped.
    async fn send(&mut self, event: ChatStreamEvent) {
        if !self.connected {
            return;
        }
        if self.sender.send(event).await.is_err() {
            self.connected = false;
            info!(user_id = %self.user_id, "stream consumer disconnected; finishing turn without delivery");
        }
    }
}

impl ChatOrchestrator {
    /// Admits the message synchronously, then drives the turn on a detached
    /// task that reports progress through the returned channel.
    pub fn chat_stream(
        self: &Arc<Self>,
        user_id: Uuid,
        request: ChatRequest,
        meta: RequestMeta,
    ) -> Result<mpsc::Receiver<ChatStreamEvent>, ChatError> {
        let mut trace = TurnTrace::start(user_id);
        let user_text = match self.admit(user_id, &request, &meta) {
            Ok(text) => text,
            Err(err) => {
                trace.abort(err.code());
                return Err(err);
            }
        };
        trace.advance(TurnState::Validated);

        let (sender, receiver) = mpsc::channel(STREAM_EVENT_BUFFER);
        let sink = EventSink {
            sender,
            connected: true,
            user_id,
        };
        let orchestrator = Arc::clone(self);
        tokio::spawn(async move {
            orchestrator
                .run_stream_turn(user_id, request, user_text, meta, sink, trace)
                .await;
        });

        Ok(receiver)
    }

    async fn run_stream_turn(
        &self,
        user_id: Uuid,
        request: ChatRequest,
        user_text: String,
        meta: RequestMeta,
        mut sink: EventSink,
        mut trace: TurnTrace,
    ) {
        let prepared = match self
            .store
            .prepare_turn(self.prepare_request(user_id, &request, &user_text))
            .await
        {
            Ok(prepared) => prepared,
            Err(err) => {
                let err = ChatError::from(err);
                trace.abort(err.code());
                sink.send(ChatStreamEvent::from_error(&err)).await;
                return;
            }
        };
        let session_id = prepared.session.session_id;
        sink.send(ChatStreamEvent::Session {
            session_id,
            user_message_id: prepared.user_message.id,
        })
        .await;

        let context = self.assembler.assemble(&prepared.history, &user_text);
        trace.advance(TurnState::ContextBuilt);

        let mut deltas = match self
            .model_client
            .chat_stream(&prepared.model, &context)
            .await
        {
            Ok(deltas) => deltas,
            Err(err) => {
                warn!(user_id = %user_id, session_id = %session_id, "model stream could not start: {err}");
                trace.abort("model_unavailable");
                sink.send(ChatStreamEvent::from_error(&ChatError::Provider(err)))
                    .await;
                return;
            }
        };
        trace.advance(TurnState::ModelCalled);

        let window_chars = self.output_screen.window_chars();
        let mut accumulated = String::new();
        let mut blocked: Option<(String, Vec<String>)> = None;
        while let Some(item) = deltas.next().await {
            let delta = match item {
                Ok(delta) => delta,
                Err(err) => {
                    warn!(
                        user_id = %user_id,
                        session_id = %session_id,
                        received_chars = accumulated.chars().count(),
                        "model stream failed; partial reply discarded: {err}"
                    );
                    trace.abort("model_unavailable");
                    sink.send(ChatStreamEvent::from_error(&ChatError::Provider(err)))
                        .await;
                    return;
                }
            };

            let window_start = screen_window_start(&accumulated, window_chars);
            accumulated.push_str(&delta);
            if blocked.is_some() {
                continue;
            }
            match self.output_screen.screen(&accumulated[window_start..]) {
                OutputVerdict::Safe(_) => sink.send(ChatStreamEvent::Message(delta)).await,
                OutputVerdict::Blocked {
                    replacement,
                    violations,
                } => {
                    info!(user_id = %user_id, session_id = %session_id, "withholding remaining stream after output violation");
                    blocked = Some((replacement, violations));
                }
            }
        }

        if blocked.is_none()
            && let OutputVerdict::Blocked {
                replacement,
                violations,
            } = self.output_screen.screen(&accumulated)
        {
            blocked = Some((replacement, violations));
        }

        let (assistant_text, replacement) = match blocked {
            Some((replacement, violations)) => {
                self.report_blocked_output(user_id, &accumulated, &violations, &meta);
                (replacement.clone(), Some(replacement))
            }
            None => (accumulated, None),
        };
        trace.advance(TurnState::OutputValidated);

        let committed = match self
            .store
            .commit_turn(CommitTurn {
                session_id,
                assistant_text: assistant_text.clone(),
                token_count: estimate_tokens(&assistant_text),
                model: prepared.model.clone(),
            })
            .await
        {
            Ok(committed) => committed,
            Err(err) => {
                let err = ChatError::from(err);
                trace.abort(err.code());
                sink.send(ChatStreamEvent::from_error(&err)).await;
                return;
            }
        };
        trace.advance(TurnState::Persisted);

        sink.send(ChatStreamEvent::Done {
            assistant_message_id: committed.assistant_message.id,
            replacement,
        })
        .await;
        trace.advance(TurnState::Responded);
    }
}

/// Byte offset where incremental screening of `screened` resumes: the last
/// `window_chars` characters, advanced to a whitespace boundary so a cut word
/// cannot satisfy a `\b` anchor.
fn screen_window_start(screened: &str, window_chars: usize) -> usize {
    if window_chars == 0 {
        return screened.len();
    }
    let Some((start, _)) = screened.char_indices().rev().nth(window_chars - 1) else {
        return 0;
    };
    if start == 0 {
        return 0;
    }
    screened[start..]
        .find(char::is_whitespace)
        .map_or(screened.len(), |offset| start + offset)
}
