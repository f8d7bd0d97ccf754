use std::collections::VecDeque;
use std::pin::Pin;
use std::time::Duration;

use futures::{Stream, StreamExt, stream};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::config::OllamaConfig;

use super::client::{
    ContextMessage, ModelClient, ModelClientError, ModelDeltaStream, ModelReplyFuture,
    ModelStreamFuture,
};
use super::frames::{FrameBuffer, extract_content_delta, extract_error_message, is_done_frame};

#[derive(Debug, Error)]
pub enum OllamaClientError {
    #[error("failed to build Ollama http client: {0}")]
    HttpClient(String),
}

#[derive(Debug, Serialize)]
struct OllamaChatRequest<'a> {
    model: &'a str,
    messages: &'a [ContextMessage],
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct OllamaChatResponse {
    #[serde(default)]
    message: Option<OllamaReplyMessage>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OllamaReplyMessage {
    #[serde(default)]
    content: String,
}

/// Client for a local Ollama server's `/api/chat` endpoint. No retries; every
/// failure is surfaced to the caller.
#[derive(Clone)]
pub struct OllamaModelClient {
    client: reqwest::Client,
    chat_url: String,
    timeout: Duration,
    stream_timeout: Duration,
}

impl OllamaModelClient {
    pub fn new(config: &OllamaConfig) -> Result<Self, OllamaClientError> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|err| OllamaClientError::HttpClient(err.to_string()))?;

        Ok(Self {
            client,
            chat_url: format!("{}/api/chat", config.base_url.trim_end_matches('/')),
            timeout: Duration::from_millis(config.timeout_ms),
            stream_timeout: Duration::from_millis(config.stream_timeout_ms),
        })
    }

    async fn send(
        &self,
        model: &str,
        context: &[ContextMessage],
        stream: bool,
        timeout: Duration,
    ) -> Result<reqwest::Response, ModelClientError> {
        let response = self
            .client
            .post(&self.chat_url)
            .timeout(timeout)
            .json(&OllamaChatRequest {
                model,
                messages: context,
                stream,
            })
            .send()
            .await
            .map_err(map_transport_error)?;

        let status = response.status();
        if !status.is_success() {
            return Err(ModelClientError::ProviderStatus {
                status: status.as_u16(),
            });
        }
        Ok(response)
    }

    async fn chat_once(
        &self,
        model: &str,
        context: &[ContextMessage],
    ) -> Result<String, ModelClientError> {
        let response = self.send(model, context, false, self.timeout).await?;
        let body = response.text().await.map_err(map_transport_error)?;
        let parsed = serde_json::from_str::<OllamaChatResponse>(&body)
            .map_err(|_| ModelClientError::InvalidPayload("response_not_json".to_string()))?;

        if let Some(message) = parsed.error {
            return Err(ModelClientError::Provider(message));
        }
        let message = parsed
            .message
            .ok_or_else(|| ModelClientError::InvalidPayload("missing_message".to_string()))?;

        debug!(model, chars = message.content.chars().count(), "model reply received");
        Ok(message.content)
    }
}

impl ModelClient for OllamaModelClient {
    fn chat<'a>(&'a self, model: &'a str, context: &'a [ContextMessage]) -> ModelReplyFuture<'a> {
        Box::pin(self.chat_once(model, context))
    }

    fn chat_stream<'a>(
        &'a self,
        model: &'a str,
        context: &'a [ContextMessage],
    ) -> ModelStreamFuture<'a> {
        Box::pin(async move {
            let response = self
                .send(model, context, true, self.stream_timeout)
                .await?;
            let body = response
                .bytes_stream()
                .map(|chunk| chunk.map_err(map_transport_error));
            Ok(delta_stream(body))
        })
    }
}

struct DeltaStreamState<S> {
    body: Pin<Box<S>>,
    frames: FrameBuffer,
    queued: VecDeque<Result<String, ModelClientError>>,
    finished: bool,
}

impl<S> DeltaStreamState<S> {
    fn accept_frame(&mut self, frame: &str) {
        if self.finished {
            return;
        }

        if let Some(message) = extract_error_message(frame) {
            self.queued.push_back(Err(ModelClientError::Provider(message)));
            self.finished = true;
            return;
        }
        if let Some(delta) = extract_content_delta(frame)
            && !delta.is_empty()
        {
            self.queued.push_back(Ok(delta));
        }
        if is_done_frame(frame) {
            self.finished = true;
        }
    }
}

/// Turns a raw NDJSON body into text deltas. A body that ends before the
/// completion frame yields [`ModelClientError::StreamTruncated`].
pub(crate) fn delta_stream<S, B>(body: S) -> ModelDeltaStream
where
    S: Stream<Item = Result<B, ModelClientError>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
{
    let state = DeltaStreamState {
        body: Box::pin(body),
        frames: FrameBuffer::default(),
        queued: VecDeque::new(),
        finished: false,
    };

    Box::pin(stream::unfold(state, |mut state| async move {
        loop {
            if let Some(item) = state.queued.pop_front() {
                return Some((item, state));
            }
            if state.finished {
                return None;
            }

            match state.body.next().await {
                Some(Ok(chunk)) => {
                    for frame in state.frames.push(chunk.as_ref()) {
                        state.accept_frame(&frame);
                    }
                }
                Some(Err(err)) => {
                    state.queued.push_back(Err(err));
                    state.finished = true;
                }
                None => {
                    if let Some(frame) = state.frames.finish() {
                        state.accept_frame(&frame);
                    }
                    if !state.finished {
                        state.queued.push_back(Err(ModelClientError::StreamTruncated));
                        state.finished = true;
                    }
                }
            }
        }
    }))
}

fn map_transport_error(err: reqwest::Error) -> ModelClientError {
    if err.is_timeout() {
        ModelClientError::Timeout
    } else {
        ModelClientError::Transport("request_unavailable".to_string())
    }
}
