//! HTTP transport for both OpenAI protocols.

use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::{self, BoxStream};
use futures_util::StreamExt;
use reqwest::{Client, Response};
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tracing::debug;
use url::Url;

use crate::agent::{ChatClient, ChatRequest, ChatResponse, EventStream, ResponsesClient, ResponsesRequest, StreamEvent};
use crate::error::Error;
use crate::platform::Resolution;
use crate::Result;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Client for an OpenAI-compatible endpoint.
pub struct OpenAiClient {
    client: Client,
    base_url: String,
    api_key: String,
}

impl OpenAiClient {
    /// Build a client for the resolved platform, reading the key from its
    /// environment variable.
    pub fn new(resolution: &Resolution) -> Result<Self> {
        let api_key = std::env::var(&resolution.api_key_env_var).map_err(|_| {
            Error::config(
                "api_key_env_var",
                resolution.api_key_env_var.clone(),
                "environment variable is not set",
            )
        })?;
        Self::with_key(&resolution.base_url, api_key)
    }

    pub fn with_key(base_url: &str, api_key: impl Into<String>) -> Result<Self> {
        Url::parse(base_url).map_err(|e| Error::config("base_url", base_url, e.to_string()))?;
        let client = Client::builder().connect_timeout(CONNECT_TIMEOUT).build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.into(),
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    async fn post(&self, path: &str, body: &Value, cancel: &CancellationToken) -> Result<Response> {
        let request = self
            .client
            .post(self.endpoint(path))
            .bearer_auth(&self.api_key)
            .json(body)
            .send();

        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Error::Cancelled),
            response = request => response?,
        };

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(Error::Provider(error_message(status.as_u16(), &text)));
        }
        Ok(response)
    }
}

/// Human-readable provider error, keeping the provider's error code.
fn error_message(status: u16, body: &str) -> String {
    let parsed: Option<Value> = serde_json::from_str(body).ok();
    let error = parsed.as_ref().and_then(|v| v.get("error"));
    let message = error
        .and_then(|e| e.get("message"))
        .and_then(Value::as_str)
        .unwrap_or(body.trim());
    match error.and_then(|e| e.get("code")).and_then(Value::as_str) {
        Some(code) => format!("OpenAI API error ({}, {}): {}", status, code, message),
        None => format!("OpenAI API error ({}): {}", status, message),
    }
}

#[async_trait]
impl ChatClient for OpenAiClient {
    async fn complete(&self, request: ChatRequest, cancel: &CancellationToken) -> Result<ChatResponse> {
        debug!(model = %request.model, messages = request.messages.len(), "POST chat/completions");
        let response = self.post("chat/completions", &request.to_body(), cancel).await?;
        let body: Value = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Error::Cancelled),
            body = response.json() => body?,
        };
        ChatResponse::from_body(&body)
    }
}

#[async_trait]
impl ResponsesClient for OpenAiClient {
    async fn stream(&self, request: ResponsesRequest, cancel: &CancellationToken) -> Result<EventStream> {
        debug!(model = %request.model, input = request.input.len(), "POST responses");
        let mut body = request.to_body();
        body["stream"] = json!(true);
        let response = self.post("responses", &body, cancel).await?;

        let state = SseState {
            bytes: response
                .bytes_stream()
                .map(|chunk| chunk.map(|bytes| bytes.to_vec()))
                .boxed(),
            parser: SseParser::default(),
            queued: VecDeque::new(),
            cancel: cancel.clone(),
            finished: false,
        };
        Ok(stream::unfold(state, next_event).boxed())
    }
}

struct SseState {
    bytes: BoxStream<'static, reqwest::Result<Vec<u8>>>,
    parser: SseParser,
    queued: VecDeque<StreamEvent>,
    cancel: CancellationToken,
    finished: bool,
}

async fn next_event(mut state: SseState) -> Option<(Result<StreamEvent>, SseState)> {
    loop {
        if let Some(event) = state.queued.pop_front() {
            return Some((Ok(event), state));
        }
        if state.finished {
            return None;
        }

        let next = tokio::select! {
            biased;
            _ = state.cancel.cancelled() => None,
            chunk = state.bytes.next() => Some(chunk),
        };
        match next {
            None => {
                state.finished = true;
                return Some((Err(Error::Cancelled), state));
            }
            Some(Some(Ok(chunk))) => {
                let events = state.parser.feed(&chunk);
                state.queued.extend(events);
            }
            Some(Some(Err(e))) => {
                state.finished = true;
                return Some((Err(Error::Http(e)), state));
            }
            Some(None) => {
                state.finished = true;
                let events = state.parser.finish();
                state.queued.extend(events);
            }
        }
    }
}

/// Incremental parser for server-sent event frames.
#[derive(Debug, Default)]
pub struct SseParser {
    buffer: Vec<u8>,
}

impl SseParser {
    /// Feed raw bytes and drain every complete event.
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<StreamEvent> {
        self.buffer.extend(bytes.iter().filter(|b| **b != b'\r'));
        let mut events = Vec::new();

        while let Some(split) = self.buffer.windows(2).position(|w| w == b"\n\n") {
            let frame: Vec<u8> = self.buffer.drain(..split + 2).collect();
            if let Some(event) = parse_frame(&frame[..split]) {
                events.push(event);
            }
        }
        events
    }

    /// Parse whatever remains once the body has ended.
    pub fn finish(&mut self) -> Vec<StreamEvent> {
        let frame = std::mem::take(&mut self.buffer);
        parse_frame(&frame).into_iter().collect()
    }
}

fn parse_frame(frame: &[u8]) -> Option<StreamEvent> {
    let text = String::from_utf8_lossy(frame);
    let payload = text
        .lines()
        .filter_map(|line| line.strip_prefix("data:"))
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n");

    if payload.is_empty() || payload == "[DONE]" {
        return None;
    }
    match serde_json::from_str::<Value>(&payload) {
        Ok(value) => StreamEvent::from_value(value),
        Err(e) => {
            debug!(error = %e, "Skipping malformed event payload");
            None
        }
    }
}
