//! Transport contracts for the two OpenAI protocols
//!
//! The turn loops never talk HTTP themselves. They hand a request to a
//! [`ChatClient`] or [`ResponsesClient`]; `crate::http` provides the real
//! implementation and the fakes below script responses for tests.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures_util::stream::{self, BoxStream, StreamExt};
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use super::message::ChatMessage;
use super::stream::StreamEvent;
use super::usage::TokenCounts;
use crate::error::Error;
use crate::tools::ToolDefinition;
use crate::Result;

/// Non-streaming chat completions request
#[derive(Debug, Clone, PartialEq)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub tools: Vec<ToolDefinition>,
    /// Omitted for reasoning models
    pub max_tokens: Option<u32>,
    pub reasoning_effort: Option<String>,
}

impl ChatRequest {
    /// JSON body for `POST /chat/completions`
    pub fn to_body(&self) -> Value {
        let mut body = json!({
            "model": self.model,
            "messages": self.messages,
        });
        if let Some(max) = self.max_tokens {
            body["max_tokens"] = json!(max);
        }
        if let Some(effort) = &self.reasoning_effort {
            body["reasoning_effort"] = json!(effort);
        }
        if !self.tools.is_empty() {
            body["tools"] = Value::Array(
                self.tools
                    .iter()
                    .map(|t| {
                        json!({
                            "type": "function",
                            "function": {
                                "name": t.name,
                                "description": t.description,
                                "parameters": t.parameters,
                            }
                        })
                    })
                    .collect(),
            );
            body["tool_choice"] = json!("auto");
        }
        body
    }
}

/// Result of one chat completions exchange
#[derive(Debug, Clone, PartialEq)]
pub struct ChatResponse {
    pub message: ChatMessage,
    pub usage: TokenCounts,
    pub model: String,
}

impl ChatResponse {
    /// Parse a `/chat/completions` response body
    pub fn from_body(body: &Value) -> Result<Self> {
        let choice = body
            .get("choices")
            .and_then(Value::as_array)
            .and_then(|c| c.first())
            .ok_or_else(|| Error::Provider("no response choices returned".to_string()))?;
        let message: ChatMessage = serde_json::from_value(
            choice.get("message").cloned().unwrap_or(Value::Null),
        )?;

        let usage = body.get("usage");
        let int = |path: &[&str]| {
            let mut v = usage;
            for key in path {
                v = v.and_then(|u| u.get(*key));
            }
            v.and_then(Value::as_i64).unwrap_or(0)
        };
        let cached = int(&["prompt_tokens_details", "cached_tokens"]);

        Ok(Self {
            message,
            usage: TokenCounts {
                input: (int(&["prompt_tokens"]) - cached).max(0),
                output: int(&["completion_tokens"]),
                cached_input: cached,
            },
            model: body
                .get("model")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
        })
    }
}

/// Streaming responses request
#[derive(Debug, Clone, PartialEq)]
pub struct ResponsesRequest {
    pub model: String,
    pub instructions: String,
    pub input: Vec<Value>,
    pub tools: Vec<ToolDefinition>,
    pub previous_response_id: Option<String>,
    pub store: bool,
    pub max_output_tokens: Option<u32>,
    pub reasoning_effort: Option<String>,
}

impl ResponsesRequest {
    /// JSON body for `POST /responses`
    pub fn to_body(&self) -> Value {
        let mut body = json!({
            "model": self.model,
            "instructions": self.instructions,
            "input": self.input,
            "stream": true,
            "store": self.store,
        });
        if let Some(prev) = &self.previous_response_id {
            body["previous_response_id"] = json!(prev);
        }
        if let Some(max) = self.max_output_tokens {
            body["max_output_tokens"] = json!(max);
        }
        if let Some(effort) = &self.reasoning_effort {
            body["reasoning"] = json!({"effort": effort, "summary": "auto"});
        }
        if !self.tools.is_empty() {
            body["tools"] = Value::Array(
                self.tools
                    .iter()
                    .map(|t| {
                        json!({
                            "type": "function",
                            "name": t.name,
                            "description": t.description,
                            "parameters": t.parameters,
                        })
                    })
                    .collect(),
            );
            body["tool_choice"] = json!("auto");
        }
        body
    }
}

pub type EventStream = BoxStream<'static, Result<StreamEvent>>;

/// Chat completions transport - swappable provider abstraction
#[async_trait]
pub trait ChatClient: Send + Sync {
    async fn complete(&self, request: ChatRequest, cancel: &CancellationToken) -> Result<ChatResponse>;
}

/// Responses transport yielding decoded events
#[async_trait]
pub trait ResponsesClient: Send + Sync {
    async fn stream(&self, request: ResponsesRequest, cancel: &CancellationToken) -> Result<EventStream>;
}

/// Both transports a thread may need.
#[derive(Clone)]
pub struct Backend {
    pub chat: Arc<dyn ChatClient>,
    pub responses: Arc<dyn ResponsesClient>,
}

impl Backend {
    pub fn new(chat: Arc<dyn ChatClient>, responses: Arc<dyn ResponsesClient>) -> Self {
        Self { chat, responses }
    }

    /// One client serving both protocols.
    pub fn from_client<C>(client: Arc<C>) -> Self
    where
        C: ChatClient + ResponsesClient + 'static,
    {
        Self {
            chat: client.clone(),
            responses: client,
        }
    }
}

/// Fake chat client for testing
#[derive(Default)]
pub struct FakeChatClient {
    responses: Mutex<VecDeque<Result<ChatResponse>>>,
    requests: Mutex<Vec<ChatRequest>>,
}

impl FakeChatClient {
    /// Create with predefined assistant messages
    pub fn new(messages: Vec<ChatMessage>) -> Self {
        let client = Self::default();
        for message in messages {
            client.push(message);
        }
        client
    }

    /// Queue an assistant message
    pub fn push(&self, message: ChatMessage) {
        self.push_result(Ok(ChatResponse {
            message,
            usage: TokenCounts {
                input: 100,
                output: 20,
                cached_input: 0,
            },
            model: "fake-model".to_string(),
        }));
    }

    pub fn push_result(&self, result: Result<ChatResponse>) {
        self.responses
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push_back(result);
    }

    /// Requests received so far
    pub fn requests(&self) -> Vec<ChatRequest> {
        self.requests.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

#[async_trait]
impl ChatClient for FakeChatClient {
    async fn complete(&self, request: ChatRequest, cancel: &CancellationToken) -> Result<ChatResponse> {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        self.requests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(request);
        self.responses
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front()
            .unwrap_or_else(|| Err(Error::Provider("No more fake responses".to_string())))
    }
}

/// Fake responses client replaying scripted event sequences
#[derive(Default)]
pub struct FakeResponsesClient {
    scripts: Mutex<VecDeque<Vec<StreamEvent>>>,
    requests: Mutex<Vec<ResponsesRequest>>,
}

impl FakeResponsesClient {
    pub fn new(scripts: Vec<Vec<StreamEvent>>) -> Self {
        Self {
            scripts: Mutex::new(scripts.into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Events for a plain text reply completed under `response_id`
    pub fn text_script(response_id: &str, deltas: &[&str]) -> Vec<StreamEvent> {
        let mut events: Vec<StreamEvent> = deltas
            .iter()
            .map(|d| StreamEvent::OutputTextDelta { delta: d.to_string() })
            .collect();
        let text: String = deltas.concat();
        events.push(StreamEvent::Completed {
            response: super::stream::CompletedResponse {
                id: response_id.to_string(),
                model: "fake-model".to_string(),
                output: vec![json!({
                    "type": "message",
                    "role": "assistant",
                    "content": [{"type": "output_text", "text": text}]
                })],
                usage: super::stream::ResponseUsage {
                    input_tokens: 100,
                    output_tokens: 20,
                    cached_tokens: 0,
                },
            },
        });
        events
    }

    /// Events for a single function call completed under `response_id`
    pub fn tool_call_script(response_id: &str, call_id: &str, name: &str, arguments: &str) -> Vec<StreamEvent> {
        let item = json!({
            "type": "function_call",
            "call_id": call_id,
            "name": name,
            "arguments": arguments,
        });
        vec![
            StreamEvent::FunctionCallArgumentsDone {
                item_id: None,
                arguments: arguments.to_string(),
            },
            StreamEvent::OutputItemDone { item: item.clone() },
            StreamEvent::Completed {
                response: super::stream::CompletedResponse {
                    id: response_id.to_string(),
                    model: "fake-model".to_string(),
                    output: vec![item],
                    usage: super::stream::ResponseUsage {
                        input_tokens: 80,
                        output_tokens: 10,
                        cached_tokens: 0,
                    },
                },
            },
        ]
    }

    pub fn requests(&self) -> Vec<ResponsesRequest> {
        self.requests.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

#[async_trait]
impl ResponsesClient for FakeResponsesClient {
    async fn stream(&self, request: ResponsesRequest, cancel: &CancellationToken) -> Result<EventStream> {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        self.requests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(request);
        let events = self
            .scripts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front()
            .ok_or_else(|| Error::Provider("No more fake streams".to_string()))?;
        Ok(stream::iter(events.into_iter().map(Ok)).boxed())
    }
}
