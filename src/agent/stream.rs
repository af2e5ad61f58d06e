//! Streaming event decoding and buffering.
//!
//! One exchange on the responses protocol is a sequence of server-sent
//! events. [`StreamAssembler`] consumes them, buffering text and reasoning
//! deltas until the stream reports completion, then hands back a single
//! [`AssembledResponse`].

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::items::{ConversationItem, ResponseItem, TextContent};
use super::usage::TokenCounts;
use crate::error::Error;
use crate::Result;

/// Token usage block of a completed response.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseUsage {
    /// Prompt tokens including cached ones, as reported
    pub input_tokens: i64,
    pub output_tokens: i64,
    pub cached_tokens: i64,
}

impl ResponseUsage {
    /// Split into uncached input, output and cached input.
    pub fn token_counts(&self) -> TokenCounts {
        TokenCounts {
            input: (self.input_tokens - self.cached_tokens).max(0),
            output: self.output_tokens,
            cached_input: self.cached_tokens,
        }
    }

    fn from_value(value: Option<&Value>) -> Self {
        let Some(value) = value else {
            return Self::default();
        };
        let int = |v: Option<&Value>| v.and_then(Value::as_i64).unwrap_or(0);
        Self {
            input_tokens: int(value.get("input_tokens")),
            output_tokens: int(value.get("output_tokens")),
            cached_tokens: int(
                value
                    .get("input_tokens_details")
                    .and_then(|d| d.get("cached_tokens")),
            ),
        }
    }
}

/// Payload of a `response.completed` event.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CompletedResponse {
    pub id: String,
    pub model: String,
    pub output: Vec<Value>,
    pub usage: ResponseUsage,
}

/// Decoded server-sent event.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    Created { response_id: String },
    OutputTextDelta { delta: String },
    ReasoningDelta { delta: String },
    FunctionCallArgumentsDone { item_id: Option<String>, arguments: String },
    OutputItemDone { item: Value },
    Completed { response: CompletedResponse },
    Failed { code: String, message: String },
    Error { code: String, message: String },
    Other { kind: String },
}

fn str_at<'a>(value: &'a Value, path: &[&str]) -> Option<&'a str> {
    let mut current = value;
    for key in path {
        current = current.get(*key)?;
    }
    current.as_str()
}

impl StreamEvent {
    /// Decode an event from its JSON payload; `None` when it has no `type`.
    pub fn from_value(value: Value) -> Option<Self> {
        let kind = value.get("type")?.as_str()?.to_string();
        let delta = || str_at(&value, &["delta"]).unwrap_or("").to_string();

        let event = match kind.as_str() {
            "response.created" => StreamEvent::Created {
                response_id: str_at(&value, &["response", "id"]).unwrap_or("").to_string(),
            },
            "response.output_text.delta" => StreamEvent::OutputTextDelta { delta: delta() },
            "response.reasoning_text.delta" | "response.reasoning_summary_text.delta" => {
                StreamEvent::ReasoningDelta { delta: delta() }
            }
            "response.function_call_arguments.done" => StreamEvent::FunctionCallArgumentsDone {
                item_id: str_at(&value, &["item_id"]).map(str::to_string),
                arguments: str_at(&value, &["arguments"]).unwrap_or("").to_string(),
            },
            "response.output_item.done" => StreamEvent::OutputItemDone {
                item: value.get("item").cloned().unwrap_or(Value::Null),
            },
            "response.completed" | "response.done" => {
                let response = value.get("response").cloned().unwrap_or(Value::Null);
                StreamEvent::Completed {
                    response: CompletedResponse {
                        id: str_at(&response, &["id"]).unwrap_or("").to_string(),
                        model: str_at(&response, &["model"]).unwrap_or("").to_string(),
                        output: response
                            .get("output")
                            .and_then(Value::as_array)
                            .cloned()
                            .unwrap_or_default(),
                        usage: ResponseUsage::from_value(response.get("usage")),
                    },
                }
            }
            "response.failed" => StreamEvent::Failed {
                code: str_at(&value, &["response", "error", "code"])
                    .unwrap_or("unknown")
                    .to_string(),
                message: str_at(&value, &["response", "error", "message"])
                    .unwrap_or("response failed")
                    .to_string(),
            },
            "response.incomplete" => StreamEvent::Failed {
                code: "incomplete".to_string(),
                message: str_at(&value, &["response", "incomplete_details", "reason"])
                    .unwrap_or("response incomplete")
                    .to_string(),
            },
            "error" => StreamEvent::Error {
                code: str_at(&value, &["code"])
                    .or_else(|| str_at(&value, &["error", "code"]))
                    .unwrap_or("unknown")
                    .to_string(),
                message: str_at(&value, &["message"])
                    .or_else(|| str_at(&value, &["error", "message"]))
                    .unwrap_or("stream error")
                    .to_string(),
            },
            _ => StreamEvent::Other { kind: kind.clone() },
        };
        Some(event)
    }
}

/// A buffered block ready for the handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Block {
    Thinking(String),
    Text(String),
}

/// Everything one exchange produced.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AssembledResponse {
    pub response_id: String,
    pub model: String,
    pub text: String,
    pub reasoning: String,
    pub reasoning_first: bool,
    pub output: Vec<Value>,
    pub usage: ResponseUsage,
}

/// Function call requested in a response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionCallRequest {
    pub call_id: String,
    pub name: String,
    pub arguments: String,
}

impl AssembledResponse {
    /// Text and reasoning in order of first occurrence, empty blocks dropped.
    pub fn blocks(&self) -> Vec<Block> {
        let text = (!self.text.is_empty()).then(|| Block::Text(self.text.clone()));
        let thinking = (!self.reasoning.is_empty()).then(|| Block::Thinking(self.reasoning.clone()));
        let ordered = if self.reasoning_first {
            [thinking, text]
        } else {
            [text, thinking]
        };
        ordered.into_iter().flatten().collect()
    }

    pub fn function_calls(&self) -> Vec<FunctionCallRequest> {
        self.output
            .iter()
            .filter_map(|item| serde_json::from_value::<ResponseItem>(item.clone()).ok())
            .filter_map(|item| match item {
                ResponseItem::FunctionCall {
                    call_id,
                    name,
                    arguments,
                } => Some(FunctionCallRequest {
                    call_id,
                    name,
                    arguments,
                }),
                _ => None,
            })
            .collect()
    }

    /// Output items wrapped for the conversation log.
    pub fn output_items(&self) -> Vec<ConversationItem> {
        self.output.iter().cloned().map(ConversationItem::output).collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FirstSeen {
    Text,
    Reasoning,
}

/// Buffers one exchange's events: `Open -> Accumulating* -> Completed | Failed`.
#[derive(Debug, Default)]
pub struct StreamAssembler {
    response_id: Option<String>,
    text: String,
    reasoning: String,
    first: Option<FirstSeen>,
    items_done: Vec<Value>,
    completed: Option<CompletedResponse>,
}

impl StreamAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one event. Returns `Ok(true)` once the response is complete.
    pub fn push(&mut self, event: StreamEvent) -> Result<bool> {
        if self.completed.is_some() {
            return Ok(true);
        }
        match event {
            StreamEvent::Created { response_id } => {
                if !response_id.is_empty() {
                    self.response_id = Some(response_id);
                }
            }
            StreamEvent::OutputTextDelta { delta } => {
                self.first.get_or_insert(FirstSeen::Text);
                self.text.push_str(&delta);
            }
            StreamEvent::ReasoningDelta { delta } => {
                self.first.get_or_insert(FirstSeen::Reasoning);
                self.reasoning.push_str(&delta);
            }
            StreamEvent::OutputItemDone { item } => {
                if !item.is_null() {
                    self.items_done.push(item);
                }
            }
            StreamEvent::Completed { response } => {
                self.completed = Some(response);
                return Ok(true);
            }
            StreamEvent::Failed { code, message } | StreamEvent::Error { code, message } => {
                return Err(Error::ResponseFailed { code, message });
            }
            StreamEvent::FunctionCallArgumentsDone { .. } | StreamEvent::Other { .. } => {}
        }
        Ok(false)
    }

    /// Close the exchange; errors when no completion event arrived.
    pub fn finish(self) -> Result<AssembledResponse> {
        let completed = self.completed.ok_or(Error::StreamIncomplete)?;

        let output = if completed.output.is_empty() {
            self.items_done
        } else {
            completed.output
        };

        let mut text = self.text;
        let mut reasoning = self.reasoning;
        let mut first = self.first;
        if text.is_empty() && reasoning.is_empty() {
            for item in &output {
                match serde_json::from_value::<ResponseItem>(item.clone()) {
                    Ok(ResponseItem::Message { content, .. }) => {
                        first.get_or_insert(FirstSeen::Text);
                        text.push_str(&TextContent::text(&content));
                    }
                    Ok(reasoning_item @ ResponseItem::Reasoning { .. }) => {
                        if let Some(r) = reasoning_item.reasoning_text() {
                            first.get_or_insert(FirstSeen::Reasoning);
                            reasoning.push_str(&r);
                        }
                    }
                    _ => {}
                }
            }
        }

        let response_id = if completed.id.is_empty() {
            self.response_id.unwrap_or_default()
        } else {
            completed.id
        };

        Ok(AssembledResponse {
            response_id,
            model: completed.model,
            text: text.trim_end_matches('\n').to_string(),
            reasoning: reasoning.trim_end_matches('\n').to_string(),
            reasoning_first: first == Some(FirstSeen::Reasoning),
            output,
            usage: completed.usage,
        })
    }
}
