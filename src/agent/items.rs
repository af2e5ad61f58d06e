//! Conversation items for the streaming responses protocol.
//!
//! The wire request for this protocol carries no cumulative history, so the
//! item log kept here is the only complete record of a conversation. Each
//! entry wraps the provider's payload verbatim; [`ConversationItem::decode`]
//! turns it into a typed [`ResponseItem`] only when a consumer needs to look
//! inside.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::message::Role;
use crate::error::Error;
use crate::Result;

/// Whether an item was sent to the provider or produced by it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Input,
    Output,
}

/// One logged request or response item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationItem {
    #[serde(rename = "type")]
    pub direction: Direction,
    pub item: Value,
    #[serde(default)]
    pub timestamp: DateTime<Utc>,
}

impl ConversationItem {
    pub fn input(item: Value) -> Self {
        Self {
            direction: Direction::Input,
            item,
            timestamp: Utc::now(),
        }
    }

    pub fn output(item: Value) -> Self {
        Self {
            direction: Direction::Output,
            item,
            timestamp: Utc::now(),
        }
    }

    /// The payload's own `type` field.
    pub fn kind(&self) -> Option<&str> {
        self.item.get("type").and_then(Value::as_str)
    }

    pub fn decode(&self) -> Result<ResponseItem> {
        Ok(serde_json::from_value(self.item.clone())?)
    }
}

/// A text field that may be a plain string or a list of typed parts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TextContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

impl Default for TextContent {
    fn default() -> Self {
        TextContent::Text(String::new())
    }
}

impl TextContent {
    pub fn text(&self) -> String {
        match self {
            TextContent::Text(s) => s.clone(),
            TextContent::Parts(parts) => parts
                .iter()
                .filter_map(|p| p.text.as_deref())
                .filter(|t| !t.is_empty())
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentPart {
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

/// Typed view of a responses-protocol item, keyed by its `type` field.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResponseItem {
    Message {
        #[serde(default = "default_role")]
        role: Role,
        #[serde(default)]
        content: TextContent,
    },
    FunctionCall {
        call_id: String,
        name: String,
        #[serde(default)]
        arguments: String,
    },
    FunctionCallOutput {
        call_id: String,
        #[serde(default)]
        output: String,
    },
    Reasoning {
        #[serde(default)]
        summary: Vec<ContentPart>,
        #[serde(default)]
        content: Option<TextContent>,
    },
    #[serde(other)]
    Other,
}

fn default_role() -> Role {
    Role::Assistant
}

impl ResponseItem {
    /// Reasoning text, preferring full content over the summary.
    pub fn reasoning_text(&self) -> Option<String> {
        let ResponseItem::Reasoning { summary, content } = self else {
            return None;
        };
        if let Some(content) = content {
            let text = content.text();
            if !text.is_empty() {
                return Some(text);
            }
        }
        let text = TextContent::Parts(summary.clone()).text();
        (!text.is_empty()).then_some(text)
    }
}

/// Wire payload for a user message.
pub fn user_message(text: &str) -> Value {
    json!({
        "type": "message",
        "role": "user",
        "content": [{"type": "input_text", "text": text}],
    })
}

/// Wire payload for a user message with images ahead of the text.
pub fn user_message_with_images(text: &str, image_urls: &[String]) -> Value {
    if image_urls.is_empty() {
        return user_message(text);
    }
    let mut content: Vec<Value> = image_urls
        .iter()
        .map(|url| json!({"type": "input_image", "image_url": url, "detail": "auto"}))
        .collect();
    content.push(json!({"type": "input_text", "text": text}));
    json!({
        "type": "message",
        "role": "user",
        "content": content,
    })
}

/// Wire payload for instructions sent as a leading message.
pub fn developer_message(text: &str) -> Value {
    json!({
        "type": "message",
        "role": "developer",
        "content": [{"type": "input_text", "text": text}],
    })
}

/// Wire payload for a tool's answer to a function call.
pub fn function_call_output(call_id: &str, output: &str) -> Value {
    json!({
        "type": "function_call_output",
        "call_id": call_id,
        "output": output,
    })
}

const STREAMING_KINDS: [&str; 6] = [
    "message",
    "reasoning",
    "function_call",
    "function_call_output",
    "compaction",
    "compaction_summary",
];

/// Whether `kind` names an item type of the streaming protocol.
pub fn is_streaming_kind(kind: &str) -> bool {
    STREAMING_KINDS.contains(&kind)
}

/// Parse a stored item log, accepting both wrapped and legacy flat items.
///
/// Legacy records stored the payloads directly; their direction is inferred
/// from the payload: tool outputs and user or instruction messages were sent,
/// everything else was received.
pub fn parse_items(raw: &Value) -> Result<Vec<ConversationItem>> {
    let entries = match raw {
        Value::Null => return Ok(Vec::new()),
        Value::Array(entries) => entries,
        other => {
            return Err(Error::Other(format!(
                "conversation items must be an array, got {}",
                type_name(other)
            )))
        }
    };

    entries
        .iter()
        .map(|entry| {
            let kind = entry.get("type").and_then(Value::as_str).unwrap_or("");
            if (kind == "input" || kind == "output") && entry.get("item").is_some() {
                return Ok(serde_json::from_value::<ConversationItem>(entry.clone())?);
            }
            if is_streaming_kind(kind) {
                let direction = infer_direction(entry);
                return Ok(ConversationItem {
                    direction,
                    item: entry.clone(),
                    timestamp: DateTime::<Utc>::default(),
                });
            }
            Err(Error::Other(format!("unrecognized conversation item type '{}'", kind)))
        })
        .collect()
}

/// Remove function calls that never received an output.
///
/// An interrupted turn can leave calls in the log whose outputs were never
/// produced; replaying them would be rejected by the provider.
pub fn drop_unanswered_calls(items: &mut Vec<ConversationItem>) -> usize {
    let answered: HashSet<String> = items
        .iter()
        .filter(|i| i.kind() == Some("function_call_output"))
        .filter_map(|i| i.item.get("call_id").and_then(Value::as_str))
        .map(str::to_string)
        .collect();

    let before = items.len();
    items.retain(|i| {
        if i.kind() != Some("function_call") {
            return true;
        }
        i.item
            .get("call_id")
            .and_then(Value::as_str)
            .is_some_and(|id| answered.contains(id))
    });
    before - items.len()
}

/// Request input that replays the whole log without server-side state.
///
/// Reasoning is display-only and skipped; server-assigned ids are stripped
/// so the items stand on their own.
pub fn replay_input(items: &[ConversationItem]) -> Vec<Value> {
    items
        .iter()
        .filter(|i| i.kind() != Some("reasoning"))
        .map(|i| {
            let mut item = i.item.clone();
            if let Some(obj) = item.as_object_mut() {
                obj.remove("id");
                obj.remove("status");
            }
            item
        })
        .collect()
}

fn infer_direction(item: &Value) -> Direction {
    match item.get("type").and_then(Value::as_str) {
        Some("function_call_output") => Direction::Input,
        Some("message") => match item.get("role").and_then(Value::as_str) {
            Some("user") | Some("system") | Some("developer") => Direction::Input,
            _ => Direction::Output,
        },
        _ => Direction::Output,
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
