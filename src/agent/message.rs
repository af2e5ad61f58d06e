//! Message types for the chat-completions protocol

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Message role in a conversation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    Developer,
    User,
    Assistant,
    Tool,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::Developer => "developer",
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Tool => "tool",
        }
    }

    /// System and developer messages are instructions, not conversation.
    pub fn is_instruction(&self) -> bool {
        matches!(self, Role::System | Role::Developer)
    }
}

/// A function call requested by the assistant
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    #[serde(rename = "type", default = "default_call_type")]
    pub kind: String,
    pub function: FunctionCall,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionCall {
    pub name: String,
    /// JSON-encoded arguments, kept verbatim
    #[serde(default)]
    pub arguments: String,
}

fn default_call_type() -> String {
    "function".to_string()
}

impl ToolCall {
    pub fn new(id: impl Into<String>, name: impl Into<String>, arguments: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: default_call_type(),
            function: FunctionCall {
                name: name.into(),
                arguments: arguments.into(),
            },
        }
    }
}

/// One entry of the chat-completions message log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "WireMessage", into = "WireMessage")]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
    /// Image URLs sent ahead of the text
    pub images: Vec<String>,
    /// Tool calls made by assistant
    pub tool_calls: Vec<ToolCall>,
    /// Tool call ID (for tool responses)
    pub tool_call_id: Option<String>,
    pub reasoning_content: Option<String>,
}

/// Wire layout: `content` is a string, or a part list when images are attached.
#[derive(Serialize, Deserialize)]
struct WireMessage {
    role: Role,
    #[serde(default)]
    content: Option<Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    tool_calls: Vec<ToolCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    reasoning_content: Option<String>,
}

impl From<WireMessage> for ChatMessage {
    fn from(wire: WireMessage) -> Self {
        let mut images = Vec::new();
        let content = match wire.content {
            None | Some(Value::Null) => String::new(),
            Some(Value::String(s)) => s,
            Some(Value::Array(parts)) => {
                images = parts
                    .iter()
                    .filter_map(|p| p.pointer("/image_url/url").and_then(Value::as_str))
                    .map(str::to_string)
                    .collect();
                parts
                    .iter()
                    .filter_map(|p| p.get("text").and_then(Value::as_str))
                    .collect::<Vec<_>>()
                    .join("\n")
            }
            Some(other) => other.to_string(),
        };
        Self {
            role: wire.role,
            content,
            images,
            tool_calls: wire.tool_calls,
            tool_call_id: wire.tool_call_id,
            reasoning_content: wire.reasoning_content,
        }
    }
}

impl From<ChatMessage> for WireMessage {
    fn from(message: ChatMessage) -> Self {
        let content = if message.images.is_empty() {
            Value::String(message.content)
        } else {
            let mut parts: Vec<Value> = message
                .images
                .iter()
                .map(|url| json!({"type": "image_url", "image_url": {"url": url, "detail": "auto"}}))
                .collect();
            parts.push(json!({"type": "text", "text": message.content}));
            Value::Array(parts)
        };
        Self {
            role: message.role,
            content: Some(content),
            tool_calls: message.tool_calls,
            tool_call_id: message.tool_call_id,
            reasoning_content: message.reasoning_content,
        }
    }
}

impl ChatMessage {
    fn plain(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            images: Vec::new(),
            tool_calls: Vec::new(),
            tool_call_id: None,
            reasoning_content: None,
        }
    }

    /// Create a system message
    pub fn system(content: impl Into<String>) -> Self {
        Self::plain(Role::System, content)
    }

    /// Create a user message
    pub fn user(content: impl Into<String>) -> Self {
        Self::plain(Role::User, content)
    }

    /// Create a user message carrying images
    pub fn user_with_images(content: impl Into<String>, images: Vec<String>) -> Self {
        Self {
            images,
            ..Self::plain(Role::User, content)
        }
    }

    /// Create an assistant message
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::plain(Role::Assistant, content)
    }

    /// Create an assistant message with tool calls
    pub fn assistant_with_tools(content: impl Into<String>, tool_calls: Vec<ToolCall>) -> Self {
        Self {
            tool_calls,
            ..Self::plain(Role::Assistant, content)
        }
    }

    /// Create a tool result message
    pub fn tool_result(call_id: impl Into<String>, result: impl Into<String>) -> Self {
        Self {
            tool_call_id: Some(call_id.into()),
            ..Self::plain(Role::Tool, result)
        }
    }

    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }

    /// No text, no tool calls, and not a tool result.
    pub fn is_empty(&self) -> bool {
        self.role != Role::Tool && self.content.is_empty() && self.tool_calls.is_empty()
    }
}

/// Flat role/content view of a conversation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

/// Remove incomplete messages left at the end of a log by an interrupted turn.
///
/// Pops, repeatedly, any trailing empty message and any trailing assistant
/// message whose tool calls were never answered.
pub fn cleanup_trailing(messages: &mut Vec<ChatMessage>) -> usize {
    let before = messages.len();
    while let Some(last) = messages.last() {
        if last.is_empty() || (last.role == Role::Assistant && last.has_tool_calls()) {
            messages.pop();
        } else {
            break;
        }
    }
    before - messages.len()
}

/// Drop a trailing assistant tool group whose calls are not all answered.
///
/// Returns true when the log was truncated.
pub fn truncate_unanswered_tool_group(messages: &mut Vec<ChatMessage>) -> bool {
    let Some(idx) = messages
        .iter()
        .rposition(|m| m.role == Role::Assistant && m.has_tool_calls())
    else {
        return false;
    };

    let answered = messages[idx + 1..]
        .iter()
        .filter(|m| m.role == Role::Tool)
        .filter_map(|m| m.tool_call_id.as_deref())
        .collect::<Vec<_>>();
    let complete = messages[idx]
        .tool_calls
        .iter()
        .all(|call| answered.contains(&call.id.as_str()));

    if complete {
        return false;
    }
    messages.truncate(idx);
    true
}
