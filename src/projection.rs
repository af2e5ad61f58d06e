//! Read-only views over stored conversations.
//!
//! A stored log is either a chat-completions message list or a responses item
//! log. Both project into a flat role/content history and into a sequence of
//! typed UI events for replaying a conversation.

use std::collections::HashMap;

use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use crate::agent::{parse_items, ChatMessage, ConversationItem, Message, ResponseItem, Role, TextContent};
use crate::persistence::ConversationRecord;
use crate::platform::ApiMode;
use crate::tools::{StructuredToolResult, ToolResultRenderer};
use crate::Result;

/// Kind of a UI event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum EventKind {
    Text,
    ToolUse,
    ToolResult,
    Thinking,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Text => "text",
            EventKind::ToolUse => "tool-use",
            EventKind::ToolResult => "tool-result",
            EventKind::Thinking => "thinking",
        }
    }
}

/// One renderable event of a past conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamableMessage {
    pub kind: EventKind,
    pub role: Role,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub content: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub tool_name: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub tool_call_id: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub input: String,
}

impl StreamableMessage {
    fn new(kind: EventKind, role: Role, content: impl Into<String>) -> Self {
        Self {
            kind,
            role,
            content: content.into(),
            tool_name: String::new(),
            tool_call_id: String::new(),
            input: String::new(),
        }
    }

    fn tool_use(name: &str, call_id: &str, input: &str) -> Self {
        Self {
            tool_name: name.to_string(),
            tool_call_id: call_id.to_string(),
            input: input.to_string(),
            ..Self::new(EventKind::ToolUse, Role::Assistant, "")
        }
    }

    fn tool_result(call_id: &str, raw_output: &str, tool_results: &HashMap<String, StructuredToolResult>) -> Self {
        let (tool_name, content) = match tool_results.get(call_id) {
            Some(result) => (
                result.tool_name.clone(),
                serde_json::to_string(result).unwrap_or_else(|_| raw_output.to_string()),
            ),
            None => (String::new(), raw_output.to_string()),
        };
        Self {
            tool_name,
            tool_call_id: call_id.to_string(),
            ..Self::new(EventKind::ToolResult, Role::Assistant, content)
        }
    }
}

enum Log {
    Chat(Vec<ChatMessage>),
    Items(Vec<ConversationItem>),
}

impl Log {
    fn parse(raw: &Value, mode: ApiMode) -> Result<Self> {
        match mode {
            ApiMode::ChatCompletions => {
                let messages = match raw {
                    Value::Null => Vec::new(),
                    other => serde_json::from_value(other.clone())?,
                };
                Ok(Log::Chat(messages))
            }
            ApiMode::Responses => Ok(Log::Items(parse_items(raw)?)),
        }
    }
}

fn tool_result_text(
    call_id: Option<&str>,
    raw_output: &str,
    tool_results: &HashMap<String, StructuredToolResult>,
    renderer: &dyn ToolResultRenderer,
) -> String {
    call_id
        .and_then(|id| tool_results.get(id))
        .map(|result| renderer.render(result))
        .unwrap_or_else(|| raw_output.to_string())
}

/// Flat role/content history of a stored log, without instruction messages.
pub fn extract_messages(
    raw: &Value,
    mode: ApiMode,
    tool_results: &HashMap<String, StructuredToolResult>,
    renderer: &dyn ToolResultRenderer,
) -> Result<Vec<Message>> {
    let mut result = Vec::new();

    match Log::parse(raw, mode)? {
        Log::Chat(messages) => {
            for message in messages {
                match message.role {
                    Role::System | Role::Developer => continue,
                    Role::Tool => {
                        let text = tool_result_text(
                            message.tool_call_id.as_deref(),
                            &message.content,
                            tool_results,
                            renderer,
                        );
                        result.push(Message::new(Role::Assistant, format!("🔄 Tool result:\n{}", text)));
                    }
                    role => {
                        if !message.content.is_empty() {
                            result.push(Message::new(role, message.content.clone()));
                        }
                        for call in &message.tool_calls {
                            let encoded = serde_json::to_string(call)?;
                            result.push(Message::new(Role::Assistant, format!("🔧 Using tool: {}", encoded)));
                        }
                    }
                }
            }
        }
        Log::Items(items) => {
            for entry in items {
                let Ok(item) = entry.decode() else {
                    debug!(kind = ?entry.kind(), "Skipping undecodable item");
                    continue;
                };
                match item {
                    ResponseItem::Reasoning { .. } => {
                        let thinking = item.reasoning_text().unwrap_or_default();
                        result.push(Message::new(Role::Assistant, format!("💭 Thinking:\n{}", thinking)));
                    }
                    ResponseItem::Message { role, content } => {
                        let text = content.text();
                        if !role.is_instruction() && !text.is_empty() {
                            result.push(Message::new(role, text));
                        }
                    }
                    ResponseItem::FunctionCall { name, arguments, .. } => {
                        result.push(Message::new(
                            Role::Assistant,
                            format!("🔧 Using tool: {}\n  Arguments: {}", name, arguments),
                        ));
                    }
                    ResponseItem::FunctionCallOutput { call_id, output } => {
                        let text = tool_result_text(Some(&call_id), &output, tool_results, renderer);
                        result.push(Message::new(Role::Assistant, format!("🔄 Tool result:\n{}", text)));
                    }
                    ResponseItem::Other => {}
                }
            }
        }
    }

    Ok(result)
}

fn chat_events(message: ChatMessage, tool_results: &HashMap<String, StructuredToolResult>) -> Vec<StreamableMessage> {
    let mut events = Vec::new();
    match message.role {
        Role::System | Role::Developer => {}
        Role::Tool => {
            let call_id = message.tool_call_id.unwrap_or_default();
            events.push(StreamableMessage::tool_result(&call_id, &message.content, tool_results));
        }
        role => {
            if let Some(thinking) = message.reasoning_content.filter(|t| !t.is_empty()) {
                events.push(StreamableMessage::new(EventKind::Thinking, Role::Assistant, thinking));
            }
            if !message.content.is_empty() {
                events.push(StreamableMessage::new(EventKind::Text, role, message.content));
            }
            for call in &message.tool_calls {
                events.push(StreamableMessage::tool_use(
                    &call.function.name,
                    &call.id,
                    &call.function.arguments,
                ));
            }
        }
    }
    events
}

fn item_events(entry: ConversationItem, tool_results: &HashMap<String, StructuredToolResult>) -> Vec<StreamableMessage> {
    let Ok(item) = entry.decode() else {
        return Vec::new();
    };
    match item {
        ResponseItem::Reasoning { .. } => {
            let thinking = item.reasoning_text().unwrap_or_default();
            vec![StreamableMessage::new(EventKind::Thinking, Role::Assistant, thinking)]
        }
        ResponseItem::Message { role, content } => {
            let text = TextContent::text(&content);
            if role.is_instruction() || text.is_empty() {
                return Vec::new();
            }
            vec![StreamableMessage::new(EventKind::Text, role, text)]
        }
        ResponseItem::FunctionCall {
            call_id,
            name,
            arguments,
        } => vec![StreamableMessage::tool_use(&name, &call_id, &arguments)],
        ResponseItem::FunctionCallOutput { call_id, output } => {
            vec![StreamableMessage::tool_result(&call_id, &output, tool_results)]
        }
        ResponseItem::Other => Vec::new(),
    }
}

/// Chronological UI events of a stored log.
///
/// The log is validated up front; events are produced as the iterator is
/// advanced.
pub fn stream_messages<'a>(
    raw: &Value,
    mode: ApiMode,
    tool_results: &'a HashMap<String, StructuredToolResult>,
) -> Result<Box<dyn Iterator<Item = StreamableMessage> + 'a>> {
    let iter: Box<dyn Iterator<Item = StreamableMessage> + 'a> = match Log::parse(raw, mode)? {
        Log::Chat(messages) => Box::new(
            messages
                .into_iter()
                .flat_map(move |message| chat_events(message, tool_results)),
        ),
        Log::Items(items) => Box::new(
            items
                .into_iter()
                .flat_map(move |item| item_events(item, tool_results)),
        ),
    };
    Ok(iter)
}

/// [`extract_messages`] over a stored record, detecting its protocol.
pub fn record_messages(record: &ConversationRecord, renderer: &dyn ToolResultRenderer) -> Result<Vec<Message>> {
    record.check_provider()?;
    extract_messages(&record.raw_messages, record.api_mode(), &record.tool_results, renderer)
}

/// [`stream_messages`] over a stored record, detecting its protocol.
pub fn record_events(record: &ConversationRecord) -> Result<Box<dyn Iterator<Item = StreamableMessage> + '_>> {
    record.check_provider()?;
    stream_messages(&record.raw_messages, record.api_mode(), &record.tool_results)
}
