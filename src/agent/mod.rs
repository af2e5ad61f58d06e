//! Agent module: threads and the turn loops behind them.
//!
//! This module contains:
//! - The [`Thread`] contract shared by both protocol variants
//! - [`ChatThread`], the non-streaming chat-completions loop
//! - [`ResponsesThread`], the streaming responses loop
//! - Wire types, the stream assembler and usage accounting
//!
//! Threads are built with [`new_thread`], which resolves the protocol once
//! and picks the matching variant.

mod chat;
mod handler;
mod image;
mod items;
mod message;
mod prompt;
mod responses;
mod stream;
mod thread;
mod usage;

// Transports and their fakes
pub mod llm;

// Re-exports for convenience
pub use chat::ChatThread;
pub use handler::{ConsoleHandler, MessageHandler, StringCollector};
pub use image::{image_url, image_urls, MAX_IMAGE_COUNT, MAX_IMAGE_FILE_SIZE};
pub use items::{
    drop_unanswered_calls, function_call_output, is_streaming_kind, parse_items, replay_input, user_message,
    user_message_with_images, ContentPart, ConversationItem, Direction, ResponseItem, TextContent,
};
pub use llm::{
    Backend, ChatClient, ChatRequest, ChatResponse, EventStream, FakeChatClient, FakeResponsesClient,
    ResponsesClient, ResponsesRequest,
};
pub use message::{cleanup_trailing, truncate_unanswered_tool_group, ChatMessage, FunctionCall, Message, Role, ToolCall};
pub use prompt::{StaticPrompt, SystemPromptBuilder, WorkspacePrompt, COMPACT_PROMPT, SHORT_SUMMARY_PROMPT};
pub use responses::ResponsesThread;
pub use stream::{AssembledResponse, Block, CompletedResponse, FunctionCallRequest, ResponseUsage, StreamAssembler, StreamEvent};
pub use thread::{new_thread, MessageOpt, SubAgentContext, Thread, ThreadCore, ThreadDeps};
pub use usage::{TokenCounts, Usage, UsageTracker};
