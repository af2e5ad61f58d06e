//! duet - conversational engine of a coding agent
//!
//! This library drives multi-turn conversations with tool calls against
//! OpenAI-compatible endpoints over either the chat-completions or the
//! streaming responses protocol, and persists them in a protocol-aware form.

pub mod agent;
pub mod config;
pub mod error;
pub mod http;
pub mod persistence;
pub mod platform;
pub mod pricing;
pub mod projection;
pub mod state;
pub mod tools;
pub mod ui;

pub use error::{Error, Result};
