//! Event handlers driven by the turn loops.
//!
//! Calls arrive in chronological order and return nothing; a handler that
//! needs state keeps it behind its own lock.

use std::sync::Mutex;

use colored::Colorize;

use crate::tools::{PlainRenderer, ToolOutput, ToolResultRenderer};
use crate::ui;

/// Receives what a turn produces.
pub trait MessageHandler: Send + Sync {
    fn handle_text(&self, text: &str);
    fn handle_tool_use(&self, call_id: &str, tool_name: &str, input: &str);
    fn handle_tool_result(&self, call_id: &str, tool_name: &str, result: &ToolOutput);
    fn handle_thinking(&self, thinking: &str);
    fn handle_done(&self);
}

/// Collects assistant text; optionally echoes everything to stdout.
#[derive(Debug, Default)]
pub struct StringCollector {
    text: Mutex<String>,
    silent: bool,
}

impl StringCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn silent() -> Self {
        Self {
            text: Mutex::new(String::new()),
            silent: true,
        }
    }

    pub fn collected(&self) -> String {
        self.text.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

impl MessageHandler for StringCollector {
    fn handle_text(&self, text: &str) {
        let mut collected = self.text.lock().unwrap_or_else(|e| e.into_inner());
        collected.push_str(text);
        collected.push('\n');
        if !self.silent {
            println!("{}", text);
        }
    }

    fn handle_tool_use(&self, _call_id: &str, tool_name: &str, input: &str) {
        if !self.silent {
            println!("🔧 Using tool: {}: {}", tool_name, input);
        }
    }

    fn handle_tool_result(&self, _call_id: &str, _tool_name: &str, result: &ToolOutput) {
        if !self.silent {
            println!("🔄 Tool result: {}", result.assistant_facing);
        }
    }

    fn handle_thinking(&self, thinking: &str) {
        if !self.silent {
            println!("💭 Thinking: {}", thinking);
        }
    }

    fn handle_done(&self) {}
}

/// Colored terminal output for interactive sessions.
pub struct ConsoleHandler {
    renderer: Box<dyn ToolResultRenderer>,
}

impl ConsoleHandler {
    pub fn new() -> Self {
        Self {
            renderer: Box::new(PlainRenderer),
        }
    }
}

impl Default for ConsoleHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageHandler for ConsoleHandler {
    fn handle_text(&self, text: &str) {
        println!("\n{}", text);
    }

    fn handle_tool_use(&self, _call_id: &str, tool_name: &str, input: &str) {
        ui::print_step(&format!("{} {}", tool_name.cyan().bold(), input.dimmed()));
    }

    fn handle_tool_result(&self, _call_id: &str, _tool_name: &str, result: &ToolOutput) {
        let rendered = self.renderer.render(&result.structured);
        if result.structured.success {
            ui::print_success(&rendered);
        } else {
            ui::print_error(&rendered);
        }
    }

    fn handle_thinking(&self, thinking: &str) {
        ui::print_thinking(thinking);
    }

    fn handle_done(&self) {
        ui::print_rule();
    }
}
