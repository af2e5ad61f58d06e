//! Tools module - agent capabilities
//!
//! Tools are external actions the model can request: reading files, running
//! commands, delegating to a sub-agent. The turn loops only see the
//! [`ToolExecutor`] contract; [`ToolRunner`] is the registry-backed default.

mod filesystem;
mod render;
mod runner;
mod shell;
mod subagent;

pub use filesystem::{ListDirTool, ReadFileTool, WriteFileTool};
pub use render::{PlainRenderer, ToolResultRenderer};
pub use runner::{ToolDefinition, ToolRunner};
pub use shell::BashTool;
pub use subagent::SubAgentTool;

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::agent::SubAgentContext;
use crate::state::ToolState;
use crate::Result;

/// Context handed to every tool invocation.
#[derive(Clone)]
pub struct ToolContext {
    /// Per-thread tool state
    pub state: ToolState,
    /// Present when the calling thread may spawn sub-agents
    pub subagent: Option<SubAgentContext>,
    /// Cancellation token for the running turn
    pub abort: CancellationToken,
    /// Directory relative paths resolve against
    pub workspace: PathBuf,
}

impl ToolContext {
    pub fn new(workspace: impl Into<PathBuf>) -> Self {
        Self {
            state: ToolState::new(),
            subagent: None,
            abort: CancellationToken::new(),
            workspace: workspace.into(),
        }
    }

    /// Resolve a tool-supplied path against the workspace.
    pub fn resolve_path(&self, path: &str) -> PathBuf {
        let candidate = Path::new(path);
        if candidate.is_absolute() {
            candidate.to_path_buf()
        } else {
            self.workspace.join(candidate)
        }
    }
}

/// Renderer-friendly payload attached to a structured result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ToolMetadata {
    FileRead {
        path: String,
        lines: usize,
    },
    FileWrite {
        path: String,
        bytes: usize,
    },
    DirectoryList {
        path: String,
        entries: Vec<String>,
    },
    Command {
        command: String,
        exit_code: Option<i32>,
        output: String,
    },
    BackgroundCommand {
        command: String,
        pid: u32,
        log_path: String,
    },
    SubAgent {
        question: String,
        response: String,
    },
}

/// Typed record of one tool execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StructuredToolResult {
    pub tool_name: String,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<ToolMetadata>,
}

/// Result of executing a tool: compact text for the model plus the structured form.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolOutput {
    pub assistant_facing: String,
    pub structured: StructuredToolResult,
}

impl ToolOutput {
    pub fn success(tool_name: &str, text: impl Into<String>, metadata: Option<ToolMetadata>) -> Self {
        Self {
            assistant_facing: text.into(),
            structured: StructuredToolResult {
                tool_name: tool_name.to_string(),
                success: true,
                error: None,
                timestamp: Utc::now(),
                metadata,
            },
        }
    }

    pub fn error(tool_name: &str, message: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            assistant_facing: format!("Error: {}", message),
            structured: StructuredToolResult {
                tool_name: tool_name.to_string(),
                success: false,
                error: Some(message),
                timestamp: Utc::now(),
                metadata: None,
            },
        }
    }
}

/// Tool trait - interface for all agent tools
#[async_trait]
pub trait Tool: Send + Sync {
    /// Tool name used in function calls
    fn name(&self) -> &str;

    /// Description of what the tool does
    fn description(&self) -> &str;

    /// JSON Schema for parameters
    fn parameters(&self) -> Value;

    /// Execute the tool with given parameters
    async fn execute(&self, ctx: &ToolContext, params: Value) -> Result<ToolOutput>;

    /// Convert to tool definition for LLM
    fn to_definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: self.parameters(),
        }
    }
}

/// What the turn loops call to run a tool.
///
/// Execution never fails from the loop's point of view: unknown tools,
/// malformed arguments and tool errors all come back as an error-flavoured
/// [`ToolOutput`] the model can read.
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    fn definitions(&self) -> Vec<ToolDefinition>;

    async fn execute(&self, ctx: &ToolContext, name: &str, arguments: &str) -> ToolOutput;
}

/// Dummy tool for testing
pub struct DummyTool {
    pub name: String,
    pub result: String,
}

#[async_trait]
impl Tool for DummyTool {
    fn name(&self) -> &str {
        &self.name
    }
    fn description(&self) -> &str {
        "Dummy tool for testing"
    }
    fn parameters(&self) -> Value {
        serde_json::json!({"type": "object"})
    }

    async fn execute(&self, _ctx: &ToolContext, _params: Value) -> Result<ToolOutput> {
        Ok(ToolOutput::success(&self.name, self.result.clone(), None))
    }
}
