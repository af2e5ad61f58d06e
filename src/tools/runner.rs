//! Tool runner - manages and executes tools

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use super::filesystem::{ListDirTool, ReadFileTool, WriteFileTool};
use super::shell::BashTool;
use super::subagent::SubAgentTool;
use super::{Tool, ToolContext, ToolExecutor, ToolOutput};

/// Tool definition for LLM
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

/// Tool runner manages registered tools and executes them
pub struct ToolRunner {
    tools: HashMap<String, Box<dyn Tool>>,
}

impl ToolRunner {
    /// Create an empty tool runner
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
        }
    }

    /// Create a tool runner with default tools
    pub fn new_with_defaults() -> Self {
        let mut runner = Self::new();

        runner.register(ReadFileTool);
        runner.register(WriteFileTool);
        runner.register(ListDirTool);
        runner.register(BashTool);
        runner.register(SubAgentTool);

        runner
    }

    /// Register a tool
    pub fn register<T: Tool + 'static>(&mut self, tool: T) {
        self.tools.insert(tool.name().to_string(), Box::new(tool));
    }

    /// Check if a tool exists
    pub fn has(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// List registered tool names
    pub fn tool_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.tools.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }
}

impl Default for ToolRunner {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ToolExecutor for ToolRunner {
    /// Definitions sorted by name so requests are stable.
    fn definitions(&self) -> Vec<ToolDefinition> {
        let mut defs: Vec<ToolDefinition> = self.tools.values().map(|t| t.to_definition()).collect();
        defs.sort_by(|a, b| a.name.cmp(&b.name));
        defs
    }

    async fn execute(&self, ctx: &ToolContext, name: &str, arguments: &str) -> ToolOutput {
        let Some(tool) = self.tools.get(name) else {
            return ToolOutput::error(name, format!("Unknown tool: {}", name));
        };

        let params: Value = if arguments.trim().is_empty() {
            Value::Object(Default::default())
        } else {
            match serde_json::from_str(arguments) {
                Ok(v) => v,
                Err(e) => return ToolOutput::error(name, format!("Invalid arguments: {}", e)),
            }
        };

        debug!(tool = name, "Executing tool");
        match tool.execute(ctx, params).await {
            Ok(output) => {
                debug!(tool = name, chars = output.assistant_facing.len(), "Tool succeeded");
                output
            }
            Err(e) => {
                debug!(tool = name, error = %e, "Tool failed");
                ToolOutput::error(name, e.to_string())
            }
        }
    }
}
