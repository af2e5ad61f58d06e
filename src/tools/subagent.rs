//! Sub-agent tool - delegate a question to a nested thread.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use super::{Tool, ToolContext, ToolMetadata, ToolOutput};
use crate::agent::{MessageOpt, StringCollector};
use crate::error::Error;
use crate::Result;

#[derive(Debug, Deserialize)]
struct SubAgentArgs {
    question: String,
    #[serde(default)]
    use_weak_model: bool,
}

/// Runs a question through a fresh sub-agent thread sharing the parent's usage.
pub struct SubAgentTool;

#[async_trait]
impl Tool for SubAgentTool {
    fn name(&self) -> &str {
        "subagent"
    }

    fn description(&self) -> &str {
        "Delegate a self-contained research or exploration question to a sub-agent"
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "question": {
                    "type": "string",
                    "description": "The question or task for the sub-agent"
                },
                "use_weak_model": {
                    "type": "boolean",
                    "description": "Use the cheaper model for simple lookups"
                }
            },
            "required": ["question"]
        })
    }

    async fn execute(&self, ctx: &ToolContext, params: Value) -> Result<ToolOutput> {
        let args: SubAgentArgs = serde_json::from_value(params)
            .map_err(|e| Error::Tool(format!("Invalid arguments: {}", e)))?;

        let subagent = ctx
            .subagent
            .as_ref()
            .ok_or_else(|| Error::Tool("Sub-agents cannot spawn further sub-agents".to_string()))?;

        let mut thread = subagent.spawn()?;
        let collector = StringCollector::silent();
        let opt = MessageOpt {
            use_weak_model: args.use_weak_model,
            no_save_conversation: true,
            ..MessageOpt::default()
        };

        debug!(question = %args.question, "Running sub-agent");
        let response = thread
            .send_message(&args.question, &collector, opt, &ctx.abort)
            .await?;

        Ok(ToolOutput::success(
            self.name(),
            response.clone(),
            Some(ToolMetadata::SubAgent {
                question: args.question,
                response,
            }),
        ))
    }
}
