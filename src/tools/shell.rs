//! Shell tool - execute commands, optionally in the background

use std::process::Stdio;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Value};
use tokio::process::Command;
use tracing::info;

use super::{Tool, ToolContext, ToolMetadata, ToolOutput};
use crate::error::Error;
use crate::state::BackgroundProcess;
use crate::Result;

/// Execute shell commands in the workspace
pub struct BashTool;

impl BashTool {
    async fn run_background(&self, ctx: &ToolContext, command: &str) -> Result<ToolOutput> {
        let log_path = std::env::temp_dir().join(format!("duet-bg-{}.log", uuid::Uuid::new_v4()));
        let log = std::fs::File::create(&log_path)?;
        let err_log = log.try_clone()?;

        let child = Command::new("sh")
            .arg("-c")
            .arg(command)
            .current_dir(&ctx.workspace)
            .stdin(Stdio::null())
            .stdout(Stdio::from(log))
            .stderr(Stdio::from(err_log))
            .spawn()
            .map_err(|e| Error::Tool(format!("Failed to start command: {}", e)))?;

        let pid = child
            .id()
            .ok_or_else(|| Error::Tool("Background command exited immediately".to_string()))?;

        info!(pid, command, "Started background process");
        ctx.state.add_background_process(BackgroundProcess {
            pid,
            command: command.to_string(),
            log_path: log_path.clone(),
            start_time: Utc::now(),
        });

        let log_path = log_path.display().to_string();
        Ok(ToolOutput::success(
            self.name(),
            format!("Started background process {} (logs: {})", pid, log_path),
            Some(ToolMetadata::BackgroundCommand {
                command: command.to_string(),
                pid,
                log_path,
            }),
        ))
    }
}

#[async_trait]
impl Tool for BashTool {
    fn name(&self) -> &str {
        "bash"
    }
    fn description(&self) -> &str {
        "Execute a shell command in the workspace"
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "command": {
                    "type": "string",
                    "description": "Shell command to execute"
                },
                "background": {
                    "type": "boolean",
                    "description": "Run detached and return immediately with the process id"
                }
            },
            "required": ["command"]
        })
    }

    async fn execute(&self, ctx: &ToolContext, params: Value) -> Result<ToolOutput> {
        let command = params
            .get("command")
            .and_then(|v| v.as_str())
            .ok_or_else(|| Error::Tool("Missing 'command' parameter".to_string()))?;

        if params.get("background").and_then(|v| v.as_bool()).unwrap_or(false) {
            return self.run_background(ctx, command).await;
        }

        let run = Command::new("sh")
            .arg("-c")
            .arg(command)
            .current_dir(&ctx.workspace)
            .kill_on_drop(true)
            .output();

        let output = tokio::select! {
            result = run => result.map_err(|e| Error::Tool(format!("Failed to execute command: {}", e)))?,
            _ = ctx.abort.cancelled() => return Err(Error::Cancelled),
        };

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        let combined = if stderr.is_empty() {
            stdout.to_string()
        } else {
            format!("{}\n\n[stderr]\n{}", stdout, stderr)
        };

        if !output.status.success() {
            return Err(Error::Tool(format!(
                "Command failed with exit code {}\n{}",
                output.status.code().unwrap_or(-1),
                combined
            )));
        }

        Ok(ToolOutput::success(
            self.name(),
            combined.clone(),
            Some(ToolMetadata::Command {
                command: command.to_string(),
                exit_code: output.status.code(),
                output: combined,
            }),
        ))
    }
}
