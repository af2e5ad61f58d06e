//! Rendering structured tool results for humans.

use super::{StructuredToolResult, ToolMetadata};

/// Turns a structured result into display text.
pub trait ToolResultRenderer: Send + Sync {
    fn render(&self, result: &StructuredToolResult) -> String;
}

/// Plain-text renderer used by the CLI and conversation replay.
#[derive(Debug, Default, Clone, Copy)]
pub struct PlainRenderer;

impl ToolResultRenderer for PlainRenderer {
    fn render(&self, result: &StructuredToolResult) -> String {
        if !result.success {
            return format!(
                "{} failed: {}",
                result.tool_name,
                result.error.as_deref().unwrap_or("unknown error")
            );
        }

        match &result.metadata {
            Some(ToolMetadata::FileRead { path, lines }) => format!("Read {} ({} lines)", path, lines),
            Some(ToolMetadata::FileWrite { path, bytes }) => format!("Wrote {} bytes to {}", bytes, path),
            Some(ToolMetadata::DirectoryList { path, entries }) => {
                format!("{} ({} entries)\n{}", path, entries.len(), entries.join("\n"))
            }
            Some(ToolMetadata::Command {
                command,
                exit_code,
                output,
            }) => {
                let code = exit_code.map(|c| c.to_string()).unwrap_or_else(|| "?".to_string());
                format!("$ {}\n{}\n(exit {})", command, output.trim_end(), code)
            }
            Some(ToolMetadata::BackgroundCommand { command, pid, log_path }) => {
                format!("$ {} &\npid {} logging to {}", command, pid, log_path)
            }
            Some(ToolMetadata::SubAgent { question, response }) => {
                format!("Sub-agent: {}\n{}", question, response)
            }
            None => format!("{} succeeded", result.tool_name),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::ToolOutput;

    #[test]
    fn test_render_failure() {
        let out = ToolOutput::error("bash", "exit 1");
        assert_eq!(PlainRenderer.render(&out.structured), "bash failed: exit 1");
    }

    #[test]
    fn test_render_file_read() {
        let out = ToolOutput::success(
            "read_file",
            "x",
            Some(ToolMetadata::FileRead {
                path: "a.rs".to_string(),
                lines: 3,
            }),
        );
        assert_eq!(PlainRenderer.render(&out.structured), "Read a.rs (3 lines)");
    }
}
