//! Filesystem tools - read, write, and list files

use async_trait::async_trait;
use serde_json::{json, Value};

use super::{Tool, ToolContext, ToolMetadata, ToolOutput};
use crate::error::Error;
use crate::Result;

fn path_param(params: &Value) -> Result<&str> {
    params
        .get("path")
        .and_then(|v| v.as_str())
        .ok_or_else(|| Error::Tool("Missing 'path' parameter".to_string()))
}

/// Read file contents
pub struct ReadFileTool;

#[async_trait]
impl Tool for ReadFileTool {
    fn name(&self) -> &str {
        "read_file"
    }
    fn description(&self) -> &str {
        "Read the contents of a file at the specified path"
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "Path to the file to read"
                }
            },
            "required": ["path"]
        })
    }

    async fn execute(&self, ctx: &ToolContext, params: Value) -> Result<ToolOutput> {
        let path = path_param(&params)?;
        let full = ctx.resolve_path(path);

        let content = tokio::fs::read_to_string(&full)
            .await
            .map_err(|e| Error::Tool(format!("Failed to read {}: {}", path, e)))?;

        ctx.state.touch_file(full.display().to_string());

        let lines = content.lines().count();
        Ok(ToolOutput::success(
            self.name(),
            content,
            Some(ToolMetadata::FileRead {
                path: path.to_string(),
                lines,
            }),
        ))
    }
}

/// Write content to a file
pub struct WriteFileTool;

#[async_trait]
impl Tool for WriteFileTool {
    fn name(&self) -> &str {
        "write_file"
    }
    fn description(&self) -> &str {
        "Write content to a file at the specified path"
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "Path to the file to write"
                },
                "content": {
                    "type": "string",
                    "description": "Content to write to the file"
                }
            },
            "required": ["path", "content"]
        })
    }

    async fn execute(&self, ctx: &ToolContext, params: Value) -> Result<ToolOutput> {
        let path = path_param(&params)?;
        let content = params
            .get("content")
            .and_then(|v| v.as_str())
            .ok_or_else(|| Error::Tool("Missing 'content' parameter".to_string()))?;

        let full = ctx.resolve_path(path);
        if let Some(parent) = full.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| Error::Tool(format!("Failed to create directory: {}", e)))?;
        }

        tokio::fs::write(&full, content)
            .await
            .map_err(|e| Error::Tool(format!("Failed to write {}: {}", path, e)))?;

        ctx.state.touch_file(full.display().to_string());

        Ok(ToolOutput::success(
            self.name(),
            format!("Successfully wrote {} bytes to {}", content.len(), path),
            Some(ToolMetadata::FileWrite {
                path: path.to_string(),
                bytes: content.len(),
            }),
        ))
    }
}

/// List directory contents
pub struct ListDirTool;

#[async_trait]
impl Tool for ListDirTool {
    fn name(&self) -> &str {
        "list_dir"
    }
    fn description(&self) -> &str {
        "List contents of a directory"
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "Path to the directory to list"
                }
            },
            "required": ["path"]
        })
    }

    async fn execute(&self, ctx: &ToolContext, params: Value) -> Result<ToolOutput> {
        let path = path_param(&params)?;
        let full = ctx.resolve_path(path);

        let mut reader = tokio::fs::read_dir(&full)
            .await
            .map_err(|e| Error::Tool(format!("Failed to read directory {}: {}", path, e)))?;

        let mut entries = Vec::new();
        while let Some(entry) = reader.next_entry().await? {
            let name = entry.file_name().to_string_lossy().to_string();
            let is_dir = entry.file_type().await.map(|ft| ft.is_dir()).unwrap_or(false);
            entries.push(if is_dir { format!("{}/", name) } else { name });
        }
        entries.sort();

        Ok(ToolOutput::success(
            self.name(),
            entries.join("\n"),
            Some(ToolMetadata::DirectoryList {
                path: path.to_string(),
                entries,
            }),
        ))
    }
}
