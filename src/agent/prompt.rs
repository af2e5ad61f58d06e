//! System prompts.
//!
//! Workspace instruction files are read once at construction and reused for
//! every turn.

use std::path::{Path, PathBuf};

use crate::config::Config;

/// Instruction used when asking a model for a one-line conversation summary.
pub const SHORT_SUMMARY_PROMPT: &str = r#"Summarise the conversation in one sentence, less or equal than 12 words. Keep it short and concise.

## Process
1. Analyze the multi-turn conversation to understand the context and main topics
2. Internally form your analysis
3. Write a short and concise summary as your only response

## Tone and Style
* Use active, descriptive language without first-person pronouns
* Focus on the main topic or task discussed
* Keep it professional and direct
* Avoid unnecessary words like "help with" or "assistance for""#;

/// Instruction used when replacing a long history with a summary of it.
pub const COMPACT_PROMPT: &str = r#"Summarise the conversation so far so that work can continue from the summary alone. The summary replaces the whole history.

Cover, in this order:
1. Objective: what the user asked for and any constraints or preferences they stated
2. Decisions: technical choices made and the reasons given for them
3. Files: paths created, modified or inspected, with what changed in each
4. Errors: problems hit and how each was resolved, or that it is still open
5. State: what is done, what is in progress, and the next concrete step

Quote exact identifiers, commands and error messages where they matter. Write the summary as your only response."#;

/// Produces the instruction message placed at the head of every request.
pub trait SystemPromptBuilder: Send + Sync {
    fn system_prompt(&self, model: &str, config: &Config, is_sub_agent: bool) -> String;
}

/// Default prompt: identity, workspace, tools, plus workspace instruction files.
pub struct WorkspacePrompt {
    workspace: PathBuf,
    cached_bootstrap: String,
}

impl WorkspacePrompt {
    pub fn new(workspace: &Path) -> Self {
        Self {
            workspace: workspace.to_path_buf(),
            cached_bootstrap: load_bootstrap_files(workspace),
        }
    }

    fn identity(&self, model: &str) -> String {
        let now = chrono::Local::now().format("%Y-%m-%d %H:%M (%A)");
        format!(
            r#"# duet

You are duet, a coding agent working in a local repository.

## Current Time
{}

## Model
{}

## Workspace
Your workspace is: `{}`

Relative paths resolve against the workspace. Prefer relative paths and
try them before asking for a full path.

## Tools
- `read_file`, `write_file`, `list_dir` - File operations
- `bash` - Run shell commands, optionally in the background
- `subagent` - Delegate a focused question to a helper agent

Be accurate and concise. When using tools, just do it; don't explain unless asked."#,
            now,
            model,
            self.workspace.display()
        )
    }

    fn sub_agent_identity(&self, model: &str) -> String {
        format!(
            r#"# duet helper

You are a helper agent answering one question for another agent.
Model: {}
Workspace: `{}`

Investigate with the tools available, then reply with a direct, complete
answer. Your reply is returned verbatim to the agent that asked."#,
            model,
            self.workspace.display()
        )
    }
}

impl SystemPromptBuilder for WorkspacePrompt {
    fn system_prompt(&self, model: &str, _config: &Config, is_sub_agent: bool) -> String {
        let mut parts = Vec::with_capacity(2);
        if is_sub_agent {
            parts.push(self.sub_agent_identity(model));
        } else {
            parts.push(self.identity(model));
        }
        if !self.cached_bootstrap.is_empty() {
            parts.push(self.cached_bootstrap.clone());
        }
        parts.join("\n\n---\n\n")
    }
}

/// Fixed prompt, handy for tests and scripted runs.
pub struct StaticPrompt(pub String);

impl SystemPromptBuilder for StaticPrompt {
    fn system_prompt(&self, _model: &str, _config: &Config, is_sub_agent: bool) -> String {
        if is_sub_agent {
            format!("{} (sub-agent)", self.0)
        } else {
            self.0.clone()
        }
    }
}

fn load_bootstrap_files(workspace: &Path) -> String {
    const BOOTSTRAP_FILES: [&str; 3] = ["AGENTS.md", "DUET.md", "README.md"];

    let mut parts = Vec::with_capacity(BOOTSTRAP_FILES.len());
    for filename in BOOTSTRAP_FILES {
        let path = workspace.join(filename);
        if let Ok(content) = std::fs::read_to_string(&path) {
            parts.push(format!("## {}\n\n{}", filename, content));
        }
    }
    parts.join("\n\n")
}
