//! Thread contract and the state both protocol loops share.
//!
//! A thread owns one conversation. [`new_thread`] resolves the protocol once
//! and returns the matching loop behind the [`Thread`] trait, so callers never
//! branch on the wire format.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::chat::ChatThread;
use super::handler::MessageHandler;
use super::llm::Backend;
use super::message::Message;
use super::prompt::SystemPromptBuilder;
use super::responses::ResponsesThread;
use super::usage::{TokenCounts, Usage, UsageTracker};
use crate::config::Config;
use crate::error::Error;
use crate::persistence::{ConversationRecord, ConversationStore, API_MODE_KEY, MODEL_KEY};
use crate::platform::{ApiMode, EnvSnapshot, PlatformCatalog, Resolution, Resolver};
use crate::pricing::ModelPricing;
use crate::state::{ProcessMonitor, SignalProcessMonitor, ToolState};
use crate::tools::{StructuredToolResult, ToolContext, ToolExecutor};
use crate::Result;

/// Per-call options for [`Thread::send_message`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MessageOpt {
    /// Run this call on the weak model
    pub use_weak_model: bool,
    /// Send no tool schemas
    pub no_tool_use: bool,
    /// Leave the thread's log exactly as it was before the call
    pub no_save_conversation: bool,
    /// Tool rounds allowed; zero falls back to the config value
    pub max_turns: usize,
    /// Images attached to the user message: HTTPS, `data:` or `file://`
    /// URLs, or local paths
    pub images: Vec<String>,
    /// Context-window utilisation in `(0, 1]` at which the history is
    /// compacted before the next request; anything else disables it
    pub compact_ratio: f64,
    pub disable_auto_compact: bool,
}

/// One conversation with the provider.
///
/// `send_message` is not reentrant: callers must not drive the same thread
/// from two tasks at once.
#[async_trait]
pub trait Thread: Send {
    /// Run a full turn and return the final assistant text.
    ///
    /// Cancellation is not an error: the call returns whatever output was
    /// produced before the token fired.
    async fn send_message(
        &mut self,
        message: &str,
        handler: &dyn MessageHandler,
        opt: MessageOpt,
        cancel: &CancellationToken,
    ) -> Result<String>;

    async fn save_conversation(&mut self, summarize: bool) -> Result<()>;

    /// Replace the thread's state with the stored conversation of the same id.
    async fn load_conversation(&mut self) -> Result<()>;

    /// One-line summary produced by a throwaway copy of this thread.
    async fn short_summary(&self) -> String;

    /// Replace the history with a model-written summary of it.
    ///
    /// Tool results and file access times are cleared with it. On failure the
    /// history is left untouched.
    async fn compact_context(&mut self, cancel: &CancellationToken) -> Result<()>;

    /// Flat role/content view of the log.
    fn messages(&self) -> Result<Vec<Message>>;

    fn core(&self) -> &ThreadCore;

    fn core_mut(&mut self) -> &mut ThreadCore;

    fn api_mode(&self) -> ApiMode {
        self.core().resolution.api_mode
    }

    fn usage(&self) -> Usage {
        self.core().usage.snapshot()
    }

    fn conversation_id(&self) -> &str {
        &self.core().conversation_id
    }

    fn set_conversation_id(&mut self, id: &str) {
        self.core_mut().conversation_id = id.to_string();
    }

    fn is_persisted(&self) -> bool {
        self.core().persisted
    }

    fn enable_persistence(&mut self, enabled: bool) {
        self.core_mut().persisted = enabled;
    }

    fn structured_tool_results(&self) -> HashMap<String, StructuredToolResult> {
        self.core().tool_results.clone()
    }

    fn config(&self) -> &Config {
        &self.core().config
    }

    fn summary(&self) -> &str {
        &self.core().summary
    }
}

/// Collaborators a thread is built from.
#[derive(Clone)]
pub struct ThreadDeps {
    pub backend: Backend,
    pub tools: Arc<dyn ToolExecutor>,
    pub prompt: Arc<dyn SystemPromptBuilder>,
    pub store: Option<Arc<dyn ConversationStore>>,
    pub resolver: Arc<Resolver>,
    pub monitor: Arc<dyn ProcessMonitor>,
}

impl ThreadDeps {
    pub fn new(
        backend: Backend,
        tools: Arc<dyn ToolExecutor>,
        prompt: Arc<dyn SystemPromptBuilder>,
    ) -> Self {
        Self {
            backend,
            tools,
            prompt,
            store: None,
            resolver: Arc::new(Resolver::new(
                Arc::new(PlatformCatalog::builtin()),
                EnvSnapshot::capture(),
            )),
            monitor: Arc::new(SignalProcessMonitor),
        }
    }

    pub fn with_store(mut self, store: Arc<dyn ConversationStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_resolver(mut self, resolver: Resolver) -> Self {
        self.resolver = Arc::new(resolver);
        self
    }

    pub fn with_monitor(mut self, monitor: Arc<dyn ProcessMonitor>) -> Self {
        self.monitor = monitor;
        self
    }
}

/// State shared by both protocol loops.
pub struct ThreadCore {
    pub(crate) config: Config,
    pub(crate) resolution: Arc<Resolution>,
    pub(crate) deps: ThreadDeps,
    pub(crate) conversation_id: String,
    pub(crate) persisted: bool,
    pub(crate) summary: String,
    pub(crate) created_at: DateTime<Utc>,
    pub(crate) usage: UsageTracker,
    pub(crate) tool_results: HashMap<String, StructuredToolResult>,
    pub(crate) state: ToolState,
    /// Serializes save and load; never held across a provider call
    pub(crate) conversation_lock: Arc<tokio::sync::Mutex<()>>,
}

impl ThreadCore {
    pub(crate) fn new(
        config: Config,
        resolution: Arc<Resolution>,
        deps: ThreadDeps,
        usage: UsageTracker,
    ) -> Self {
        Self {
            config,
            resolution,
            deps,
            conversation_id: uuid::Uuid::new_v4().to_string(),
            persisted: false,
            summary: String::new(),
            created_at: Utc::now(),
            usage,
            tool_results: HashMap::new(),
            state: ToolState::new(),
            conversation_lock: Arc::new(tokio::sync::Mutex::new(())),
        }
    }

    pub fn resolution(&self) -> &Resolution {
        &self.resolution
    }

    pub fn is_sub_agent(&self) -> bool {
        self.config.is_sub_agent
    }

    pub(crate) fn model_for(&self, opt: &MessageOpt) -> (String, u32) {
        let (model, max_tokens) = self.config.model_for(opt.use_weak_model);
        (model.to_string(), max_tokens)
    }

    pub(crate) fn max_turns(&self, opt: &MessageOpt) -> usize {
        if opt.max_turns > 0 {
            opt.max_turns
        } else {
            self.config.max_turns
        }
    }

    /// Reasoning effort for `model`, if it takes one.
    pub(crate) fn reasoning_effort(&self, model: &str) -> Option<String> {
        let effort = self.config.reasoning_effort.trim();
        if !self.resolution.is_reasoning_model(model)
            || effort.is_empty()
            || effort.eq_ignore_ascii_case("none")
        {
            return None;
        }
        Some(effort.to_string())
    }

    pub(crate) fn pricing_for(&self, model: &str) -> ModelPricing {
        self.resolution.pricing.resolve(model)
    }

    /// Sub-agents roll their costs into the shared tracker but leave the
    /// parent's context-window gauge alone.
    pub(crate) fn record_usage(&self, model: &str, tokens: TokenCounts) {
        let pricing = self.pricing_for(model);
        self.usage.record(tokens, &pricing, !self.is_sub_agent());
    }

    pub(crate) fn system_prompt(&self, model: &str) -> String {
        self.deps
            .prompt
            .system_prompt(model, &self.config, self.is_sub_agent())
    }

    pub(crate) fn tool_context(&self, cancel: &CancellationToken) -> ToolContext {
        ToolContext {
            state: self.state.clone(),
            subagent: (!self.is_sub_agent()).then(|| self.subagent_context()),
            abort: cancel.clone(),
            workspace: self.workspace(),
        }
    }

    fn workspace(&self) -> PathBuf {
        self.config.workspace.clone()
    }

    pub(crate) fn subagent_context(&self) -> SubAgentContext {
        SubAgentContext {
            config: self.config.clone(),
            resolution: self.resolution.clone(),
            deps: self.deps.clone(),
            usage: self.usage.clone(),
        }
    }

    /// A non-persisted copy sharing this thread's collaborators, for summaries.
    pub(crate) fn detached(&self) -> ThreadCore {
        let mut deps = self.deps.clone();
        deps.store = None;
        ThreadCore::new(
            self.config.clone(),
            self.resolution.clone(),
            deps,
            UsageTracker::new(),
        )
    }

    /// A non-persisted copy charging its calls to this thread's usage.
    pub(crate) fn compaction_copy(&self) -> ThreadCore {
        let mut core = self.detached();
        core.usage = self.usage.clone();
        core
    }

    /// Whether the last exchange filled at least `ratio` of the context window.
    pub(crate) fn should_auto_compact(&self, ratio: f64) -> bool {
        if ratio <= 0.0 || ratio > 1.0 {
            return false;
        }
        let usage = self.usage.snapshot();
        if usage.max_context_window == 0 {
            return false;
        }
        usage.current_context_window as f64 / usage.max_context_window as f64 >= ratio
    }

    /// Drop state that referred to the history replaced by compaction.
    pub(crate) fn reset_after_compaction(&mut self) {
        self.tool_results.clear();
        self.state.set_file_last_access(HashMap::new());
        self.usage.reset_context_window();
    }

    /// Record carrying everything but the protocol-specific log.
    pub(crate) fn build_record(&self, raw_messages: serde_json::Value) -> ConversationRecord {
        let mut record = ConversationRecord::new(&self.conversation_id);
        record.raw_messages = raw_messages;
        record.usage = self.usage.snapshot();
        record.summary = self.summary.clone();
        record.created_at = self.created_at;
        record.updated_at = Utc::now();
        record.file_last_access = self.state.file_last_access();
        record.tool_results = self.tool_results.clone();
        record.background_processes = self.state.background_processes();
        record.metadata.insert(
            API_MODE_KEY.to_string(),
            json!(self.resolution.api_mode.as_str()),
        );
        record
            .metadata
            .insert(MODEL_KEY.to_string(), json!(self.config.model));
        record
    }

    /// Reject records from another provider or the other protocol.
    pub(crate) fn check_record(&self, record: &ConversationRecord) -> Result<()> {
        record.check_provider()?;

        let configured = self.resolution.api_mode;
        match record.detected_api_mode() {
            Some(stored) if stored != configured => Err(Error::ApiModeMismatch {
                stored: stored.to_string(),
                configured: configured.to_string(),
            }),
            Some(_) => Ok(()),
            None => {
                let empty = record
                    .raw_messages
                    .as_array()
                    .map_or(true, |entries| entries.is_empty());
                if !empty {
                    warn!(
                        conversation_id = %record.id,
                        api_mode = %configured,
                        "Stored conversation has no detectable protocol, loading as configured"
                    );
                }
                Ok(())
            }
        }
    }

    /// Restore everything but the protocol-specific log.
    pub(crate) fn restore(&mut self, record: ConversationRecord) {
        self.usage.replace(record.usage);
        self.summary = record.summary;
        self.created_at = record.created_at;
        self.state.set_file_last_access(record.file_last_access);
        self.tool_results = record.tool_results;
        let alive = self
            .state
            .restore_background_processes(record.background_processes, self.deps.monitor.as_ref());
        debug!(
            conversation_id = %self.conversation_id,
            background_processes = alive,
            "Restored conversation state"
        );
    }

    pub(crate) fn store(&self) -> Option<Arc<dyn ConversationStore>> {
        if !self.persisted {
            return None;
        }
        self.deps.store.clone()
    }
}

/// What a tool needs to start a sub-agent on behalf of its thread.
///
/// The spawned thread shares the parent's usage tracker and collaborators but
/// owns a fresh log and lock, is never persisted, and never signals done.
#[derive(Clone)]
pub struct SubAgentContext {
    config: Config,
    resolution: Arc<Resolution>,
    deps: ThreadDeps,
    usage: UsageTracker,
}

impl SubAgentContext {
    pub fn spawn(&self) -> Result<Box<dyn Thread>> {
        if self.config.is_sub_agent {
            return Err(Error::Tool(
                "Sub-agents cannot spawn further sub-agents".to_string(),
            ));
        }

        let mut config = self.config.clone();
        config.is_sub_agent = true;
        let mut deps = self.deps.clone();
        deps.store = None;

        let core = ThreadCore::new(config, self.resolution.clone(), deps, self.usage.clone());
        debug!(conversation_id = %core.conversation_id, "Spawning sub-agent");
        Ok(build_thread(core))
    }

    pub fn usage(&self) -> &UsageTracker {
        &self.usage
    }
}

pub(crate) fn build_thread(core: ThreadCore) -> Box<dyn Thread> {
    match core.resolution.api_mode {
        ApiMode::ChatCompletions => Box::new(ChatThread::from_core(core)),
        ApiMode::Responses => Box::new(ResponsesThread::from_core(core)),
    }
}

/// Validate `config`, resolve its protocol and build the matching thread.
pub fn new_thread(config: Config, deps: ThreadDeps) -> Result<Box<dyn Thread>> {
    config.validate(deps.resolver.catalog())?;
    let resolution = deps.resolver.resolve(&config);

    info!(
        api_mode = %resolution.api_mode,
        platform = %resolution.platform,
        model = %config.model,
        "Creating thread"
    );

    let core = ThreadCore::new(config, Arc::new(resolution), deps, UsageTracker::new());
    Ok(build_thread(core))
}
