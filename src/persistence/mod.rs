//! Conversation persistence - records, stores and format detection

mod migrate;

pub use migrate::{
    detect_api_mode, detect_api_mode_strict, ACCEPTED_PROVIDERS, API_MODE_KEY, LAST_RESPONSE_ID_KEY,
    MODEL_KEY, PROVIDER, RESPONSES_PROVIDER,
};

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::agent::Usage;
use crate::error::Error;
use crate::platform::ApiMode;
use crate::state::BackgroundProcess;
use crate::tools::StructuredToolResult;
use crate::Result;

/// Everything needed to restore a thread.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationRecord {
    pub id: String,
    /// Protocol-specific log: chat messages or conversation items
    #[serde(default)]
    pub raw_messages: Value,
    #[serde(default)]
    pub provider: String,
    #[serde(default)]
    pub file_last_access: HashMap<String, DateTime<Utc>>,
    #[serde(default)]
    pub usage: Usage,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub summary: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub metadata: Map<String, Value>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub tool_results: HashMap<String, StructuredToolResult>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub background_processes: Vec<BackgroundProcess>,
}

impl ConversationRecord {
    pub fn new(id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            raw_messages: Value::Array(Vec::new()),
            provider: PROVIDER.to_string(),
            file_last_access: HashMap::new(),
            usage: Usage::default(),
            summary: String::new(),
            created_at: now,
            updated_at: now,
            metadata: Map::new(),
            tool_results: HashMap::new(),
            background_processes: Vec::new(),
        }
    }

    /// Protocol that produced this record.
    pub fn api_mode(&self) -> ApiMode {
        detect_api_mode(&self.provider, &self.metadata, &self.raw_messages)
    }

    /// Protocol that produced this record, if anything identifies it.
    pub fn detected_api_mode(&self) -> Option<ApiMode> {
        detect_api_mode_strict(&self.provider, &self.metadata, &self.raw_messages)
    }

    pub fn model(&self) -> Option<&str> {
        self.metadata.get(MODEL_KEY).and_then(Value::as_str)
    }

    /// Reject records written by a different provider.
    pub fn check_provider(&self) -> Result<()> {
        if !self.provider.is_empty() && !ACCEPTED_PROVIDERS.contains(&self.provider.as_str()) {
            return Err(Error::IncompatibleProvider(self.provider.clone()));
        }
        Ok(())
    }
}

/// Durable storage for conversation records.
pub trait ConversationStore: Send + Sync {
    fn save(&self, record: ConversationRecord) -> Result<()>;

    /// Fails with [`Error::NotFound`] when no record has this id.
    fn load(&self, id: &str) -> Result<ConversationRecord>;
}

/// Store that keeps records in memory; used by tests and one-shot runs.
#[derive(Debug, Default)]
pub struct MemoryConversationStore {
    records: Mutex<HashMap<String, ConversationRecord>>,
}

impl MemoryConversationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ConversationStore for MemoryConversationStore {
    fn save(&self, record: ConversationRecord) -> Result<()> {
        self.records
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(record.id.clone(), record);
        Ok(())
    }

    fn load(&self, id: &str) -> Result<ConversationRecord> {
        self.records
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(id)
            .cloned()
            .ok_or_else(|| Error::NotFound(id.to_string()))
    }
}

/// One JSON file per conversation under a directory.
pub struct JsonFileStore {
    dir: PathBuf,
}

impl JsonFileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of a record; ids that could leave the store directory are rejected.
    fn record_path(&self, id: &str) -> Result<PathBuf> {
        if id.is_empty() || id.contains(&['/', '\\'][..]) || id.contains("..") {
            return Err(Error::InvalidConversationId(id.to_string()));
        }
        Ok(self.dir.join(format!("{}.json", id)))
    }

    /// Ids of stored conversations, most recently modified first.
    pub fn list(&self) -> Result<Vec<String>> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }

        let mut entries = Vec::new();
        for entry in std::fs::read_dir(&self.dir)? {
            let entry = entry?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            let modified = entry.metadata()?.modified()?;
            entries.push((modified, stem.to_string()));
        }
        entries.sort_by(|a, b| b.0.cmp(&a.0));
        Ok(entries.into_iter().map(|(_, id)| id).collect())
    }
}

impl ConversationStore for JsonFileStore {
    fn save(&self, record: ConversationRecord) -> Result<()> {
        let path = self.record_path(&record.id)?;
        std::fs::create_dir_all(&self.dir)?;
        let tmp = path.with_extension("json.tmp");
        let content = serde_json::to_string_pretty(&record)?;
        std::fs::write(&tmp, content)?;
        std::fs::rename(&tmp, &path)?;
        Ok(())
    }

    fn load(&self, id: &str) -> Result<ConversationRecord> {
        let path = self.record_path(id)?;
        let content = match std::fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(Error::NotFound(id.to_string()))
            }
            Err(e) => return Err(e.into()),
        };
        Ok(serde_json::from_str(&content)?)
    }
}
