//! Configuration management

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::Error;
use crate::platform::{normalize_platform_name, ApiMode, PlatformCatalog};
use crate::pricing::ModelPricing;
use crate::Result;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Workspace directory path
    #[serde(default = "default_workspace")]
    pub workspace: PathBuf,

    /// Model used for normal turns
    #[serde(default = "default_model")]
    pub model: String,

    /// Cheaper model used for summaries and weak-model calls
    #[serde(default = "default_weak_model")]
    pub weak_model: String,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    /// Token cap for weak-model calls; falls back to `max_tokens` when zero
    #[serde(default)]
    pub weak_model_max_tokens: u32,

    /// Reasoning effort for reasoning models ("none" disables it)
    #[serde(default = "default_reasoning_effort")]
    pub reasoning_effort: String,

    /// Tool rounds allowed per call; zero means unlimited
    #[serde(default)]
    pub max_turns: usize,

    /// Set on threads spawned by a tool on behalf of a parent thread
    #[serde(default, skip_serializing)]
    pub is_sub_agent: bool,

    /// OpenAI-compatible provider settings
    #[serde(default)]
    pub openai: Option<OpenAiConfig>,
}

/// Provider settings for OpenAI-compatible endpoints.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OpenAiConfig {
    /// Platform name (`openai`, `xai`, `codex`, or a custom name)
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub platform: String,

    /// Legacy name for `platform`
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub preset: String,

    /// `chat_completions` or `responses` (synonyms accepted)
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub api_mode: String,

    /// Legacy boolean switch for the streaming protocol
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub responses_api: Option<bool>,

    /// Older legacy boolean switch for the streaming protocol
    #[serde(default)]
    pub use_responses_api: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub models: Option<CustomModels>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pricing: Option<HashMap<String, ModelPricing>>,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub base_url: String,

    /// Name of the environment variable holding the API key
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub api_key_env_var: String,

    /// Ask the provider to retain streaming responses server-side
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub store_responses: Option<bool>,
}

/// Custom model lists overriding a platform's built-in lists.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomModels {
    #[serde(default)]
    pub reasoning: Vec<String>,
    #[serde(default)]
    pub non_reasoning: Vec<String>,
}

fn default_workspace() -> PathBuf {
    config_dir().join("workspace")
}

fn default_model() -> String {
    "gpt-4.1".to_string()
}

fn default_weak_model() -> String {
    "gpt-4.1-mini".to_string()
}

fn default_max_tokens() -> u32 {
    8192
}

fn default_reasoning_effort() -> String {
    "medium".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            workspace: default_workspace(),
            model: default_model(),
            weak_model: default_weak_model(),
            max_tokens: default_max_tokens(),
            weak_model_max_tokens: 0,
            reasoning_effort: default_reasoning_effort(),
            max_turns: 0,
            is_sub_agent: false,
            openai: None,
        }
    }
}

impl Config {
    /// Model and token cap for a call.
    pub fn model_for(&self, use_weak_model: bool) -> (&str, u32) {
        if use_weak_model {
            let max = if self.weak_model_max_tokens > 0 {
                self.weak_model_max_tokens
            } else {
                self.max_tokens
            };
            (&self.weak_model, max)
        } else {
            (&self.model, self.max_tokens)
        }
    }

    /// Whether streaming responses should be stored server-side.
    pub fn store_responses(&self) -> bool {
        self.openai
            .as_ref()
            .and_then(|o| o.store_responses)
            .unwrap_or(true)
    }

    /// Check provider settings eagerly, naming the offending field.
    pub fn validate(&self, catalog: &PlatformCatalog) -> Result<()> {
        let Some(openai) = &self.openai else {
            return Ok(());
        };

        let platform = normalize_platform_name(&openai.platform);
        let preset = normalize_platform_name(&openai.preset);

        if !openai.platform.is_empty() && platform.is_empty() {
            return Err(Error::config(
                "openai.platform",
                &openai.platform,
                "platform cannot be empty or whitespace",
            ));
        }

        if !openai.preset.is_empty() {
            if preset.is_empty() {
                return Err(Error::config(
                    "openai.preset",
                    &openai.preset,
                    "preset cannot be empty or whitespace",
                ));
            }
            if catalog.get(&preset).is_none() {
                return Err(Error::config(
                    "openai.preset",
                    &openai.preset,
                    format!("valid presets are: [{}]", catalog.names().join(" ")),
                ));
            }
        }

        if !platform.is_empty() && !preset.is_empty() && platform != preset {
            return Err(Error::config(
                "openai.preset",
                &openai.preset,
                format!("conflicts with openai.platform '{}'", openai.platform),
            ));
        }

        if !openai.api_mode.is_empty() && ApiMode::parse(&openai.api_mode).is_none() {
            return Err(Error::config(
                "openai.api_mode",
                &openai.api_mode,
                "valid values are: chat_completions, responses",
            ));
        }

        if !openai.base_url.is_empty() {
            validate_base_url(&openai.base_url)?;
        }

        if !openai.api_key_env_var.is_empty() {
            validate_env_var_name(&openai.api_key_env_var)?;
        }

        if let Some(pricing) = &openai.pricing {
            let mut models: Vec<&String> = pricing.keys().collect();
            models.sort();
            for model in models {
                validate_pricing(model, &pricing[model])?;
            }
        }

        Ok(())
    }
}

fn validate_base_url(raw: &str) -> Result<()> {
    if !raw.starts_with("http://") && !raw.starts_with("https://") {
        return Err(Error::config(
            "openai.base_url",
            raw,
            "must start with http:// or https://",
        ));
    }
    url::Url::parse(raw).map_err(|e| Error::config("openai.base_url", raw, e.to_string()))?;
    Ok(())
}

static ENV_VAR_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").unwrap());

fn validate_env_var_name(raw: &str) -> Result<()> {
    let field = "openai.api_key_env_var";
    if raw.trim().is_empty() {
        return Err(Error::config(field, raw, "cannot be empty or whitespace"));
    }
    if raw.chars().any(char::is_whitespace) {
        return Err(Error::config(field, raw, "cannot contain whitespace characters"));
    }
    if !ENV_VAR_NAME.is_match(raw) {
        return Err(Error::config(field, raw, "must be a valid environment variable name"));
    }
    Ok(())
}

fn validate_pricing(model: &str, pricing: &ModelPricing) -> Result<()> {
    let field = format!("openai.pricing.{}", model);
    let checks = [
        ("input", pricing.input),
        ("cached_input", pricing.cached_input),
        ("output", pricing.output),
    ];
    for (name, rate) in checks {
        if rate < 0.0 {
            return Err(Error::config(
                &field,
                rate.to_string(),
                format!("{} pricing must be >= 0", name),
            ));
        }
    }
    if pricing.context_window <= 0 {
        return Err(Error::config(
            &field,
            pricing.context_window.to_string(),
            "context_window must be > 0",
        ));
    }
    Ok(())
}

/// Get the config directory path
pub fn config_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".duet")
}

/// Get the config file path
pub fn config_path() -> PathBuf {
    config_dir().join("config.json")
}

/// Directory holding persisted conversations
pub fn conversations_dir() -> PathBuf {
    config_dir().join("conversations")
}

/// Load configuration from file, falling back to defaults when absent
pub fn load() -> Result<Config> {
    let path = config_path();

    if !path.exists() {
        debug!(path = %path.display(), "No config file, using defaults");
        return Ok(Config::default());
    }

    let content = std::fs::read_to_string(&path)?;
    let config: Config = serde_json::from_str(&content)?;
    Ok(config)
}

/// Save configuration to file
pub fn save(config: &Config) -> Result<()> {
    let path = config_path();

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let content = serde_json::to_string_pretty(config)?;
    std::fs::write(&path, content)?;
    Ok(())
}
