//! Protocol and platform resolution.
//!
//! Decides, once per thread, which wire protocol to speak and which platform
//! defaults (models, pricing, base URL, credential variable) apply. The
//! resolver is pure: environment variables are captured up front into an
//! [`EnvSnapshot`] and the preset tables are injected as a [`PlatformCatalog`].

mod presets;

pub use presets::{ModelLists, PlatformCatalog, Preset};

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::pricing::PricingTable;

/// Environment variable selecting the protocol by name.
pub const ENV_API_MODE: &str = "DUET_OPENAI_API_MODE";
/// Legacy boolean environment switch for the streaming protocol.
pub const ENV_USE_RESPONSES_API: &str = "DUET_OPENAI_USE_RESPONSES_API";
/// Base URL override.
pub const ENV_API_BASE: &str = "OPENAI_API_BASE";

const DEFAULT_PLATFORM: &str = "openai";
const DEFAULT_API_KEY_ENV_VAR: &str = "OPENAI_API_KEY";

/// Wire protocol spoken by a thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ApiMode {
    /// Non-streaming chat completions; full history resent each request.
    #[serde(rename = "chat_completions")]
    ChatCompletions,
    /// Streaming responses API; history chained through response ids.
    #[serde(rename = "responses")]
    Responses,
}

impl ApiMode {
    /// Parse a protocol name, accepting the usual synonyms.
    pub fn parse(raw: &str) -> Option<Self> {
        let normalized = raw.trim().to_lowercase().replace('-', "_");
        match normalized.as_str() {
            "chat" | "chat_completions" | "chatcompletions" => Some(ApiMode::ChatCompletions),
            "responses" | "responses_api" | "response" => Some(ApiMode::Responses),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ApiMode::ChatCompletions => "chat_completions",
            ApiMode::Responses => "responses",
        }
    }
}

impl fmt::Display for ApiMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Environment values that influence resolution.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvSnapshot {
    pub api_mode: Option<String>,
    pub use_responses_api: Option<String>,
    pub api_base: Option<String>,
}

impl EnvSnapshot {
    /// Read the relevant variables from the process environment.
    pub fn capture() -> Self {
        let read = |key: &str| std::env::var(key).ok().filter(|v| !v.is_empty());
        Self {
            api_mode: read(ENV_API_MODE),
            use_responses_api: read(ENV_USE_RESPONSES_API),
            api_base: read(ENV_API_BASE),
        }
    }
}

/// Lowercase and trim a platform or preset name.
pub fn normalize_platform_name(name: &str) -> String {
    name.trim().to_lowercase()
}

/// Platform name: explicit platform, else legacy preset, else `openai`.
pub fn resolve_platform_name(config: &Config) -> String {
    let Some(openai) = &config.openai else {
        return DEFAULT_PLATFORM.to_string();
    };
    for candidate in [&openai.platform, &openai.preset] {
        let name = normalize_platform_name(candidate);
        if !name.is_empty() {
            return name;
        }
    }
    DEFAULT_PLATFORM.to_string()
}

/// Preset whose tables should be loaded, if any.
///
/// An explicitly named platform always loads. Without a name, the default
/// platform loads only when no custom models or pricing are configured.
fn preset_for_loading(config: &Config) -> Option<String> {
    let Some(openai) = &config.openai else {
        return Some(DEFAULT_PLATFORM.to_string());
    };
    for candidate in [&openai.platform, &openai.preset] {
        let name = normalize_platform_name(candidate);
        if !name.is_empty() {
            return Some(name);
        }
    }
    if openai.models.is_none() && openai.pricing.is_none() {
        return Some(DEFAULT_PLATFORM.to_string());
    }
    None
}

/// Pick the wire protocol. Each level fully overrides the ones below it.
pub fn resolve_api_mode(config: &Config, env: &EnvSnapshot, catalog: &PlatformCatalog) -> ApiMode {
    let platform = resolve_platform_name(config);
    if let Some(forced) = catalog.get(&platform).and_then(|p| p.forced_api_mode) {
        return forced;
    }

    if let Some(mode) = env.api_mode.as_deref().and_then(ApiMode::parse) {
        return mode;
    }

    if let Some(raw) = env.use_responses_api.as_deref() {
        return if raw.eq_ignore_ascii_case("true") || raw == "1" {
            ApiMode::Responses
        } else {
            ApiMode::ChatCompletions
        };
    }

    let Some(openai) = &config.openai else {
        return ApiMode::ChatCompletions;
    };

    if let Some(mode) = ApiMode::parse(&openai.api_mode) {
        return mode;
    }

    if let Some(flag) = openai.responses_api {
        return if flag {
            ApiMode::Responses
        } else {
            ApiMode::ChatCompletions
        };
    }

    if openai.use_responses_api {
        return ApiMode::Responses;
    }

    ApiMode::ChatCompletions
}

/// Everything a thread needs to know about its provider.
#[derive(Debug, Clone)]
pub struct Resolution {
    pub api_mode: ApiMode,
    pub platform: String,
    /// Name of the preset whose tables were loaded
    pub preset: Option<String>,
    pub models: ModelLists,
    pub pricing: PricingTable,
    pub base_url: String,
    pub api_key_env_var: String,
    /// False for endpoints that cannot continue from a stored response
    pub server_state: bool,
}

impl Resolution {
    pub fn is_reasoning_model(&self, model: &str) -> bool {
        self.models.is_reasoning(model)
    }
}

/// Combines config, environment and catalog into a [`Resolution`].
#[derive(Debug, Clone)]
pub struct Resolver {
    catalog: Arc<PlatformCatalog>,
    env: EnvSnapshot,
}

impl Resolver {
    pub fn new(catalog: Arc<PlatformCatalog>, env: EnvSnapshot) -> Self {
        Self { catalog, env }
    }

    pub fn catalog(&self) -> &PlatformCatalog {
        &self.catalog
    }

    pub fn env(&self) -> &EnvSnapshot {
        &self.env
    }

    pub fn api_mode(&self, config: &Config) -> ApiMode {
        resolve_api_mode(config, &self.env, &self.catalog)
    }

    pub fn resolve(&self, config: &Config) -> Resolution {
        let platform = resolve_platform_name(config);
        let preset_name = preset_for_loading(config);
        let preset = preset_name.as_deref().and_then(|name| self.catalog.get(name));

        let mut models = preset.map(|p| p.models.clone()).unwrap_or_default();
        let mut pricing = preset.map(|p| p.pricing.clone()).unwrap_or_default();

        if let Some(openai) = &config.openai {
            if let Some(custom) = &openai.models {
                models.reasoning = custom.reasoning.clone();
                models.non_reasoning = custom.non_reasoning.clone();
            }
            if let Some(custom) = &openai.pricing {
                pricing = pricing.merged_with(custom);
            }
        }

        if models.non_reasoning.is_empty() && !models.reasoning.is_empty() && !pricing.is_empty() {
            let mut inferred: Vec<String> = pricing
                .models()
                .filter(|m| !models.reasoning.iter().any(|r| r == m))
                .map(str::to_string)
                .collect();
            inferred.sort();
            models.non_reasoning = inferred;
        }

        Resolution {
            api_mode: self.api_mode(config),
            base_url: self.base_url(config, &platform),
            api_key_env_var: self.api_key_env_var(config, &platform),
            server_state: self.catalog.get(&platform).map_or(true, |p| p.server_state),
            platform,
            preset: preset.map(|p| p.name.to_string()),
            models,
            pricing,
        }
    }

    fn base_url(&self, config: &Config, platform: &str) -> String {
        if let Some(base) = &self.env.api_base {
            return base.clone();
        }
        if let Some(openai) = &config.openai {
            if !openai.base_url.is_empty() {
                return openai.base_url.clone();
            }
        }
        self.catalog
            .get(platform)
            .map(|p| p.base_url.to_string())
            .unwrap_or_default()
    }

    fn api_key_env_var(&self, config: &Config, platform: &str) -> String {
        if let Some(openai) = &config.openai {
            if !openai.api_key_env_var.is_empty() {
                return openai.api_key_env_var.clone();
            }
        }
        self.catalog
            .get(platform)
            .map(|p| p.api_key_env_var.to_string())
            .unwrap_or_else(|| DEFAULT_API_KEY_ENV_VAR.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CustomModels, OpenAiConfig};
    use crate::pricing::ModelPricing;
    use std::collections::HashMap;

    fn config(openai: OpenAiConfig) -> Config {
        Config {
            openai: Some(openai),
            ..Config::default()
        }
    }

    fn resolver(env: EnvSnapshot) -> Resolver {
        Resolver::new(Arc::new(PlatformCatalog::builtin()), env)
    }

    #[test]
    fn test_parse_synonyms() {
        assert_eq!(ApiMode::parse("chat"), Some(ApiMode::ChatCompletions));
        assert_eq!(ApiMode::parse(" Chat-Completions "), Some(ApiMode::ChatCompletions));
        assert_eq!(ApiMode::parse("RESPONSE"), Some(ApiMode::Responses));
        assert_eq!(ApiMode::parse("responses_api"), Some(ApiMode::Responses));
        assert_eq!(ApiMode::parse("grpc"), None);
    }

    #[test]
    fn test_api_mode_serde_names() {
        assert_eq!(serde_json::to_string(&ApiMode::Responses).unwrap(), "\"responses\"");
        let mode: ApiMode = serde_json::from_str("\"chat_completions\"").unwrap();
        assert_eq!(mode, ApiMode::ChatCompletions);
    }

    #[test]
    fn test_default_is_chat() {
        let r = resolver(EnvSnapshot::default());
        assert_eq!(r.api_mode(&Config::default()), ApiMode::ChatCompletions);
    }

    #[test]
    fn test_codex_forces_streaming_over_everything() {
        let env = EnvSnapshot {
            api_mode: Some("chat".to_string()),
            use_responses_api: Some("false".to_string()),
            api_base: None,
        };
        let cfg = config(OpenAiConfig {
            platform: "Codex".to_string(),
            api_mode: "chat".to_string(),
            ..Default::default()
        });
        assert_eq!(resolver(env).api_mode(&cfg), ApiMode::Responses);
    }

    #[test]
    fn test_env_mode_beats_legacy_env_and_config() {
        let env = EnvSnapshot {
            api_mode: Some("responses".to_string()),
            use_responses_api: Some("false".to_string()),
            api_base: None,
        };
        let cfg = config(OpenAiConfig {
            api_mode: "chat".to_string(),
            ..Default::default()
        });
        assert_eq!(resolver(env).api_mode(&cfg), ApiMode::Responses);
    }

    #[test]
    fn test_unrecognized_env_mode_is_ignored() {
        let env = EnvSnapshot {
            api_mode: Some("carrier-pigeon".to_string()),
            ..Default::default()
        };
        let cfg = config(OpenAiConfig {
            api_mode: "responses".to_string(),
            ..Default::default()
        });
        assert_eq!(resolver(env).api_mode(&cfg), ApiMode::Responses);
    }

    #[test]
    fn test_legacy_env_boolean() {
        for (raw, expected) in [
            ("TRUE", ApiMode::Responses),
            ("1", ApiMode::Responses),
            ("yes", ApiMode::ChatCompletions),
        ] {
            let env = EnvSnapshot {
                use_responses_api: Some(raw.to_string()),
                ..Default::default()
            };
            let cfg = config(OpenAiConfig {
                api_mode: "responses".to_string(),
                ..Default::default()
            });
            assert_eq!(resolver(env).api_mode(&cfg), expected, "value {raw}");
        }
    }

    #[test]
    fn test_config_levels_in_order() {
        let r = resolver(EnvSnapshot::default());
        let cfg = config(OpenAiConfig {
            api_mode: "chat".to_string(),
            responses_api: Some(true),
            use_responses_api: true,
            ..Default::default()
        });
        assert_eq!(r.api_mode(&cfg), ApiMode::ChatCompletions);

        let cfg = config(OpenAiConfig {
            responses_api: Some(false),
            use_responses_api: true,
            ..Default::default()
        });
        assert_eq!(r.api_mode(&cfg), ApiMode::ChatCompletions);

        let cfg = config(OpenAiConfig {
            use_responses_api: true,
            ..Default::default()
        });
        assert_eq!(r.api_mode(&cfg), ApiMode::Responses);
    }

    #[test]
    fn test_platform_name_resolution() {
        assert_eq!(resolve_platform_name(&Config::default()), "openai");
        let cfg = config(OpenAiConfig {
            preset: " XAI".to_string(),
            ..Default::default()
        });
        assert_eq!(resolve_platform_name(&cfg), "xai");
    }

    #[test]
    fn test_resolve_loads_preset_defaults() {
        let res = resolver(EnvSnapshot::default()).resolve(&config(OpenAiConfig {
            platform: "xai".to_string(),
            ..Default::default()
        }));
        assert_eq!(res.base_url, "https://api.x.ai/v1");
        assert_eq!(res.api_key_env_var, "XAI_API_KEY");
        assert!(res.is_reasoning_model("grok-3-mini"));
        assert_eq!(res.preset.as_deref(), Some("xai"));
    }

    #[test]
    fn test_base_url_precedence() {
        let env = EnvSnapshot {
            api_base: Some("http://localhost:8080/v1".to_string()),
            ..Default::default()
        };
        let cfg = config(OpenAiConfig {
            base_url: "https://proxy.example.com/v1".to_string(),
            ..Default::default()
        });
        assert_eq!(resolver(env).resolve(&cfg).base_url, "http://localhost:8080/v1");
        assert_eq!(
            resolver(EnvSnapshot::default()).resolve(&cfg).base_url,
            "https://proxy.example.com/v1"
        );
    }

    #[test]
    fn test_custom_pricing_skips_default_preset() {
        let mut pricing = HashMap::new();
        pricing.insert("local-r1".to_string(), ModelPricing::new(0.0, 0.0, 0.0, 32_000));
        pricing.insert("local-chat".to_string(), ModelPricing::new(0.0, 0.0, 0.0, 32_000));
        let cfg = config(OpenAiConfig {
            models: Some(CustomModels {
                reasoning: vec!["local-r1".to_string()],
                non_reasoning: vec![],
            }),
            pricing: Some(pricing),
            ..Default::default()
        });
        let res = resolver(EnvSnapshot::default()).resolve(&cfg);
        assert!(res.preset.is_none());
        assert_eq!(res.pricing.len(), 2);
        assert_eq!(res.models.non_reasoning, vec!["local-chat".to_string()]);
        assert_eq!(res.api_key_env_var, "OPENAI_API_KEY");
    }
}
