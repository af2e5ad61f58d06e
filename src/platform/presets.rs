//! Built-in platform presets.
//!
//! Immutable data, built once by [`PlatformCatalog::builtin`] and shared behind
//! an `Arc`. Nothing here is global; callers inject the catalog they want.

use std::collections::BTreeMap;

use super::ApiMode;
use crate::pricing::{ModelPricing, PricingTable};

/// Model names split by whether they accept reasoning parameters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModelLists {
    pub reasoning: Vec<String>,
    pub non_reasoning: Vec<String>,
}

impl ModelLists {
    fn from_slices(reasoning: &[&str], non_reasoning: &[&str]) -> Self {
        Self {
            reasoning: reasoning.iter().map(|s| s.to_string()).collect(),
            non_reasoning: non_reasoning.iter().map(|s| s.to_string()).collect(),
        }
    }

    pub fn is_reasoning(&self, model: &str) -> bool {
        self.reasoning.iter().any(|m| m.eq_ignore_ascii_case(model))
    }
}

/// One named platform.
#[derive(Debug, Clone)]
pub struct Preset {
    pub name: &'static str,
    pub base_url: &'static str,
    pub api_key_env_var: &'static str,
    pub default_model: Option<&'static str>,
    /// Protocol the platform is bound to, if any.
    pub forced_api_mode: Option<ApiMode>,
    /// Whether the endpoint keeps responses server-side for continuation
    pub server_state: bool,
    pub models: ModelLists,
    pub pricing: PricingTable,
}

/// Registry of presets keyed by lowercase name.
#[derive(Debug, Clone, Default)]
pub struct PlatformCatalog {
    presets: BTreeMap<&'static str, Preset>,
}

impl PlatformCatalog {
    /// Catalog with the `openai`, `xai` and `codex` presets.
    pub fn builtin() -> Self {
        let mut catalog = Self::default();
        catalog.insert(openai());
        catalog.insert(xai());
        catalog.insert(codex());
        catalog
    }

    pub fn insert(&mut self, preset: Preset) {
        self.presets.insert(preset.name, preset);
    }

    pub fn get(&self, name: &str) -> Option<&Preset> {
        self.presets.get(name)
    }

    /// Sorted preset names, used in validation messages.
    pub fn names(&self) -> Vec<&'static str> {
        self.presets.keys().copied().collect()
    }
}

fn table(entries: &[(&str, ModelPricing)]) -> PricingTable {
    entries
        .iter()
        .map(|(name, pricing)| (name.to_string(), *pricing))
        .collect()
}

fn openai() -> Preset {
    let p = ModelPricing::new;
    Preset {
        name: "openai",
        base_url: "https://api.openai.com/v1",
        api_key_env_var: "OPENAI_API_KEY",
        default_model: None,
        forced_api_mode: None,
        server_state: true,
        models: ModelLists::from_slices(
            &[
                "o1",
                "o1-pro",
                "o1-mini",
                "o3",
                "o3-pro",
                "o3-mini",
                "o3-deep-research",
                "o4-mini",
                "o4-mini-deep-research",
            ],
            &[
                "gpt-4.1",
                "gpt-4.1-mini",
                "gpt-4.1-nano",
                "gpt-4.5-preview",
                "gpt-4o",
                "gpt-4o-mini",
                "gpt-4o-audio-preview",
                "gpt-4o-realtime-preview",
                "gpt-4o-mini-audio-preview",
                "gpt-4o-mini-realtime-preview",
                "gpt-4o-mini-search-preview",
                "gpt-4o-search-preview",
                "computer-use-preview",
                "gpt-image-1",
                "codex-mini-latest",
            ],
        ),
        pricing: table(&[
            ("gpt-4.1", p(0.000002, 0.0000005, 0.000008, 1_047_576)),
            ("gpt-4.1-mini", p(0.0000004, 0.0000001, 0.0000016, 1_047_576)),
            ("gpt-4.1-nano", p(0.0000001, 0.000000025, 0.0000004, 1_047_576)),
            ("gpt-4.5-preview", p(0.000075, 0.0000375, 0.00015, 128_000)),
            ("gpt-4o", p(0.0000025, 0.00000125, 0.00001, 128_000)),
            ("gpt-4o-audio-preview", p(0.0000025, 0.0, 0.00001, 128_000)),
            ("gpt-4o-realtime-preview", p(0.000005, 0.0000025, 0.00002, 128_000)),
            ("gpt-4o-mini", p(0.00000015, 0.000000075, 0.0000006, 128_000)),
            ("gpt-4o-mini-audio-preview", p(0.00000015, 0.0, 0.0000006, 128_000)),
            ("gpt-4o-mini-realtime-preview", p(0.0000006, 0.0000003, 0.0000024, 128_000)),
            ("gpt-4o-mini-search-preview", p(0.00000015, 0.0, 0.0000006, 128_000)),
            ("gpt-4o-search-preview", p(0.0000025, 0.0, 0.00001, 128_000)),
            ("computer-use-preview", p(0.000003, 0.0, 0.000012, 128_000)),
            ("o1", p(0.000015, 0.0000075, 0.00006, 128_000)),
            ("o1-pro", p(0.00015, 0.0, 0.0006, 128_000)),
            ("o1-mini", p(0.0000011, 0.00000055, 0.0000044, 128_000)),
            ("o3", p(0.000002, 0.0000005, 0.000008, 200_000)),
            ("o3-pro", p(0.00002, 0.0, 0.00008, 200_000)),
            ("o3-mini", p(0.0000011, 0.00000055, 0.0000044, 200_000)),
            ("o4-mini", p(0.0000011, 0.000000275, 0.0000044, 200_000)),
            ("codex-mini-latest", p(0.0000015, 0.000000375, 0.000006, 200_000)),
        ]),
    }
}

fn xai() -> Preset {
    let p = ModelPricing::new;
    Preset {
        name: "xai",
        base_url: "https://api.x.ai/v1",
        api_key_env_var: "XAI_API_KEY",
        default_model: None,
        forced_api_mode: None,
        server_state: true,
        models: ModelLists::from_slices(
            &["grok-code-fast-1", "grok-4-0709", "grok-3-mini"],
            &["grok-3", "grok-2-image-1212"],
        ),
        pricing: table(&[
            ("grok-code-fast-1", p(0.0000002, 0.0, 0.0000015, 256_000)),
            ("grok-4-0709", p(0.000003, 0.0, 0.000015, 256_000)),
            ("grok-3", p(0.000003, 0.0, 0.000015, 131_072)),
            ("grok-3-mini", p(0.0000003, 0.0, 0.0000005, 131_072)),
            ("grok-2-image-1212", p(0.0, 0.0, 0.00007, 32_768)),
        ]),
    }
}

fn codex() -> Preset {
    // Subscription billing: every model is zero-cost.
    let free = ModelPricing::new(0.0, 0.0, 0.0, 272_000);
    Preset {
        name: "codex",
        base_url: "https://chatgpt.com/backend-api/codex",
        api_key_env_var: "OPENAI_API_KEY",
        default_model: Some("gpt-5.1-codex-max"),
        forced_api_mode: Some(ApiMode::Responses),
        server_state: false,
        models: ModelLists::from_slices(
            &["gpt-5.2-codex", "gpt-5.2", "gpt-5.1-codex-max", "gpt-5.1-codex-mini"],
            &[],
        ),
        pricing: table(&[
            ("gpt-5.2-codex", free),
            ("gpt-5.2", free),
            ("gpt-5.1-codex-max", free),
            ("gpt-5.1-codex-mini", free),
        ]),
    }
}
