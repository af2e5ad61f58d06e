//! Per-model pricing and context-window lookup.
//!
//! Resolution is permissive: an exact name match wins, then the
//! longest known family name found in the requested model on segment
//! boundaries (`-`, `/`, `:`, `_`, `@`), then a fixed default entry. An unknown model never fails a call; its cost is an
//! approximation based on the default entry.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Per-token prices in dollars plus the model's context window.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ModelPricing {
    #[serde(default)]
    pub input: f64,
    #[serde(default)]
    pub cached_input: f64,
    #[serde(default)]
    pub output: f64,
    #[serde(default)]
    pub context_window: i64,
}

impl ModelPricing {
    pub const fn new(input: f64, cached_input: f64, output: f64, context_window: i64) -> Self {
        Self {
            input,
            cached_input,
            output,
            context_window,
        }
    }
}

/// Pricing used when nothing in the table matches (GPT-4.1 rates).
pub const DEFAULT_PRICING: ModelPricing = ModelPricing::new(0.000002, 0.0000005, 0.000008, 1_047_576);

/// How a pricing lookup was satisfied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PricingMatch {
    Exact,
    Family(String),
    Default,
}

/// Immutable model → pricing table.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PricingTable {
    entries: HashMap<String, ModelPricing>,
    /// Family keys ordered most-specific first.
    families: Vec<String>,
}

impl PricingTable {
    pub fn new(entries: HashMap<String, ModelPricing>) -> Self {
        let mut families: Vec<String> = entries.keys().map(|k| k.to_lowercase()).collect();
        families.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));
        families.dedup();
        Self { entries, families }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn models(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(|k| k.as_str())
    }

    /// Exact lookup only.
    pub fn get(&self, model: &str) -> Option<&ModelPricing> {
        self.entries.get(model)
    }

    /// Overlay another table on top of this one; entries in `other` win.
    pub fn merged_with(&self, other: &HashMap<String, ModelPricing>) -> Self {
        let mut entries = self.entries.clone();
        for (model, pricing) in other {
            entries.insert(model.clone(), *pricing);
        }
        Self::new(entries)
    }

    /// Resolve pricing for a model, never failing.
    pub fn resolve(&self, model: &str) -> ModelPricing {
        self.resolve_with_match(model).0
    }

    /// Resolve pricing and report how the match was made.
    pub fn resolve_with_match(&self, model: &str) -> (ModelPricing, PricingMatch) {
        if let Some(pricing) = self.entries.get(model) {
            return (*pricing, PricingMatch::Exact);
        }

        let needle = model.to_lowercase();
        for family in &self.families {
            if contains_segment(&needle, family) {
                if let Some(pricing) = self.lookup_case_insensitive(family) {
                    return (pricing, PricingMatch::Family(family.clone()));
                }
            }
        }

        (DEFAULT_PRICING, PricingMatch::Default)
    }

    fn lookup_case_insensitive(&self, family: &str) -> Option<ModelPricing> {
        self.entries
            .iter()
            .find(|(k, _)| k.to_lowercase() == family)
            .map(|(_, v)| *v)
    }
}

fn is_separator(c: char) -> bool {
    matches!(c, '-' | '/' | ':' | '_' | '@')
}

/// Whether `family` occurs in `model` delimited by separators or the ends.
fn contains_segment(model: &str, family: &str) -> bool {
    model.match_indices(family).any(|(start, _)| {
        let end = start + family.len();
        let before = model[..start].chars().next_back().map_or(true, is_separator);
        let after = model[end..].chars().next().map_or(true, is_separator);
        before && after
    })
}

impl FromIterator<(String, ModelPricing)> for PricingTable {
    fn from_iter<I: IntoIterator<Item = (String, ModelPricing)>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> PricingTable {
        [
            ("gpt-4.1", ModelPricing::new(0.000002, 0.0000005, 0.000008, 1_047_576)),
            ("gpt-4.1-mini", ModelPricing::new(0.0000004, 0.0000001, 0.0000016, 1_047_576)),
            ("gpt-4o", ModelPricing::new(0.0000025, 0.00000125, 0.00001, 128_000)),
            ("gpt-4o-mini", ModelPricing::new(0.00000015, 0.000000075, 0.0000006, 128_000)),
            ("o3", ModelPricing::new(0.000002, 0.0000005, 0.000008, 200_000)),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect()
    }

    #[test]
    fn test_exact_match() {
        let (pricing, how) = table().resolve_with_match("gpt-4o");
        assert_eq!(how, PricingMatch::Exact);
        assert_eq!(pricing.context_window, 128_000);
    }

    #[test]
    fn test_family_match_preview_variant() {
        let t = table();
        assert_eq!(t.resolve("gpt-4.1-preview"), t.resolve("gpt-4.1"));
    }

    #[test]
    fn test_mini_variant_does_not_take_full_size_pricing() {
        let t = table();
        let (pricing, how) = t.resolve_with_match("gpt-4o-mini-2024-07-18");
        assert_eq!(how, PricingMatch::Family("gpt-4o-mini".to_string()));
        assert_eq!(pricing, *t.get("gpt-4o-mini").unwrap());

        let (_, how) = t.resolve_with_match("gpt-4.1-mini-preview");
        assert_eq!(how, PricingMatch::Family("gpt-4.1-mini".to_string()));
    }

    #[test]
    fn test_family_match_respects_segment_boundaries() {
        let t = table();
        assert_eq!(t.resolve_with_match("gpt-4o3-custom").1, PricingMatch::Default);
        assert_eq!(t.resolve_with_match("gpt-4.10").1, PricingMatch::Default);
        assert_eq!(
            t.resolve_with_match("openai/o3-2025-04-16").1,
            PricingMatch::Family("o3".to_string())
        );
    }

    #[test]
    fn test_unknown_model_uses_default() {
        let (pricing, how) = table().resolve_with_match("totally-unknown-model");
        assert_eq!(how, PricingMatch::Default);
        assert_eq!(pricing, DEFAULT_PRICING);
    }

    #[test]
    fn test_empty_table_uses_default() {
        assert_eq!(PricingTable::default().resolve("gpt-4.1"), DEFAULT_PRICING);
    }

    #[test]
    fn test_merged_with_overrides() {
        let mut custom = HashMap::new();
        custom.insert("gpt-4o".to_string(), ModelPricing::new(1.0, 0.5, 2.0, 10));
        let merged = table().merged_with(&custom);
        assert_eq!(merged.resolve("gpt-4o").input, 1.0);
        assert_eq!(merged.len(), table().len());
    }
}
