//! Protocol detection for stored records.
//!
//! Newer records name their protocol under [`API_MODE_KEY`] in the metadata.
//! Older ones carry no discriminator: records tagged with
//! [`RESPONSES_PROVIDER`] are streaming logs, and anything else is guessed
//! from the shape of the first logged entry.

use serde_json::{Map, Value};
use tracing::debug;

use crate::agent::is_streaming_kind;
use crate::platform::ApiMode;

/// Provider tag of records written by this client.
pub const PROVIDER: &str = "openai";

/// Provider tag older streaming threads wrote instead of [`PROVIDER`].
pub const RESPONSES_PROVIDER: &str = "openai-responses";

/// Provider tags whose records this client can load.
pub const ACCEPTED_PROVIDERS: &[&str] = &[PROVIDER, RESPONSES_PROVIDER];

/// Metadata key holding the protocol discriminator.
pub const API_MODE_KEY: &str = "api_mode";

/// Metadata key holding the model name.
pub const MODEL_KEY: &str = "model";

/// Metadata key holding the streaming continuation token.
pub const LAST_RESPONSE_ID_KEY: &str = "last_response_id";

/// Protocol of a record, or `None` when neither the metadata, the provider
/// tag nor the log shape identifies one.
pub fn detect_api_mode_strict(
    provider: &str,
    metadata: &Map<String, Value>,
    raw_messages: &Value,
) -> Option<ApiMode> {
    if let Some(mode) = metadata
        .get(API_MODE_KEY)
        .and_then(Value::as_str)
        .and_then(ApiMode::parse)
    {
        return Some(mode);
    }
    if provider == RESPONSES_PROVIDER {
        return Some(ApiMode::Responses);
    }

    let first = raw_messages.as_array()?.first()?.as_object()?;
    let kind = first.get("type").and_then(Value::as_str);

    match kind {
        Some(kind) if is_streaming_kind(kind) => Some(ApiMode::Responses),
        Some("input") | Some("output") if first.contains_key("item") => Some(ApiMode::Responses),
        _ if first.contains_key("role") => Some(ApiMode::ChatCompletions),
        _ => None,
    }
}

/// Protocol of a record, defaulting to chat completions when undetectable.
pub fn detect_api_mode(provider: &str, metadata: &Map<String, Value>, raw_messages: &Value) -> ApiMode {
    detect_api_mode_strict(provider, metadata, raw_messages).unwrap_or_else(|| {
        debug!("Record protocol not detectable, assuming chat completions");
        ApiMode::ChatCompletions
    })
}
