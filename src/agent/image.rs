//! Image inputs attached to user messages.
//!
//! A source is an HTTPS URL, a `data:` URL, a `file://` URL or a local path.
//! Local files are inlined as base64 data URLs so both protocols can carry
//! them in a single `image_url` field.

use std::path::Path;

use base64::{engine::general_purpose, Engine as _};
use tracing::warn;

use crate::error::Error;
use crate::Result;

/// Largest local image accepted, in bytes.
pub const MAX_IMAGE_FILE_SIZE: u64 = 5 * 1024 * 1024;

/// Images attached to one message; extra sources are ignored.
pub const MAX_IMAGE_COUNT: usize = 10;

fn mime_type(path: &Path) -> Result<&'static str> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_lowercase)
        .unwrap_or_default();
    match ext.as_str() {
        "jpg" | "jpeg" => Ok("image/jpeg"),
        "png" => Ok("image/png"),
        "gif" => Ok("image/gif"),
        "webp" => Ok("image/webp"),
        _ => Err(Error::Image(format!(
            "unsupported image format: .{} (supported: .jpg, .jpeg, .png, .gif, .webp)",
            ext
        ))),
    }
}

/// URL the provider can fetch or decode for `source`.
pub async fn image_url(source: &str) -> Result<String> {
    if source.starts_with("https://") || source.starts_with("data:") {
        return Ok(source.to_string());
    }
    if source.starts_with("http://") {
        return Err(Error::Image(format!("only HTTPS URLs are supported: {}", source)));
    }

    let path = Path::new(source.strip_prefix("file://").unwrap_or(source));
    let mime = mime_type(path)?;

    let metadata = tokio::fs::metadata(path)
        .await
        .map_err(|e| Error::Image(format!("image file not found: {}: {}", path.display(), e)))?;
    if metadata.len() > MAX_IMAGE_FILE_SIZE {
        return Err(Error::Image(format!(
            "image file too large: {} bytes (max: {} bytes)",
            metadata.len(),
            MAX_IMAGE_FILE_SIZE
        )));
    }

    let data = tokio::fs::read(path).await?;
    Ok(format!("data:{};base64,{}", mime, general_purpose::STANDARD.encode(data)))
}

/// Resolve every usable source, skipping the ones that fail.
pub async fn image_urls(sources: &[String]) -> Vec<String> {
    if sources.len() > MAX_IMAGE_COUNT {
        warn!(
            count = sources.len(),
            max = MAX_IMAGE_COUNT,
            "Too many images, only the first ones are sent"
        );
    }

    let mut urls = Vec::new();
    for source in sources.iter().take(MAX_IMAGE_COUNT) {
        match image_url(source).await {
            Ok(url) => urls.push(url),
            Err(e) => warn!(image = %source, error = %e, "Skipping image"),
        }
    }
    urls
}
