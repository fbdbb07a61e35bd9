//! High-level image operations.
//!
//! These functions combine the filter model and parameter types with backend
//! execution. They are the two entry points the rest of the crate uses:
//!
//! - [`recompress`]: the codec adapter behind upload budget negotiation.
//! - [`render`]: the compositor behind export and download.

use super::backend::{CodecError, ImageBackend};
use super::params::{OutputFormat, Quality, RecompressParams};
use crate::filter::FilterVector;
use chrono::{DateTime, Utc};

/// Result type for image operations.
pub type Result<T> = std::result::Result<T, CodecError>;

/// Re-encode `bytes` to fit `long_edge`, starting at `quality` (a `[0, 1]`
/// factor).
///
/// With `max_bytes` the backend steps the quality down toward that size;
/// whether the result actually fits is still the caller's decision. Backend
/// errors pass through unchanged.
pub fn recompress(
    backend: &(impl ImageBackend + ?Sized),
    bytes: &[u8],
    long_edge: u32,
    quality: f32,
    max_bytes: Option<u64>,
) -> Result<Vec<u8>> {
    if long_edge == 0 {
        return Err(CodecError::ProcessingFailed(
            "target long edge must be non-zero".to_string(),
        ));
    }
    let params = RecompressParams {
        long_edge,
        quality: Quality::from_factor(quality),
        max_bytes,
    };
    let out = backend.recompress(bytes, &params)?;
    tracing::debug!(
        input = bytes.len(),
        output = out.len(),
        long_edge,
        quality = params.quality.value(),
        ?max_bytes,
        "recompressed"
    );
    Ok(out)
}

/// Composite `filters` onto `source` and encode as `format`.
///
/// Decodes at natural dimensions, applies the nine primitives in field
/// order and encodes at the same dimensions.
pub fn render(
    backend: &(impl ImageBackend + ?Sized),
    source: &[u8],
    filters: &FilterVector,
    format: OutputFormat,
) -> Result<Vec<u8>> {
    let pixels = backend.decode(source)?;
    let (width, height) = pixels.dimensions();
    let filtered = backend.apply_filter_chain(pixels, &filters.ops())?;
    let out = backend.encode(&filtered, format)?;
    tracing::debug!(width, height, %format, bytes = out.len(), "rendered export");
    Ok(out)
}

/// Suggested download name: whitespace runs in `title` become `-`, followed
/// by the unix timestamp in milliseconds and the format's extension.
///
/// ```
/// # use retouch::imaging::{OutputFormat, suggested_filename};
/// let at = chrono::DateTime::from_timestamp_millis(1_700_000_000_000).unwrap();
/// assert_eq!(
///     suggested_filename("Golden  hour", OutputFormat::Jpeg, at),
///     "Golden-hour-1700000000000.jpg"
/// );
/// ```
pub fn suggested_filename(title: &str, format: OutputFormat, at: DateTime<Utc>) -> String {
    let stem = title.split_whitespace().collect::<Vec<_>>().join("-");
    let stem = if stem.is_empty() { "image" } else { &stem };
    format!(
        "{}-{}.{}",
        stem,
        at.timestamp_millis(),
        format.extension()
    )
}
