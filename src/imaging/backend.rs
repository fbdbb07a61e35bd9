//! Image processing backend trait and shared types.
//!
//! The [`ImageBackend`] trait defines the four operations every backend must
//! support:
//!
//! | Operation | Used by |
//! |---|---|
//! | `decode` | compositor: bytes to a float RGBA pixel buffer at natural size |
//! | `apply_filter_chain` | compositor: ordered [`FilterOp`]s over the buffer |
//! | `encode` | compositor: PNG or JPEG at the buffer's own dimensions |
//! | `recompress` | codec adapter: resize + lossy re-encode for the upload budget |
//!
//! The production implementation is
//! [`RustBackend`](super::rust_backend::RustBackend), pure Rust via the
//! `image` crate. A GPU or remote rendering service would implement the same
//! trait without changing the callers.

use super::params::{FilterOp, OutputFormat, RecompressParams};
use image::Rgba32FImage;
use thiserror::Error;

/// Decoded pixels: straight (non-premultiplied) RGBA, channels in `[0, 1]`.
pub type PixelBuffer = Rgba32FImage;

#[derive(Error, Debug)]
pub enum CodecError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Unsupported image format: {0}")]
    UnsupportedFormat(String),
    #[error("Failed to decode image: {0}")]
    Decode(String),
    #[error("Failed to encode image: {0}")]
    Encode(String),
    #[error("Processing failed: {0}")]
    ProcessingFailed(String),
}

/// Pixel dimensions of an image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dimensions {
    pub width: u32,
    pub height: u32,
}

impl Dimensions {
    pub fn long_edge(self) -> u32 {
        self.width.max(self.height)
    }
}

/// Trait for image processing backends.
///
/// Every backend must implement all four operations so the rest of the
/// codebase is backend-agnostic. Implementations must be deterministic: the
/// same inputs produce the same bytes on the same backend.
pub trait ImageBackend: Sync {
    /// Decode encoded bytes at their natural dimensions.
    fn decode(&self, bytes: &[u8]) -> Result<PixelBuffer, CodecError>;

    /// Apply `ops` in order. Ops at their identity value must leave the
    /// buffer untouched.
    fn apply_filter_chain(
        &self,
        pixels: PixelBuffer,
        ops: &[FilterOp],
    ) -> Result<PixelBuffer, CodecError>;

    /// Encode without resizing.
    fn encode(&self, pixels: &PixelBuffer, format: OutputFormat) -> Result<Vec<u8>, CodecError>;

    /// Re-encode so the longest edge is at most `params.long_edge`, starting
    /// at `params.quality` and stepping down while the output is larger than
    /// `params.max_bytes`.
    fn recompress(&self, bytes: &[u8], params: &RecompressParams) -> Result<Vec<u8>, CodecError>;
}
