//! Parameter types for image operations.
//!
//! These structs describe *what* to do, not *how* to do it. They are the
//! interface between the high-level [`operations`](super::operations) module
//! (compositing and recompression entry points) and the
//! [`backend`](super::backend) (which does the actual pixel work). This
//! separation allows swapping backends (e.g. for testing with a mock) without
//! changing operation logic.
//!
//! ## Types
//!
//! - [`Quality`]: Lossy encoding quality (1–100). Clamped on construction.
//! - [`OutputFormat`]: Export encodings: PNG, or JPEG under either spelling.
//! - [`FilterOp`]: One normalized pixel primitive of the filter chain.
//! - [`RecompressParams`]: Target long edge, starting quality and byte budget
//!   for an upload recompression.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Quality setting for lossy image encoding (1-100).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Quality(pub u32);

impl Quality {
    pub fn new(value: u32) -> Self {
        Self(value.clamp(1, 100))
    }

    /// Build from a `[0, 1]` quality factor (0.8 → 80).
    pub fn from_factor(factor: f32) -> Self {
        if factor.is_nan() {
            return Self::default();
        }
        Self::new((factor.clamp(0.0, 1.0) * 100.0).round() as u32)
    }

    pub fn value(self) -> u32 {
        self.0
    }
}

impl Default for Quality {
    /// Export quality for JPEG downloads.
    fn default() -> Self {
        Self(95)
    }
}

/// Encoding used for exports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Lossless.
    Png,
    /// Lossy; `jpeg` and `jpg` are the same encoding.
    #[serde(alias = "jpg")]
    Jpeg,
}

impl OutputFormat {
    pub fn extension(self) -> &'static str {
        match self {
            OutputFormat::Png => "png",
            OutputFormat::Jpeg => "jpg",
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutputFormat::Png => f.write_str("png"),
            OutputFormat::Jpeg => f.write_str("jpeg"),
        }
    }
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "png" => Ok(OutputFormat::Png),
            "jpeg" | "jpg" => Ok(OutputFormat::Jpeg),
            other => Err(format!("unsupported output format: {other}")),
        }
    }
}

/// A single pixel primitive with its amount normalized for the math.
///
/// Percentages arrive as fractions (`1.0` = 100%), blur as a Gaussian sigma
/// in pixels and hue rotation in degrees.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FilterOp {
    Blur(f32),
    Brightness(f32),
    Contrast(f32),
    Grayscale(f32),
    HueRotate(f32),
    Saturate(f32),
    Sepia(f32),
    Invert(f32),
    Opacity(f32),
}

impl FilterOp {
    /// Whether this op leaves every pixel unchanged.
    pub fn is_identity(self) -> bool {
        match self {
            FilterOp::Blur(sigma) => sigma <= 0.0,
            FilterOp::Brightness(a)
            | FilterOp::Contrast(a)
            | FilterOp::Saturate(a)
            | FilterOp::Opacity(a) => a == 1.0,
            FilterOp::Grayscale(a) | FilterOp::Sepia(a) | FilterOp::Invert(a) => a <= 0.0,
            FilterOp::HueRotate(deg) => deg.rem_euclid(360.0) == 0.0,
        }
    }
}

/// Parameters for a budget recompression.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecompressParams {
    /// Maximum length of the longer pixel edge.
    pub long_edge: u32,
    /// Quality of the first attempt.
    pub quality: Quality,
    /// Output size to step the quality down toward. `None` encodes once.
    pub max_bytes: Option<u64>,
}
