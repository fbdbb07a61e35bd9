//! Image processing in pure Rust via the `image` crate.
//!
//! | Operation | Crate / function |
//! |---|---|
//! | **Decode** | `image::load_from_memory` |
//! | **Filter chain** | W3C filter primitives over `Rgba32F`, parallel via `rayon` |
//! | **Encode** | PNG (lossless) or JPEG (quality 95) |
//! | **Recompress** | Lanczos3 fit to long edge + JPEG stepped down toward the byte budget |
//!
//! The module is split into:
//! - **Calculations**: Pure functions for dimension and color math (unit testable)
//! - **Parameters**: Data structures describing image operations
//! - **Backend**: [`ImageBackend`] trait + [`RustBackend`]
//! - **Operations**: [`render`] and [`recompress`], combining the above

pub mod backend;
mod calculations;
pub mod operations;
mod params;
pub mod rust_backend;

pub use backend::{CodecError, Dimensions, ImageBackend, PixelBuffer};
pub use calculations::{calculate_fit_dimensions, quality_steps};
pub use operations::{recompress, render, suggested_filename};
pub use params::{FilterOp, OutputFormat, Quality, RecompressParams};
pub use rust_backend::{RustBackend, identify};
