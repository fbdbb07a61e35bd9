//! Pure Rust image processing backend.
//!
//! Everything is statically linked into the binary.
//!
//! ## Crate mapping
//!
//! | Operation | Crate / function |
//! |---|---|
//! | Decode (JPEG, PNG, WebP) | `image::load_from_memory` → `to_rgba32f` |
//! | Blur | `image::imageops::blur` on premultiplied RGBA |
//! | Color primitives | W3C matrices from [`calculations`](super::calculations), per pixel via `rayon` |
//! | Resize | `image::DynamicImage::resize_exact` with `Lanczos3` filter |
//! | Encode → PNG | `image::codecs::png::PngEncoder` |
//! | Encode → JPEG | `image::codecs::jpeg::JpegEncoder` (alpha flattened over black) |
//! | Recompress | Lanczos3 fit, then JPEG stepped down from the tier quality until it fits |

use super::backend::{CodecError, Dimensions, ImageBackend, PixelBuffer};
use super::calculations::{
    ColorMatrix, apply_matrix, calculate_fit_dimensions, contrast, grayscale_matrix,
    hue_rotate_matrix, invert, quality_steps, saturate_matrix, sepia_matrix,
};
use super::params::{FilterOp, OutputFormat, Quality, RecompressParams};
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::{CompressionType, PngEncoder};
use image::imageops::FilterType;
use image::{
    DynamicImage, ExtendedColorType, ImageEncoder, ImageError, ImageFormat, RgbImage, RgbaImage,
};
use rayon::prelude::*;

/// Pure Rust backend using the `image` crate ecosystem.
///
/// See the [module docs](self) for the crate-to-operation mapping.
pub struct RustBackend {
    jpeg_quality: Quality,
}

impl RustBackend {
    pub fn new() -> Self {
        Self {
            jpeg_quality: Quality::default(),
        }
    }

    /// Backend whose JPEG exports use `quality` instead of the default 95.
    pub fn with_jpeg_quality(quality: Quality) -> Self {
        Self {
            jpeg_quality: quality,
        }
    }
}

impl Default for RustBackend {
    fn default() -> Self {
        Self::new()
    }
}

fn map_decode_error(e: ImageError) -> CodecError {
    match e {
        ImageError::Unsupported(u) => CodecError::UnsupportedFormat(u.to_string()),
        ImageError::IoError(io) => CodecError::Io(io),
        other => CodecError::Decode(other.to_string()),
    }
}

fn load_image(bytes: &[u8]) -> Result<DynamicImage, CodecError> {
    image::load_from_memory(bytes).map_err(map_decode_error)
}

/// Dimensions of an encoded image without applying any filters.
pub fn identify(bytes: &[u8]) -> Result<Dimensions, CodecError> {
    let img = load_image(bytes)?;
    Ok(Dimensions {
        width: img.width(),
        height: img.height(),
    })
}

/// Run `f` over every RGBA pixel in parallel.
fn for_each_pixel<F>(pixels: &mut PixelBuffer, f: F)
where
    F: Fn(&mut [f32]) + Sync + Send,
{
    let samples: &mut [f32] = &mut **pixels;
    samples.par_chunks_exact_mut(4).for_each(f);
}

fn map_rgb<F>(pixels: &mut PixelBuffer, f: F)
where
    F: Fn(f32) -> f32 + Sync + Send,
{
    for_each_pixel(pixels, |px| {
        for c in &mut px[..3] {
            *c = f(*c).clamp(0.0, 1.0);
        }
    });
}

fn map_matrix(pixels: &mut PixelBuffer, m: ColorMatrix) {
    for_each_pixel(pixels, |px| {
        let out = apply_matrix(&m, [px[0], px[1], px[2]]);
        for (c, v) in px[..3].iter_mut().zip(out) {
            *c = v.clamp(0.0, 1.0);
        }
    });
}

/// Gaussian blur in premultiplied space so transparent pixels don't bleed color.
fn blur(mut pixels: PixelBuffer, sigma: f32) -> PixelBuffer {
    for_each_pixel(&mut pixels, |px| {
        let a = px[3];
        for c in &mut px[..3] {
            *c *= a;
        }
    });
    let mut blurred = image::imageops::blur(&pixels, sigma);
    for_each_pixel(&mut blurred, |px| {
        let a = px[3].clamp(0.0, 1.0);
        px[3] = a;
        for c in &mut px[..3] {
            *c = if a > 0.0 { (*c / a).clamp(0.0, 1.0) } else { 0.0 };
        }
    });
    blurred
}

#[inline]
fn quantize(v: f32) -> u8 {
    (v.clamp(0.0, 1.0) * 255.0).round() as u8
}

fn to_rgba8(pixels: &PixelBuffer) -> RgbaImage {
    RgbaImage::from_fn(pixels.width(), pixels.height(), |x, y| {
        let p = pixels.get_pixel(x, y).0;
        image::Rgba([quantize(p[0]), quantize(p[1]), quantize(p[2]), quantize(p[3])])
    })
}

/// Drop alpha by compositing over black, as canvas JPEG export does.
fn to_rgb8_over_black(pixels: &PixelBuffer) -> RgbImage {
    RgbImage::from_fn(pixels.width(), pixels.height(), |x, y| {
        let p = pixels.get_pixel(x, y).0;
        image::Rgb([
            quantize(p[0] * p[3]),
            quantize(p[1] * p[3]),
            quantize(p[2] * p[3]),
        ])
    })
}

fn write_png(img: &DynamicImage, compression: CompressionType) -> Result<Vec<u8>, CodecError> {
    let mut out = Vec::new();
    let encoder = PngEncoder::new_with_quality(
        &mut out,
        compression,
        image::codecs::png::FilterType::Adaptive,
    );
    img.write_with_encoder(encoder)
        .map_err(|e| CodecError::Encode(format!("PNG encode failed: {}", e)))?;
    Ok(out)
}

fn write_jpeg(img: &RgbImage, quality: Quality) -> Result<Vec<u8>, CodecError> {
    let mut out = Vec::new();
    JpegEncoder::new_with_quality(&mut out, quality.value() as u8)
        .write_image(img.as_raw(), img.width(), img.height(), ExtendedColorType::Rgb8)
        .map_err(|e| CodecError::Encode(format!("JPEG encode failed: {}", e)))?;
    Ok(out)
}

/// Encode as JPEG at `start`, then at each lower step until the output fits.
///
/// Returns the last encoding even when no step fits.
fn write_jpeg_within(
    img: &RgbImage,
    start: Quality,
    max_bytes: Option<u64>,
) -> Result<Vec<u8>, CodecError> {
    let mut out = Vec::new();
    for q in quality_steps(start.value()) {
        out = write_jpeg(img, Quality::new(q))?;
        if fits(&out, max_bytes) {
            break;
        }
        tracing::trace!(quality = q, size = out.len(), ?max_bytes, "over budget, stepping down");
    }
    Ok(out)
}

fn fits(out: &[u8], max_bytes: Option<u64>) -> bool {
    max_bytes.is_none_or(|max| out.len() as u64 <= max)
}

impl ImageBackend for RustBackend {
    fn decode(&self, bytes: &[u8]) -> Result<PixelBuffer, CodecError> {
        Ok(load_image(bytes)?.to_rgba32f())
    }

    fn apply_filter_chain(
        &self,
        mut pixels: PixelBuffer,
        ops: &[FilterOp],
    ) -> Result<PixelBuffer, CodecError> {
        for &op in ops.iter().filter(|op| !op.is_identity()) {
            match op {
                FilterOp::Blur(sigma) => pixels = blur(pixels, sigma),
                FilterOp::Brightness(a) => map_rgb(&mut pixels, |c| c * a),
                FilterOp::Contrast(a) => map_rgb(&mut pixels, |c| contrast(c, a)),
                FilterOp::Grayscale(a) => map_matrix(&mut pixels, grayscale_matrix(a)),
                FilterOp::HueRotate(deg) => map_matrix(&mut pixels, hue_rotate_matrix(deg)),
                FilterOp::Saturate(a) => map_matrix(&mut pixels, saturate_matrix(a)),
                FilterOp::Sepia(a) => map_matrix(&mut pixels, sepia_matrix(a)),
                FilterOp::Invert(a) => {
                    let a = a.clamp(0.0, 1.0);
                    map_rgb(&mut pixels, |c| invert(c, a))
                }
                FilterOp::Opacity(a) => {
                    let a = a.clamp(0.0, 1.0);
                    for_each_pixel(&mut pixels, |px| px[3] *= a)
                }
            }
        }
        Ok(pixels)
    }

    fn encode(&self, pixels: &PixelBuffer, format: OutputFormat) -> Result<Vec<u8>, CodecError> {
        match format {
            OutputFormat::Png => {
                let rgba = to_rgba8(pixels);
                let img = if rgba.pixels().all(|p| p.0[3] == u8::MAX) {
                    DynamicImage::ImageRgb8(DynamicImage::ImageRgba8(rgba).to_rgb8())
                } else {
                    DynamicImage::ImageRgba8(rgba)
                };
                write_png(&img, CompressionType::Default)
            }
            OutputFormat::Jpeg => write_jpeg(&to_rgb8_over_black(pixels), self.jpeg_quality),
        }
    }

    fn recompress(&self, bytes: &[u8], params: &RecompressParams) -> Result<Vec<u8>, CodecError> {
        let format = image::guess_format(bytes).map_err(map_decode_error)?;
        let img = load_image(bytes)?;

        let (w, h) = calculate_fit_dimensions((img.width(), img.height()), params.long_edge);
        let resized = if (w, h) == (img.width(), img.height()) {
            img
        } else {
            img.resize_exact(w, h, FilterType::Lanczos3)
        };

        if format == ImageFormat::Png {
            let lossless = write_png(&resized, CompressionType::Best)?;
            if lossless.len() < bytes.len() && fits(&lossless, params.max_bytes) {
                return Ok(lossless);
            }
            tracing::debug!(
                input = bytes.len(),
                lossless = lossless.len(),
                "lossless PNG does not shrink into budget, using JPEG"
            );
        }
        write_jpeg_within(&resized.to_rgb8(), params.quality, params.max_bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageEncoder, Rgba};

    /// Encode a synthetic gradient as PNG.
    fn test_png(width: u32, height: u32) -> Vec<u8> {
        let img = RgbaImage::from_fn(width, height, |x, y| {
            Rgba([(x % 256) as u8, (y % 256) as u8, 128, 255])
        });
        let mut out = Vec::new();
        PngEncoder::new(&mut out)
            .write_image(img.as_raw(), width, height, image::ExtendedColorType::Rgba8)
            .unwrap();
        out
    }

    /// Encode a synthetic gradient as JPEG.
    fn test_jpeg(width: u32, height: u32) -> Vec<u8> {
        let img = RgbImage::from_fn(width, height, |x, y| {
            image::Rgb([(x % 256) as u8, (y % 256) as u8, 128])
        });
        let mut out = Vec::new();
        JpegEncoder::new(&mut out)
            .write_image(img.as_raw(), width, height, image::ExtendedColorType::Rgb8)
            .unwrap();
        out
    }

    /// Deterministic xorshift noise, which no encoder can shrink much losslessly.
    fn noise() -> impl FnMut() -> u32 {
        let mut seed: u32 = 0x9e37_79b9;
        move || {
            seed ^= seed << 13;
            seed ^= seed >> 17;
            seed ^= seed << 5;
            seed
        }
    }

    fn noisy_png16(width: u32, height: u32) -> Vec<u8> {
        let mut next = noise();
        let img = image::ImageBuffer::<Rgba<u16>, Vec<u16>>::from_fn(width, height, |_, _| {
            let v = next();
            Rgba([v as u16, (v >> 16) as u16, next() as u16, u16::MAX])
        });
        let mut out = std::io::Cursor::new(Vec::new());
        DynamicImage::ImageRgba16(img)
            .write_to(&mut out, ImageFormat::Png)
            .unwrap();
        out.into_inner()
    }

    fn noisy_jpeg(width: u32, height: u32) -> Vec<u8> {
        let mut next = noise();
        let img = RgbImage::from_fn(width, height, |_, _| {
            let v = next();
            image::Rgb([v as u8, (v >> 8) as u8, (v >> 16) as u8])
        });
        write_jpeg(&img, Quality::new(100)).unwrap()
    }

    fn recompress_at(
        backend: &RustBackend,
        source: &[u8],
        quality: f32,
        max_bytes: Option<u64>,
    ) -> Vec<u8> {
        backend
            .recompress(
                source,
                &RecompressParams {
                    long_edge: 1024,
                    quality: Quality::from_factor(quality),
                    max_bytes,
                },
            )
            .unwrap()
    }

    fn render(
        backend: &RustBackend,
        bytes: &[u8],
        ops: &[FilterOp],
        format: OutputFormat,
    ) -> Vec<u8> {
        let pixels = backend.decode(bytes).unwrap();
        let filtered = backend.apply_filter_chain(pixels, ops).unwrap();
        backend.encode(&filtered, format).unwrap()
    }

    #[test]
    fn decode_keeps_natural_dimensions() {
        let backend = RustBackend::new();
        let pixels = backend.decode(&test_png(120, 80)).unwrap();
        assert_eq!(pixels.dimensions(), (120, 80));
    }

    #[test]
    fn decode_garbage_errors() {
        let backend = RustBackend::new();
        assert!(backend.decode(b"definitely not an image").is_err());
    }

    #[test]
    fn identity_chain_is_pixel_exact() {
        let backend = RustBackend::new();
        let source = test_png(64, 48);
        let identity_ops = crate::filter::FilterVector::identity().ops();

        let out = render(&backend, &source, &identity_ops, OutputFormat::Png);

        let original = image::load_from_memory(&source).unwrap().to_rgba8();
        let rendered = image::load_from_memory(&out).unwrap().to_rgba8();
        assert_eq!(original, rendered);
    }

    #[test]
    fn brightness_scales_channels() {
        let backend = RustBackend::new();
        let source = test_png(4, 4);
        let out = render(&backend, &source, &[FilterOp::Brightness(0.5)], OutputFormat::Png);

        let original = image::load_from_memory(&source).unwrap().to_rgba8();
        let rendered = image::load_from_memory(&out).unwrap().to_rgba8();
        let (o, r) = (original.get_pixel(2, 2).0, rendered.get_pixel(2, 2).0);
        assert_eq!(o[0], 2);
        assert_eq!(r[0], 1);
        assert_eq!(r[2], 64); // 128 * 0.5
        assert_eq!(r[3], 255);
    }

    #[test]
    fn full_invert_flips_channels() {
        let backend = RustBackend::new();
        let out = render(&backend, &test_png(4, 4), &[FilterOp::Invert(1.0)], OutputFormat::Png);
        let rendered = image::load_from_memory(&out).unwrap().to_rgba8();
        assert_eq!(rendered.get_pixel(0, 0).0, [255, 255, 127, 255]);
    }

    #[test]
    fn opacity_produces_alpha_png() {
        let backend = RustBackend::new();
        let out = render(&backend, &test_png(4, 4), &[FilterOp::Opacity(0.5)], OutputFormat::Png);
        let rendered = image::load_from_memory(&out).unwrap();
        assert!(rendered.color().has_alpha());
        assert_eq!(rendered.to_rgba8().get_pixel(1, 1).0[3], 128);
    }

    #[test]
    fn export_never_resizes() {
        let backend = RustBackend::new();
        let ops = [FilterOp::Blur(2.0), FilterOp::Sepia(0.7)];
        for format in [OutputFormat::Png, OutputFormat::Jpeg] {
            let out = render(&backend, &test_jpeg(300, 200), &ops, format);
            assert_eq!(identify(&out).unwrap(), Dimensions { width: 300, height: 200 });
        }
    }

    #[test]
    fn render_is_byte_reproducible() {
        let backend = RustBackend::new();
        let source = test_jpeg(90, 60);
        let ops = crate::filter::FilterVector {
            blur: 1.5,
            hue_rotate: 45.0,
            ..crate::filter::FilterVector::identity()
        }
        .ops();
        for format in [OutputFormat::Png, OutputFormat::Jpeg] {
            assert_eq!(
                render(&backend, &source, &ops, format),
                render(&backend, &source, &ops, format)
            );
        }
    }

    #[test]
    fn jpeg_export_is_jpeg() {
        let backend = RustBackend::new();
        let out = render(&backend, &test_png(10, 10), &[], OutputFormat::Jpeg);
        assert_eq!(image::guess_format(&out).unwrap(), ImageFormat::Jpeg);
    }

    #[test]
    fn recompress_respects_long_edge() {
        let backend = RustBackend::new();
        let out = backend
            .recompress(
                &test_jpeg(400, 300),
                &RecompressParams {
                    long_edge: 100,
                    quality: Quality::from_factor(0.4),
                    max_bytes: None,
                },
            )
            .unwrap();
        assert_eq!(identify(&out).unwrap(), Dimensions { width: 100, height: 75 });
        assert_eq!(image::guess_format(&out).unwrap(), ImageFormat::Jpeg);
    }

    #[test]
    fn recompress_small_image_keeps_dimensions() {
        let backend = RustBackend::new();
        let out = backend
            .recompress(
                &test_jpeg(64, 32),
                &RecompressParams {
                    long_edge: 1920,
                    quality: Quality::from_factor(0.8),
                    max_bytes: None,
                },
            )
            .unwrap();
        assert_eq!(identify(&out).unwrap(), Dimensions { width: 64, height: 32 });
    }

    #[test]
    fn recompress_png_stays_png() {
        let backend = RustBackend::new();
        let out = backend
            .recompress(
                &test_png(200, 400),
                &RecompressParams {
                    long_edge: 100,
                    quality: Quality::from_factor(0.6),
                    max_bytes: None,
                },
            )
            .unwrap();
        assert_eq!(image::guess_format(&out).unwrap(), ImageFormat::Png);
        assert_eq!(identify(&out).unwrap(), Dimensions { width: 50, height: 100 });
    }

    #[test]
    fn recompress_corrupt_input_errors() {
        let backend = RustBackend::new();
        let mut bytes = test_jpeg(32, 32);
        bytes.truncate(40);
        let result = backend.recompress(
            &bytes,
            &RecompressParams {
                long_edge: 16,
                quality: Quality::default(),
                max_bytes: None,
            },
        );
        assert!(result.is_err());
    }

    #[test]
    fn lower_quality_yields_smaller_jpeg() {
        let backend = RustBackend::new();
        let source = test_jpeg(256, 256);
        let size_at = |q: f32| {
            backend
                .recompress(
                    &source,
                    &RecompressParams {
                        long_edge: 256,
                        quality: Quality::from_factor(q),
                        max_bytes: None,
                    },
                )
                .unwrap()
                .len()
        };
        assert!(size_at(0.4) < size_at(0.8));
    }

    #[test]
    fn png_tiers_apply_their_quality() {
        let backend = RustBackend::new();
        let source = noisy_png16(256, 256);
        let budget = Some(source.len() as u64 / 2);

        let sizes: Vec<usize> = [0.8, 0.6, 0.4]
            .into_iter()
            .map(|q| {
                let out = recompress_at(&backend, &source, q, budget);
                assert_eq!(image::guess_format(&out).unwrap(), ImageFormat::Jpeg);
                assert_eq!(identify(&out).unwrap(), Dimensions { width: 256, height: 256 });
                out.len()
            })
            .collect();

        assert!(sizes[0] < source.len() / 2);
        assert!(sizes[0] > sizes[1]);
        assert!(sizes[1] > sizes[2]);
    }

    #[test]
    fn png_that_shrinks_into_budget_stays_lossless() {
        let backend = RustBackend::new();
        let source = test_png(200, 400);
        let out = backend
            .recompress(
                &source,
                &RecompressParams {
                    long_edge: 100,
                    quality: Quality::from_factor(0.4),
                    max_bytes: Some(source.len() as u64),
                },
            )
            .unwrap();
        assert_eq!(image::guess_format(&out).unwrap(), ImageFormat::Png);
    }

    #[test]
    fn quality_steps_down_until_it_fits() {
        let backend = RustBackend::new();
        let source = noisy_jpeg(256, 256);
        let at_40 = recompress_at(&backend, &source, 0.4, None);
        let at_30 = recompress_at(&backend, &source, 0.3, None);
        assert!(at_30.len() < at_40.len());

        let budget = at_40.len() as u64 - 1;
        let stepped = recompress_at(&backend, &source, 0.4, Some(budget));
        assert!(stepped.len() as u64 <= budget);
        assert_eq!(stepped, at_30);
    }

    #[test]
    fn unreachable_budget_returns_lowest_step() {
        let backend = RustBackend::new();
        let source = noisy_jpeg(128, 128);
        let stepped = recompress_at(&backend, &source, 0.4, Some(1));
        assert_eq!(stepped, recompress_at(&backend, &source, 0.1, None));
    }

    #[test]
    fn budget_already_met_uses_tier_quality() {
        let backend = RustBackend::new();
        let source = noisy_jpeg(128, 128);
        assert_eq!(
            recompress_at(&backend, &source, 0.6, Some(u64::MAX)),
            recompress_at(&backend, &source, 0.6, None)
        );
    }
}
