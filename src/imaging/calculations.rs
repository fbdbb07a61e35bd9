//! Pure calculation functions for dimensions and color math.
//!
//! All functions here are pure and testable without any I/O or images.
//! The color matrices are the W3C Filter Effects definitions, operating on
//! straight RGB in `[0, 1]`.

/// A 3×3 matrix applied to `[r, g, b]`.
pub type ColorMatrix = [[f32; 3]; 3];

/// Calculate dimensions that fit inside a square of `long_edge` pixels.
///
/// Aspect ratio is preserved and images are never upscaled; the shorter
/// edge never rounds below one pixel.
///
/// # Examples
/// ```
/// # use retouch::imaging::calculate_fit_dimensions;
/// // 4000x3000 landscape into 1024 → 1024x768
/// assert_eq!(calculate_fit_dimensions((4000, 3000), 1024), (1024, 768));
///
/// // Already small enough → unchanged
/// assert_eq!(calculate_fit_dimensions((800, 600), 1920), (800, 600));
/// ```
pub fn calculate_fit_dimensions(original: (u32, u32), long_edge: u32) -> (u32, u32) {
    let (w, h) = original;
    let longer = w.max(h);
    if longer <= long_edge || longer == 0 {
        return (w, h);
    }

    let ratio = long_edge as f64 / longer as f64;
    if w >= h {
        // Landscape or square
        (long_edge, ((h as f64 * ratio).round() as u32).max(1))
    } else {
        // Portrait
        (((w as f64 * ratio).round() as u32).max(1), long_edge)
    }
}

/// Quality points dropped per budget-seeking step.
pub const QUALITY_STEP: u32 = 10;

/// Lowest quality a budget-seeking step goes down to.
pub const MIN_STEP_QUALITY: u32 = 10;

/// Qualities tried when stepping down from `start` toward a byte budget.
///
/// Always yields `start` first, then drops by [`QUALITY_STEP`] while staying
/// at or above [`MIN_STEP_QUALITY`].
///
/// ```
/// # use retouch::imaging::quality_steps;
/// assert_eq!(quality_steps(40).collect::<Vec<_>>(), vec![40, 30, 20, 10]);
/// assert_eq!(quality_steps(5).collect::<Vec<_>>(), vec![5]);
/// ```
pub fn quality_steps(start: u32) -> impl Iterator<Item = u32> {
    std::iter::successors(Some(start), |&q| {
        q.checked_sub(QUALITY_STEP)
            .filter(|&next| next >= MIN_STEP_QUALITY)
    })
}

/// Multiply `m` by `rgb`.
#[inline]
pub fn apply_matrix(m: &ColorMatrix, rgb: [f32; 3]) -> [f32; 3] {
    let [r, g, b] = rgb;
    [
        m[0][0] * r + m[0][1] * g + m[0][2] * b,
        m[1][0] * r + m[1][1] * g + m[1][2] * b,
        m[2][0] * r + m[2][1] * g + m[2][2] * b,
    ]
}

/// Grayscale by `amount` in `[0, 1]`.
pub fn grayscale_matrix(amount: f32) -> ColorMatrix {
    let a = 1.0 - amount.clamp(0.0, 1.0);
    [
        [0.2126 + 0.7874 * a, 0.7152 - 0.7152 * a, 0.0722 - 0.0722 * a],
        [0.2126 - 0.2126 * a, 0.7152 + 0.2848 * a, 0.0722 - 0.0722 * a],
        [0.2126 - 0.2126 * a, 0.7152 - 0.7152 * a, 0.0722 + 0.9278 * a],
    ]
}

/// Sepia by `amount` in `[0, 1]`.
pub fn sepia_matrix(amount: f32) -> ColorMatrix {
    let a = 1.0 - amount.clamp(0.0, 1.0);
    [
        [0.393 + 0.607 * a, 0.769 - 0.769 * a, 0.189 - 0.189 * a],
        [0.349 - 0.349 * a, 0.686 + 0.314 * a, 0.168 - 0.168 * a],
        [0.272 - 0.272 * a, 0.534 - 0.534 * a, 0.131 + 0.869 * a],
    ]
}

/// Saturation with `amount` as a multiplier (0 = gray, 1 = unchanged).
pub fn saturate_matrix(amount: f32) -> ColorMatrix {
    let s = amount.max(0.0);
    [
        [0.213 + 0.787 * s, 0.715 - 0.715 * s, 0.072 - 0.072 * s],
        [0.213 - 0.213 * s, 0.715 + 0.285 * s, 0.072 - 0.072 * s],
        [0.213 - 0.213 * s, 0.715 - 0.715 * s, 0.072 + 0.928 * s],
    ]
}

/// Hue rotation by `degrees`.
pub fn hue_rotate_matrix(degrees: f32) -> ColorMatrix {
    let (sin, cos) = degrees.to_radians().sin_cos();
    [
        [
            0.213 + cos * 0.787 - sin * 0.213,
            0.715 - cos * 0.715 - sin * 0.715,
            0.072 - cos * 0.072 + sin * 0.928,
        ],
        [
            0.213 - cos * 0.213 + sin * 0.143,
            0.715 + cos * 0.285 + sin * 0.140,
            0.072 - cos * 0.072 - sin * 0.283,
        ],
        [
            0.213 - cos * 0.213 - sin * 0.787,
            0.715 - cos * 0.715 + sin * 0.715,
            0.072 + cos * 0.928 + sin * 0.072,
        ],
    ]
}

/// Contrast around mid-gray.
#[inline]
pub fn contrast(channel: f32, amount: f32) -> f32 {
    (channel - 0.5) * amount + 0.5
}

/// Blend toward the inverted channel by `amount` in `[0, 1]`.
#[inline]
pub fn invert(channel: f32, amount: f32) -> f32 {
    channel * (1.0 - amount) + (1.0 - channel) * amount
}
