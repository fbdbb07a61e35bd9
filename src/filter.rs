//! The nine-parameter filter vector.
//!
//! A [`FilterVector`] is the whole edit state of an image: every field has a
//! fixed valid range and an identity value at which it leaves pixels alone.
//!
//! | Field | Range | Unit | Identity |
//! |---|---|---|---|
//! | `blur` | 0–20 | px | 0 |
//! | `brightness` | 0–200 | % | 100 |
//! | `contrast` | 0–200 | % | 100 |
//! | `grayscale` | 0–100 | % | 0 |
//! | `hueRotate` | 0–360 | deg | 0 |
//! | `saturate` | 0–200 | % | 100 |
//! | `sepia` | 0–100 | % | 0 |
//! | `invert` | 0–100 | % | 0 |
//! | `opacity` | 0–100 | % | 100 |
//!
//! ## Field order
//!
//! The table order is also the compositing order. Later primitives see the
//! output of earlier ones, so [`FilterField::ALL`], [`FilterVector::ops`] and
//! [`FilterVector::to_composite_expression`] all walk the fields in exactly
//! this sequence. Changing it would change how previously saved vectors look.
//!
//! ## Persisted form
//!
//! Stored records carry the vector as a flat camelCase object
//! (`{"blur": 0, "brightness": 100, ..., "hueRotate": 0, ...}`). A record with
//! no filter object at all means identity; a partial object is rejected by
//! deserialization (every field is required).

use crate::imaging::FilterOp;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Unknown filter field: {0}")]
pub struct UnknownField(pub String);

/// Unit a field's value is expressed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Unit {
    Pixels,
    Percent,
    Degrees,
}

impl Unit {
    /// Suffix used in the composite expression.
    pub fn suffix(self) -> &'static str {
        match self {
            Unit::Pixels => "px",
            Unit::Percent => "%",
            Unit::Degrees => "deg",
        }
    }
}

/// One of the nine adjustable parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FilterField {
    Blur,
    Brightness,
    Contrast,
    Grayscale,
    HueRotate,
    Saturate,
    Sepia,
    Invert,
    Opacity,
}

impl FilterField {
    /// All fields in compositing order.
    pub const ALL: [FilterField; 9] = [
        FilterField::Blur,
        FilterField::Brightness,
        FilterField::Contrast,
        FilterField::Grayscale,
        FilterField::HueRotate,
        FilterField::Saturate,
        FilterField::Sepia,
        FilterField::Invert,
        FilterField::Opacity,
    ];

    /// Inclusive valid range as `(min, max)`.
    pub fn range(self) -> (f32, f32) {
        match self {
            FilterField::Blur => (0.0, 20.0),
            FilterField::Brightness | FilterField::Contrast | FilterField::Saturate => {
                (0.0, 200.0)
            }
            FilterField::HueRotate => (0.0, 360.0),
            FilterField::Grayscale
            | FilterField::Sepia
            | FilterField::Invert
            | FilterField::Opacity => (0.0, 100.0),
        }
    }

    /// Value at which this field leaves pixels unchanged.
    pub fn identity(self) -> f32 {
        match self {
            FilterField::Brightness
            | FilterField::Contrast
            | FilterField::Saturate
            | FilterField::Opacity => 100.0,
            _ => 0.0,
        }
    }

    pub fn unit(self) -> Unit {
        match self {
            FilterField::Blur => Unit::Pixels,
            FilterField::HueRotate => Unit::Degrees,
            _ => Unit::Percent,
        }
    }

    /// Slider increment. Blur is the only fractional control.
    pub fn step(self) -> f32 {
        match self {
            FilterField::Blur => 0.1,
            _ => 1.0,
        }
    }

    /// Human-readable label for editor controls.
    pub fn label(self) -> &'static str {
        match self {
            FilterField::Blur => "Blur",
            FilterField::Brightness => "Brightness",
            FilterField::Contrast => "Contrast",
            FilterField::Grayscale => "Grayscale",
            FilterField::HueRotate => "Hue Rotate",
            FilterField::Saturate => "Saturation",
            FilterField::Sepia => "Sepia",
            FilterField::Invert => "Invert",
            FilterField::Opacity => "Opacity",
        }
    }

    /// Name in the persisted record (camelCase).
    pub fn key(self) -> &'static str {
        match self {
            FilterField::Blur => "blur",
            FilterField::Brightness => "brightness",
            FilterField::Contrast => "contrast",
            FilterField::Grayscale => "grayscale",
            FilterField::HueRotate => "hueRotate",
            FilterField::Saturate => "saturate",
            FilterField::Sepia => "sepia",
            FilterField::Invert => "invert",
            FilterField::Opacity => "opacity",
        }
    }

    /// Primitive name in the composite expression.
    pub fn primitive(self) -> &'static str {
        match self {
            FilterField::HueRotate => "hue-rotate",
            other => other.key(),
        }
    }

    /// Saturate `value` into this field's range. NaN maps to the identity value.
    pub fn clamp(self, value: f32) -> f32 {
        if value.is_nan() {
            return self.identity();
        }
        let (min, max) = self.range();
        value.clamp(min, max)
    }
}

impl fmt::Display for FilterField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

impl FromStr for FilterField {
    type Err = UnknownField;

    /// Accepts both the persisted spelling (`hueRotate`) and the expression
    /// spelling (`hue-rotate`), case-insensitively.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        FilterField::ALL
            .into_iter()
            .find(|field| {
                field.key().eq_ignore_ascii_case(s) || field.primitive().eq_ignore_ascii_case(s)
            })
            .ok_or_else(|| UnknownField(s.to_string()))
    }
}

/// The full adjustment vector applied to one image.
///
/// Equality is exact field-wise comparison: setting a field to the value it
/// already has is not a change.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct FilterVector {
    pub blur: f32,
    pub brightness: f32,
    pub contrast: f32,
    pub grayscale: f32,
    pub hue_rotate: f32,
    pub saturate: f32,
    pub sepia: f32,
    pub invert: f32,
    pub opacity: f32,
}

impl Default for FilterVector {
    fn default() -> Self {
        Self::identity()
    }
}

impl FilterVector {
    /// The no-op vector.
    pub fn identity() -> Self {
        Self {
            blur: 0.0,
            brightness: 100.0,
            contrast: 100.0,
            grayscale: 0.0,
            hue_rotate: 0.0,
            saturate: 100.0,
            sepia: 0.0,
            invert: 0.0,
            opacity: 100.0,
        }
    }

    /// Resolve a persisted (possibly absent) vector.
    pub fn from_persisted(persisted: Option<FilterVector>) -> Self {
        persisted.map(FilterVector::clamp).unwrap_or_default()
    }

    pub fn get(&self, field: FilterField) -> f32 {
        match field {
            FilterField::Blur => self.blur,
            FilterField::Brightness => self.brightness,
            FilterField::Contrast => self.contrast,
            FilterField::Grayscale => self.grayscale,
            FilterField::HueRotate => self.hue_rotate,
            FilterField::Saturate => self.saturate,
            FilterField::Sepia => self.sepia,
            FilterField::Invert => self.invert,
            FilterField::Opacity => self.opacity,
        }
    }

    /// Copy of this vector with `field` set to `value`, clamped into range.
    pub fn with(mut self, field: FilterField, value: f32) -> Self {
        let value = field.clamp(value);
        match field {
            FilterField::Blur => self.blur = value,
            FilterField::Brightness => self.brightness = value,
            FilterField::Contrast => self.contrast = value,
            FilterField::Grayscale => self.grayscale = value,
            FilterField::HueRotate => self.hue_rotate = value,
            FilterField::Saturate => self.saturate = value,
            FilterField::Sepia => self.sepia = value,
            FilterField::Invert => self.invert = value,
            FilterField::Opacity => self.opacity = value,
        }
        self
    }

    /// Force every field into its valid range.
    pub fn clamp(self) -> Self {
        FilterField::ALL
            .into_iter()
            .fold(self, |v, field| v.with(field, v.get(field)))
    }

    pub fn is_identity(&self) -> bool {
        *self == Self::identity()
    }

    /// Render the fixed-order filter expression.
    ///
    /// ```
    /// # use retouch::filter::FilterVector;
    /// assert_eq!(
    ///     FilterVector::identity().to_composite_expression(),
    ///     "blur(0px) brightness(100%) contrast(100%) grayscale(0%) hue-rotate(0deg) \
    ///      saturate(100%) sepia(0%) invert(0%) opacity(100%)"
    /// );
    /// ```
    pub fn to_composite_expression(&self) -> String {
        FilterField::ALL
            .iter()
            .map(|&field| {
                format!(
                    "{}({}{})",
                    field.primitive(),
                    self.get(field),
                    field.unit().suffix()
                )
            })
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Pixel operations in compositing order, with percentages normalized to
    /// fractions (100% → 1.0).
    pub fn ops(&self) -> [FilterOp; 9] {
        [
            FilterOp::Blur(self.blur),
            FilterOp::Brightness(self.brightness / 100.0),
            FilterOp::Contrast(self.contrast / 100.0),
            FilterOp::Grayscale(self.grayscale / 100.0),
            FilterOp::HueRotate(self.hue_rotate),
            FilterOp::Saturate(self.saturate / 100.0),
            FilterOp::Sepia(self.sepia / 100.0),
            FilterOp::Invert(self.invert / 100.0),
            FilterOp::Opacity(self.opacity / 100.0),
        ]
    }
}

impl fmt::Display for FilterVector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_composite_expression())
    }
}
