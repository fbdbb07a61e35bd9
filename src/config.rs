//! Editor configuration module.
//!
//! Handles loading, validating, and merging `retouch.toml`. Stock defaults
//! are overridden by whatever keys the user file sets; everything else keeps
//! its default.
//!
//! ## Configuration Options
//!
//! ```toml
//! # All options are optional - defaults shown below
//!
//! [budget]
//! max_upload_bytes = 5242880  # 5MB per image
//! max_images = 10             # Per-user record ceiling
//!
//! [compression.high]
//! long_edge = 1920            # Longest pixel edge after recompression
//! quality = 0.8               # Initial quality factor (0-1]
//!
//! [compression.medium]
//! long_edge = 1280
//! quality = 0.6
//!
//! [compression.low]
//! long_edge = 1024
//! quality = 0.4
//!
//! [autosave]
//! enabled = true
//! debounce_ms = 2000          # Quiet period before an automatic save
//!
//! [export]
//! jpeg_quality = 95           # JPEG download quality (1-100)
//! ```
//!
//! ## Partial Configuration
//!
//! Config files are sparse; override just the values you want:
//!
//! ```toml
//! [autosave]
//! enabled = false
//! ```
//!
//! Unknown keys are rejected to catch typos early.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// File name looked up inside the config directory.
pub const CONFIG_FILENAME: &str = "retouch.toml";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("Config validation error: {0}")]
    Validation(String),
}

/// Editor configuration loaded from `retouch.toml`.
///
/// All fields have defaults matching the hosted free tier. Unknown keys are
/// rejected.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EditorConfig {
    /// Storage budget (per-image size, image count).
    pub budget: BudgetConfig,
    /// Recompression tiers offered for oversized uploads.
    pub compression: CompressionConfig,
    /// Debounced auto-save settings.
    pub autosave: AutosaveConfig,
    /// Export encoding settings.
    pub export: ExportConfig,
}

impl EditorConfig {
    /// Validate config values are within acceptable ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.budget.max_upload_bytes == 0 {
            return Err(ConfigError::Validation(
                "budget.max_upload_bytes must be non-zero".into(),
            ));
        }
        if self.budget.max_images == 0 {
            return Err(ConfigError::Validation(
                "budget.max_images must be non-zero".into(),
            ));
        }
        for (name, tier) in [
            ("high", &self.compression.high),
            ("medium", &self.compression.medium),
            ("low", &self.compression.low),
        ] {
            if tier.long_edge == 0 {
                return Err(ConfigError::Validation(format!(
                    "compression.{name}.long_edge must be non-zero"
                )));
            }
            if !(tier.quality > 0.0 && tier.quality <= 1.0) {
                return Err(ConfigError::Validation(format!(
                    "compression.{name}.quality must be in (0, 1]"
                )));
            }
        }
        if self.autosave.debounce_ms == 0 {
            return Err(ConfigError::Validation(
                "autosave.debounce_ms must be non-zero".into(),
            ));
        }
        if !(1..=100).contains(&self.export.jpeg_quality) {
            return Err(ConfigError::Validation(
                "export.jpeg_quality must be 1-100".into(),
            ));
        }
        Ok(())
    }
}

/// Storage budget.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BudgetConfig {
    /// Largest accepted upload, in bytes.
    pub max_upload_bytes: u64,
    /// Maximum number of stored images per user.
    pub max_images: usize,
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            max_upload_bytes: 5 * 1024 * 1024,
            max_images: 10,
        }
    }
}

/// One recompression tier.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TierConfig {
    /// Longest pixel edge of the recompressed image.
    pub long_edge: u32,
    /// Initial quality factor in (0, 1].
    pub quality: f32,
}

/// The three tiers offered for oversized uploads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CompressionConfig {
    pub high: TierConfig,
    pub medium: TierConfig,
    pub low: TierConfig,
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self {
            high: TierConfig {
                long_edge: 1920,
                quality: 0.8,
            },
            medium: TierConfig {
                long_edge: 1280,
                quality: 0.6,
            },
            low: TierConfig {
                long_edge: 1024,
                quality: 0.4,
            },
        }
    }
}

/// Debounced auto-save.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AutosaveConfig {
    /// Whether new edit sessions start with auto-save on.
    pub enabled: bool,
    /// Quiet period after the last edit before saving, in milliseconds.
    pub debounce_ms: u64,
}

impl AutosaveConfig {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}

impl Default for AutosaveConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            debounce_ms: 2000,
        }
    }
}

/// Export encoding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ExportConfig {
    /// JPEG download quality (1-100).
    pub jpeg_quality: u32,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self { jpeg_quality: 95 }
    }
}

// =============================================================================
// Config loading, merging, and validation
// =============================================================================

/// Returns the stock default config as a `toml::Value::Table`.
///
/// This is the canonical representation of all default values, used as the
/// base layer for merging user overrides on top.
pub fn stock_defaults_value() -> Result<toml::Value, ConfigError> {
    toml::Value::try_from(EditorConfig::default())
        .map_err(|e| ConfigError::Validation(format!("default config must serialize: {e}")))
}

/// Recursively merge `overlay` on top of `base`.
///
/// - Tables are merged key-by-key (overlay keys override base keys).
/// - Non-table values in overlay replace base values entirely.
/// - Keys in base that are not in overlay are preserved.
pub fn merge_toml(base: toml::Value, overlay: toml::Value) -> toml::Value {
    match (base, overlay) {
        (toml::Value::Table(mut base_table), toml::Value::Table(overlay_table)) => {
            for (key, overlay_val) in overlay_table {
                let merged = match base_table.remove(&key) {
                    Some(base_val) => merge_toml(base_val, overlay_val),
                    None => overlay_val,
                };
                base_table.insert(key, merged);
            }
            toml::Value::Table(base_table)
        }
        (_, overlay) => overlay,
    }
}

/// Load `retouch.toml` from a directory as a raw TOML value.
///
/// Returns `Ok(None)` if the file does not exist.
/// Returns `Err` if the file exists but contains invalid TOML.
pub fn load_raw_config(dir: &Path) -> Result<Option<toml::Value>, ConfigError> {
    let config_path = dir.join(CONFIG_FILENAME);
    if !config_path.exists() {
        return Ok(None);
    }
    let content = fs::read_to_string(&config_path)?;
    let value: toml::Value = toml::from_str(&content)?;
    Ok(Some(value))
}

/// Merge an optional overlay onto a base value, then deserialize and validate.
pub fn resolve_config(
    base: toml::Value,
    overlay: Option<toml::Value>,
) -> Result<EditorConfig, ConfigError> {
    let merged = match overlay {
        Some(ov) => merge_toml(base, ov),
        None => base,
    };
    let config: EditorConfig = merged.try_into()?;
    config.validate()?;
    Ok(config)
}

/// Load config from `retouch.toml` in the given directory.
///
/// Merges user values on top of stock defaults, rejects unknown keys,
/// and validates the result.
pub fn load_config(dir: &Path) -> Result<EditorConfig, ConfigError> {
    let base = stock_defaults_value()?;
    let overlay = load_raw_config(dir)?;
    resolve_config(base, overlay)
}

/// Returns a fully-commented stock `retouch.toml` with all keys and explanations.
///
/// Used by the `gen-config` CLI command.
pub fn stock_config_toml() -> &'static str {
    r##"# Retouch Configuration
# =====================
# All settings are optional. Remove or comment out any you don't need.
# Values shown below are the defaults.
#
# Unknown keys will cause an error.

# ---------------------------------------------------------------------------
# Storage budget
# ---------------------------------------------------------------------------
[budget]
# Largest accepted upload in bytes (5MB). Bigger files are offered
# recompression tiers instead of being accepted.
max_upload_bytes = 5242880

# Maximum number of stored images per user.
max_images = 10

# ---------------------------------------------------------------------------
# Recompression tiers for oversized uploads
# ---------------------------------------------------------------------------
# long_edge: longest pixel dimension after resizing
# quality:   initial JPEG quality factor in (0, 1]
[compression.high]
long_edge = 1920
quality = 0.8

[compression.medium]
long_edge = 1280
quality = 0.6

[compression.low]
long_edge = 1024
quality = 0.4

# ---------------------------------------------------------------------------
# Auto-save
# ---------------------------------------------------------------------------
[autosave]
# Save edits automatically once the user stops adjusting sliders.
enabled = true

# Quiet period in milliseconds after the last edit before saving.
debounce_ms = 2000

# ---------------------------------------------------------------------------
# Export
# ---------------------------------------------------------------------------
[export]
# JPEG download quality (1 = worst, 100 = best). PNG exports are lossless.
jpeg_quality = 95
"##
}
