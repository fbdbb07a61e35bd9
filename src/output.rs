//! CLI output formatting.
//!
//! Every formatter returns display lines instead of printing, so the layout
//! is testable without capturing stdout. `print_*` wrappers do the printing.
//!
//! # Output Format
//!
//! ## Check
//!
//! ```text
//! sunset.jpg
//!     Size: 8.00MB (8388608 bytes)
//!     Dimensions: 4000x3000
//!     Budget: over 5.00MB, compress with: high (1920px, 0.8), medium (1280px, 0.6), low (1024px, 0.4)
//! ```
//!
//! ## Compress
//!
//! ```text
//! Needs compression: 8.00MB > 5.00MB
//! Compressing: low
//! Accepted: 412.31KB (original 8.00MB)
//! ```
//!
//! ## Fields
//!
//! ```text
//! Blur         blur        0..20px     identity 0     step 0.1
//! Brightness   brightness  0..200%     identity 100   step 1
//! ```

use crate::filter::FilterField;
use crate::imaging::Dimensions;
use crate::session::Export;
use crate::upload::{CompressionTier, UploadEvent, UploadPolicy, UploadState};

const KB: f64 = 1024.0;
const MB: f64 = 1024.0 * 1024.0;

/// Human-readable byte size: `512B`, `12.50KB`, `8.00MB`.
pub fn format_size(bytes: u64) -> String {
    let b = bytes as f64;
    if b >= MB {
        format!("{:.2}MB", b / MB)
    } else if b >= KB {
        format!("{:.2}KB", b / KB)
    } else {
        format!("{}B", bytes)
    }
}

fn tier_line(policy: &UploadPolicy) -> String {
    CompressionTier::ALL
        .iter()
        .map(|&tier| {
            let params = policy.tier(tier);
            format!("{} ({}px, {})", tier, params.long_edge, params.quality)
        })
        .collect::<Vec<_>>()
        .join(", ")
}

// ============================================================================
// Check
// ============================================================================

/// Describe a file against the upload budget.
pub fn format_check(
    name: &str,
    size: u64,
    dimensions: Option<Dimensions>,
    policy: &UploadPolicy,
) -> Vec<String> {
    let mut lines = vec![name.to_string()];
    lines.push(format!("    Size: {} ({} bytes)", format_size(size), size));
    match dimensions {
        Some(d) => lines.push(format!("    Dimensions: {}x{}", d.width, d.height)),
        None => lines.push("    Dimensions: unreadable".to_string()),
    }
    if policy.fits(size) {
        lines.push(format!(
            "    Budget: fits within {}",
            format_size(policy.max_bytes)
        ));
    } else {
        lines.push(format!(
            "    Budget: over {}, compress with: {}",
            format_size(policy.max_bytes),
            tier_line(policy)
        ));
    }
    lines
}

// ============================================================================
// Compress
// ============================================================================

/// Format one upload negotiation event.
pub fn format_upload_event(event: &UploadEvent) -> Vec<String> {
    match event {
        UploadEvent::NeedsCompression { size, limit } => vec![format!(
            "Needs compression: {} > {}",
            format_size(*size),
            format_size(*limit)
        )],
        UploadEvent::Compressing { tier } => vec![format!("Compressing: {}", tier)],
        UploadEvent::Accepted {
            bytes,
            original_size,
        } => vec![format!(
            "Accepted: {} (original {})",
            format_size(bytes.len() as u64),
            format_size(*original_size)
        )],
        UploadEvent::CompressionFailed { tier, message } => {
            vec![format!("Compression failed ({}): {}", tier, message)]
        }
        UploadEvent::Cancelled => vec!["Cancelled".to_string()],
    }
}

/// Summarize where an upload flow ended up.
pub fn format_upload_state(state: &UploadState, policy: &UploadPolicy) -> Vec<String> {
    match state {
        UploadState::Empty => vec!["No file selected".to_string()],
        UploadState::Accepted(c) => vec![format!(
            "Ready to upload: {} ({})",
            c.name,
            format_size(c.size())
        )],
        UploadState::AwaitingCompression(c) => vec![
            format!(
                "Still too large: {} ({})",
                c.name,
                format_size(c.size())
            ),
            format!("    Try: {}", tier_line(policy)),
        ],
        UploadState::Compressing { candidate, tier, .. } => {
            vec![format!("Compressing {} at {}", candidate.name, tier)]
        }
    }
}

// ============================================================================
// Render
// ============================================================================

pub fn format_export(export: &Export, dimensions: Option<Dimensions>) -> Vec<String> {
    let mut lines = vec![format!(
        "{} \u{2192} {}",
        export.format,
        export.filename
    )];
    lines.push(format!("    Size: {}", format_size(export.bytes.len() as u64)));
    if let Some(d) = dimensions {
        lines.push(format!("    Dimensions: {}x{}", d.width, d.height));
    }
    lines
}

// ============================================================================
// Fields
// ============================================================================

/// One row per filter field, in compositing order.
pub fn format_fields() -> Vec<String> {
    FilterField::ALL
        .iter()
        .map(|&field| {
            let (min, max) = field.range();
            let range = format!("{}..{}{}", min, max, field.unit().suffix());
            format!(
                "{:<12} {:<11} {:<11} identity {:<5} step {}",
                field.label(),
                field.key(),
                range,
                field.identity(),
                field.step()
            )
            .trim_end()
            .to_string()
        })
        .collect()
}

pub fn print_lines(lines: &[String]) {
    for line in lines {
        println!("{}", line);
    }
}
