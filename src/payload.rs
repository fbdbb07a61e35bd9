//! Portable text payloads for stored images.
//!
//! Records hold image bytes inline as `data:<mime>;base64,<data>` strings so
//! the storage collaborator only ever sees text.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum PayloadError {
    #[error("Payload is not a base64 data URL")]
    NotDataUrl,
    #[error("Invalid base64 payload: {0}")]
    Base64(String),
    #[error("Payload is empty")]
    Empty,
}

/// Sniff the MIME type of encoded image bytes.
pub fn sniff_mime(bytes: &[u8]) -> &'static str {
    image::guess_format(bytes)
        .map(|format| format.to_mime_type())
        .unwrap_or("application/octet-stream")
}

/// Encode image bytes as a data URL.
pub fn encode_payload(bytes: &[u8]) -> String {
    format!("data:{};base64,{}", sniff_mime(bytes), STANDARD.encode(bytes))
}

/// Decode a data URL produced by [`encode_payload`] (or any base64 data URL).
pub fn decode_payload(payload: &str) -> Result<Vec<u8>, PayloadError> {
    let rest = payload.strip_prefix("data:").ok_or(PayloadError::NotDataUrl)?;
    let (_mime, data) = rest
        .split_once(";base64,")
        .ok_or(PayloadError::NotDataUrl)?;
    let bytes = STANDARD
        .decode(data.trim())
        .map_err(|e| PayloadError::Base64(e.to_string()))?;
    if bytes.is_empty() {
        return Err(PayloadError::Empty);
    }
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    const PNG_MAGIC: &[u8] = &[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 0, 0];

    #[test]
    fn encode_sniffs_png() {
        let payload = encode_payload(PNG_MAGIC);
        assert!(payload.starts_with("data:image/png;base64,"));
        assert_eq!(decode_payload(&payload).unwrap(), PNG_MAGIC);
    }

    #[test]
    fn unknown_bytes_are_octet_stream() {
        assert!(encode_payload(b"hello").starts_with("data:application/octet-stream;base64,"));
    }

    #[test]
    fn decode_rejects_plain_text() {
        assert_eq!(decode_payload("hello"), Err(PayloadError::NotDataUrl));
        assert_eq!(
            decode_payload("data:image/png,raw"),
            Err(PayloadError::NotDataUrl)
        );
    }

    #[test]
    fn decode_rejects_bad_base64() {
        assert!(matches!(
            decode_payload("data:image/png;base64,@@@"),
            Err(PayloadError::Base64(_))
        ));
    }

    #[test]
    fn decode_rejects_empty() {
        assert_eq!(
            decode_payload("data:image/png;base64,"),
            Err(PayloadError::Empty)
        );
    }
}
