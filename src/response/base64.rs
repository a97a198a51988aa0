//! Base64 and data-URL helpers for source and result images

use base64::{engine::general_purpose::STANDARD, Engine};
use crate::error::ValidationError;

pub fn encode(data: &[u8]) -> String {
    STANDARD.encode(data)
}

/// Decode caller-supplied base64, bare or as a data URL
pub fn decode(encoded: &str) -> Result<Vec<u8>, ValidationError> {
    STANDARD
        .decode(strip_data_prefix(encoded).trim())
        .map_err(|e| ValidationError::UnreadableImage(format!("invalid base64: {}", e)))
}

/// Drop a `data:<mime>;base64,` prefix when present
pub fn strip_data_prefix(data: &str) -> &str {
    match data.strip_prefix("data:") {
        Some(rest) => rest.split_once(',').map_or(data, |(_, payload)| payload),
        None => data,
    }
}

pub fn data_url(encoded: &str, mime: &str) -> String {
    format!("data:{};base64,{}", mime, encoded)
}
