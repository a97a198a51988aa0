//! Parameter module - option bags, resolved parameters and backend capabilities

pub mod capability;
pub mod resolver;

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::response::base64;

pub use capability::BackendKind;
pub use resolver::resolve;

/// Options already parsed by the calling integration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct GenerationOptions {
    pub sampler: Option<String>,
    /// Orientation name or `WIDTHxHEIGHT`
    pub resolution: Option<String>,
    pub steps: Option<i64>,
    pub scale: Option<f64>,
    pub seed: Option<u32>,
    pub strength: Option<f64>,
    pub noise: Option<f64>,
    pub model: Option<String>,
    /// Skip the configured base/negative/default prompt fragments
    #[serde(rename = "override")]
    pub override_defaults: bool,
    /// Upscale-by-resize of the supplied image
    pub enhance: bool,
    /// Caller holds the authority to spend metered credit
    pub privileged: bool,
}

/// Source image in every form the adapters need
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceImage {
    pub bytes: Vec<u8>,
    pub base64: String,
    pub data_url: String,
}

impl SourceImage {
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        let mime = image::guess_format(&bytes)
            .map(|format| format.to_mime_type())
            .unwrap_or("image/png");
        let encoded = base64::encode(&bytes);
        Self {
            data_url: base64::data_url(&encoded, mime),
            base64: encoded,
            bytes,
        }
    }

    /// Accepts bare base64 or a data URL
    pub fn from_base64(encoded: &str) -> Result<Self, ValidationError> {
        Ok(Self::from_bytes(base64::decode(encoded)?))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Size {
    pub width: u32,
    pub height: u32,
}

/// Named orientations accepted in place of explicit sizes
pub const ORIENTATIONS: &[(&str, Size)] = &[
    ("landscape", Size { width: 1216, height: 832 }),
    ("portrait", Size { width: 832, height: 1216 }),
    ("square", Size { width: 1024, height: 1024 }),
];

/// Effective parameters for one generation; echoed back with the image
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResolvedParameters {
    pub seed: u32,
    pub width: u32,
    pub height: u32,
    pub steps: u32,
    pub scale: f64,
    pub sampler_key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub strength: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub noise: Option<f64>,
    #[serde(skip)]
    pub source_image: Option<SourceImage>,
    pub enhance: bool,
}

impl ResolvedParameters {
    pub fn is_image_request(&self) -> bool {
        self.source_image.is_some()
    }
}
