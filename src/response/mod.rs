//! Response handling module - result bundles, summary rendering and base64 helpers

pub mod base64;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::params::ResolvedParameters;
use crate::prompt::CanonicalPrompt;

/// How much of the result bundle is rendered as text
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputMode {
    /// Image only
    Minimal,
    /// Seed and prompt
    #[default]
    Default,
    /// Every effective parameter plus the negative prompt
    Verbose,
}

/// Final result of one generation request
#[derive(Debug, Clone, Serialize)]
pub struct GenerationOutput {
    pub image_base64: String,
    pub seed: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    pub sampler: String,
    pub steps: u32,
    pub scale: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub strength: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub noise: Option<f64>,
    pub prompt: String,
    pub negative_prompt: String,
    pub sanitized_prompt: String,
    /// In-flight requests observed at admission
    pub queue_depth: usize,
    pub created: DateTime<Utc>,
    /// The model line is only shown for metered backends
    #[serde(skip)]
    pub show_model: bool,
}

impl GenerationOutput {
    pub fn new(
        image_base64: String,
        params: &ResolvedParameters,
        prompt: &CanonicalPrompt,
        queue_depth: usize,
        show_model: bool,
    ) -> Self {
        Self {
            image_base64,
            seed: params.seed,
            model: params.model.clone(),
            sampler: params.sampler_key.clone(),
            steps: params.steps,
            scale: params.scale,
            strength: params.strength,
            noise: params.noise,
            prompt: prompt.positive(),
            negative_prompt: prompt.negative(),
            sanitized_prompt: prompt.sanitized_echo.clone(),
            queue_depth,
            created: Utc::now(),
            show_model,
        }
    }

    /// Text messages accompanying the image, one entry per message
    pub fn summary_lines(&self, mode: OutputMode) -> Vec<String> {
        if mode == OutputMode::Minimal {
            return Vec::new();
        }

        let mut header = vec![format!("seed = {}", self.seed)];
        if mode == OutputMode::Verbose {
            if let (true, Some(model)) = (self.show_model, &self.model) {
                header.push(format!("model = {}", model));
            }
            header.push(format!("sampler = {}", self.sampler));
            header.push(format!("steps = {}", self.steps));
            header.push(format!("scale = {}", self.scale));
            if let (Some(strength), Some(noise)) = (self.strength, self.noise) {
                header.push(format!("strength = {}", strength));
                header.push(format!("noise = {}", noise));
            }
        }

        let mut lines = vec![header.join("\n"), format!("prompt = {}", self.prompt)];
        if mode == OutputMode::Verbose {
            lines.push(format!("undesired = {}", self.negative_prompt));
        }
        lines
    }
}

/// Result of an upscale request
#[derive(Debug, Clone, Serialize)]
pub struct UpscaleOutput {
    pub image_base64: String,
    pub upscaler: String,
    pub created: DateTime<Utc>,
}
