//! Stable Diffusion web UI adapter

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Map, Value};

use crate::backend::traits::{BackendAdapter, BackendRequest, ResponseOutcome, UpscaleParams};
use crate::config::BackendConfig;
use crate::error::{AppError, Result, ValidationError};
use crate::params::capability::{self, BackendKind};
use crate::params::ResolvedParameters;
use crate::prompt::CanonicalPrompt;
use crate::response::base64;

/// Web UI field name and the neutral parameter it is taken from
pub const FIELD_RENAMES: &[(&str, &str)] = &[
    ("prompt", "prompt"),
    ("batch_size", "n_samples"),
    ("seed", "seed"),
    ("negative_prompt", "uc"),
    ("cfg_scale", "scale"),
    ("steps", "steps"),
    ("width", "width"),
    ("height", "height"),
    ("denoising_strength", "strength"),
];

/// Upscalers the web UI may offer; all but the first three come from extensions
pub const UPSCALERS: &[&str] = &[
    "None",
    "Lanczos",
    "Nearest",
    "LDSR",
    "ESRGAN_4x",
    "R-ESRGAN General 4xV3",
    "R-ESRGAN General WDN 4xV3",
    "R-ESRGAN AnimeVideo",
    "R-ESRGAN 4x+",
    "R-ESRGAN 4x+ Anime6B",
    "R-ESRGAN 2x+",
    "ScuNET GAN",
    "ScuNET PSNR",
    "SwinIR 4x",
];

const TXT2IMG_PATH: &str = "/sdapi/v1/txt2img";
const IMG2IMG_PATH: &str = "/sdapi/v1/img2img";
const UPSCALE_PATH: &str = "/sdapi/v1/extra-single-image";

#[derive(Debug, Deserialize)]
struct GenerationResponse {
    #[serde(default)]
    images: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct UpscaleResponse {
    #[serde(default)]
    image: String,
}

/// Copy `source` keys into web UI field names; absent keys are skipped
pub fn project(source: &Map<String, Value>, renames: &[(&str, &str)]) -> Map<String, Value> {
    renames
        .iter()
        .filter_map(|(target, key)| match source.get(*key) {
            Some(Value::Null) | None => None,
            Some(value) => Some((target.to_string(), value.clone())),
        })
        .collect()
}

pub fn is_known_upscaler(name: &str) -> bool {
    UPSCALERS.contains(&name)
}

pub struct WebUiAdapter {
    scheduler: Option<String>,
    restore_faces: bool,
    hires_fix: bool,
    hires_fix_upscaler: String,
}

impl WebUiAdapter {
    pub fn new(config: &BackendConfig) -> Self {
        Self {
            scheduler: config.scheduler.clone(),
            restore_faces: config.restore_faces,
            hires_fix: config.hires_fix,
            hires_fix_upscaler: config.hires_fix_upscaler.clone(),
        }
    }
}

#[async_trait]
impl BackendAdapter for WebUiAdapter {
    fn kind(&self) -> BackendKind {
        BackendKind::WebUi
    }

    fn build_request(&self, params: &ResolvedParameters, prompt: &CanonicalPrompt) -> Result<BackendRequest> {
        let mut neutral = Map::new();
        neutral.insert("prompt".into(), json!(prompt.positive()));
        neutral.insert("n_samples".into(), json!(1));
        neutral.insert("seed".into(), json!(params.seed));
        neutral.insert("uc".into(), json!(prompt.negative()));
        neutral.insert("scale".into(), json!(params.scale));
        neutral.insert("steps".into(), json!(params.steps));
        neutral.insert("width".into(), json!(params.width));
        neutral.insert("height".into(), json!(params.height));
        neutral.insert("strength".into(), json!(params.strength));

        let mut payload = project(&neutral, FIELD_RENAMES);
        let sampler = capability::lookup(capability::WEBUI_SAMPLERS, &params.sampler_key)
            .unwrap_or(params.sampler_key.as_str());
        payload.insert("sampler_index".into(), json!(sampler));
        if let Some(scheduler) = &self.scheduler {
            payload.insert("scheduler".into(), json!(scheduler));
        }
        payload.insert("restore_faces".into(), json!(self.restore_faces));

        let path = match &params.source_image {
            Some(image) => {
                payload.insert("init_images".into(), json!([image.data_url]));
                IMG2IMG_PATH
            }
            None => {
                if self.hires_fix {
                    payload.insert("enable_hr".into(), json!(true));
                    payload.insert("hr_upscaler".into(), json!(self.hires_fix_upscaler));
                }
                TXT2IMG_PATH
            }
        };
        Ok(BackendRequest::new(path, Value::Object(payload)))
    }

    fn parse_response(&self, body: &[u8]) -> Result<ResponseOutcome> {
        let response: GenerationResponse = serde_json::from_slice(body)?;
        let image = response
            .images
            .into_iter()
            .next()
            .ok_or(AppError::EmptyResponse)?;
        Ok(ResponseOutcome::Image(base64::strip_data_prefix(&image).to_string()))
    }

    fn build_upscale(&self, params: &UpscaleParams) -> Result<BackendRequest> {
        for name in [&params.upscaler, &params.upscaler2] {
            if !is_known_upscaler(name) {
                return Err(ValidationError::InvalidUpscaler(name.clone()).into());
            }
        }

        // resize_mode 0 scales by factor, 1 resizes to the explicit size
        let (resize_mode, width, height) = match (params.width, params.height) {
            (Some(width), Some(height)) => (1, width, height),
            _ => (0, 0, 0),
        };
        Ok(BackendRequest::new(
            UPSCALE_PATH,
            json!({
                "image": params.image_data_url,
                "resize_mode": resize_mode,
                "show_extras_results": true,
                "upscaling_resize": params.scale,
                "upscaling_resize_w": width,
                "upscaling_resize_h": height,
                "upscaling_crop": true,
                "upscaler_1": params.upscaler,
                "upscaler_2": params.upscaler2,
                "extras_upscaler_2_visibility": params.upscaler2_visibility,
                "upscale_first": params.upscale_first,
            }),
        ))
    }

    fn parse_upscale(&self, body: &[u8]) -> Result<String> {
        let response: UpscaleResponse = serde_json::from_slice(body)?;
        Ok(base64::strip_data_prefix(&response.image).to_string())
    }
}
