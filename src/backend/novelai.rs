//! NovelAI cloud and self-hosted naifu adapters

use async_trait::async_trait;
use serde_json::{json, Map, Value};

use crate::backend::traits::{BackendAdapter, BackendRequest, ResponseOutcome};
use crate::config::BackendConfig;
use crate::error::{AppError, Result};
use crate::params::capability::{self, BackendKind};
use crate::params::ResolvedParameters;
use crate::prompt::CanonicalPrompt;

/// Length of `event: newImage\nid: 1\ndata:` preceding the image payload
pub const EVENT_STREAM_HEADER_LEN: usize = 27;

const CLOUD_PATH: &str = "/ai/generate-image";
const NAIFU_PATH: &str = "/generate-stream";

/// No built-in undesired preset; the negative prompt is sent verbatim
const UC_PRESET_NONE: u8 = 2;

/// Canonicalize a sampler key for the NovelAI family
pub fn sd2nai<'a>(sampler_key: &'a str, model: Option<&str>) -> &'a str {
    if sampler_key == "k_euler_a" {
        return "k_euler_ancestral";
    }
    let table = capability::sampler_table(BackendKind::NovelAi, model);
    match capability::lookup(table, sampler_key) {
        Some(_) => sampler_key,
        None => "k_euler_ancestral",
    }
}

/// Strip the event-stream header from a streamed image response
pub fn strip_event_header(body: &[u8]) -> String {
    let text = String::from_utf8_lossy(body);
    text.get(EVENT_STREAM_HEADER_LEN..)
        .unwrap_or_default()
        .trim()
        .to_string()
}

/// Adapter for the token-based cloud service and its self-hosted variant
pub struct NovelAiAdapter {
    kind: BackendKind,
    smea: bool,
    smea_dyn: bool,
    rescale: f64,
    decrisper: bool,
}

impl NovelAiAdapter {
    pub fn new(kind: BackendKind, config: &BackendConfig) -> Self {
        Self {
            kind,
            smea: config.smea,
            smea_dyn: config.smea_dyn,
            rescale: config.rescale,
            decrisper: config.decrisper,
        }
    }

    fn parameters(&self, params: &ResolvedParameters, prompt: &CanonicalPrompt) -> Map<String, Value> {
        let model = params.model.as_deref();
        let mut parameters = Map::new();
        parameters.insert("seed".into(), json!(params.seed));
        parameters.insert("n_samples".into(), json!(1));
        parameters.insert("uc".into(), json!(prompt.negative()));
        parameters.insert("ucPreset".into(), json!(UC_PRESET_NONE));
        parameters.insert("qualityToggle".into(), json!(false));
        parameters.insert("width".into(), json!(params.width));
        parameters.insert("height".into(), json!(params.height));
        parameters.insert("scale".into(), json!(params.scale));
        parameters.insert("steps".into(), json!(params.steps));
        parameters.insert("sampler".into(), json!(sd2nai(&params.sampler_key, model)));

        if let Some(image) = &params.source_image {
            parameters.insert("image".into(), json!(image.base64));
            parameters.insert("strength".into(), json!(params.strength));
            parameters.insert("noise".into(), json!(params.noise));
            parameters.insert("extra_noise_seed".into(), json!(params.seed));
        }

        if self.kind == BackendKind::NovelAi {
            let is_v4 = model.map_or(false, |id| id.starts_with("nai-diffusion-4"));
            if !is_v4 {
                parameters.insert("sm".into(), json!(self.smea));
                parameters.insert("sm_dyn".into(), json!(self.smea && self.smea_dyn));
            }
            parameters.insert("cfg_rescale".into(), json!(self.rescale));
            parameters.insert("dynamic_thresholding".into(), json!(self.decrisper));
            if is_v4 {
                parameters.insert("params_version".into(), json!(3));
                parameters.insert(
                    "v4_prompt".into(),
                    json!({
                        "caption": { "base_caption": prompt.positive(), "char_captions": [] },
                        "use_coords": false,
                        "use_order": true,
                    }),
                );
                parameters.insert(
                    "v4_negative_prompt".into(),
                    json!({ "caption": { "base_caption": prompt.negative(), "char_captions": [] } }),
                );
            }
        }
        parameters
    }
}

#[async_trait]
impl BackendAdapter for NovelAiAdapter {
    fn kind(&self) -> BackendKind {
        self.kind
    }

    fn build_request(&self, params: &ResolvedParameters, prompt: &CanonicalPrompt) -> Result<BackendRequest> {
        let mut parameters = self.parameters(params, prompt);

        if self.kind == BackendKind::Naifu {
            parameters.insert("prompt".into(), json!(prompt.positive()));
            return Ok(BackendRequest::new(NAIFU_PATH, Value::Object(parameters)));
        }

        let model = params
            .model
            .clone()
            .ok_or_else(|| AppError::Internal("NovelAI request without a model".to_string()))?;
        let action = if params.is_image_request() { "img2img" } else { "generate" };
        Ok(BackendRequest::new(
            CLOUD_PATH,
            json!({
                "model": model,
                "input": prompt.positive(),
                "action": action,
                "parameters": parameters,
            }),
        ))
    }

    fn parse_response(&self, body: &[u8]) -> Result<ResponseOutcome> {
        Ok(ResponseOutcome::Image(strip_event_header(body)))
    }
}
