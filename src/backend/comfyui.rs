//! ComfyUI (node graph) adapter

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::path::Path;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tracing::debug;
use uuid::Uuid;

use crate::backend::traits::{
    BackendAdapter, BackendRequest, Exchange, HttpCall, JobHandle, PollState, RequestBody,
    ResponseOutcome,
};
use crate::config::BackendConfig;
use crate::error::{AppError, Result};
use crate::params::{BackendKind, ResolvedParameters, SourceImage};
use crate::prompt::CanonicalPrompt;
use crate::response::base64;

const SUBMIT_PATH: &str = "/prompt";
const UPLOAD_PATH: &str = "/upload/image";
const DEFAULT_SCHEDULER: &str = "normal";
const DEFAULT_CHECKPOINT: &str = "model.safetensors";

#[derive(Debug, Deserialize)]
struct SubmitResponse {
    prompt_id: Option<String>,
    #[serde(default)]
    error: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct HistoryEntry {
    #[serde(default)]
    outputs: Map<String, Value>,
    #[serde(default)]
    status: Option<HistoryStatus>,
}

#[derive(Debug, Deserialize)]
struct HistoryStatus {
    #[serde(default)]
    status_str: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OutputImage {
    filename: String,
    #[serde(default)]
    subfolder: String,
    #[serde(default, rename = "type")]
    kind: String,
}

/// Built-in text-to-image graph
pub fn default_text2image() -> Value {
    json!({
        "3": {
            "class_type": "KSampler",
            "inputs": {
                "seed": 0, "steps": 20, "cfg": 7.0,
                "sampler_name": "euler", "scheduler": "normal", "denoise": 1.0,
                "model": ["4", 0], "positive": ["6", 0], "negative": ["7", 0],
                "latent_image": ["5", 0]
            }
        },
        "4": { "class_type": "CheckpointLoaderSimple", "inputs": { "ckpt_name": DEFAULT_CHECKPOINT } },
        "5": { "class_type": "EmptyLatentImage", "inputs": { "width": 512, "height": 512, "batch_size": 1 } },
        "6": { "class_type": "CLIPTextEncode", "inputs": { "text": "", "clip": ["4", 1] } },
        "7": { "class_type": "CLIPTextEncode", "inputs": { "text": "", "clip": ["4", 1] } },
        "8": { "class_type": "VAEDecode", "inputs": { "samples": ["3", 0], "vae": ["4", 2] } },
        "9": { "class_type": "SaveImage", "inputs": { "filename_prefix": "relay", "images": ["8", 0] } }
    })
}

/// Built-in image-to-image graph
pub fn default_image2image() -> Value {
    let mut graph = default_text2image();
    if let Value::Object(nodes) = &mut graph {
        nodes.remove("5");
        nodes.insert(
            "10".into(),
            json!({ "class_type": "LoadImage", "inputs": { "image": "" } }),
        );
        nodes.insert(
            "11".into(),
            json!({ "class_type": "VAEEncode", "inputs": { "pixels": ["10", 0], "vae": ["4", 2] } }),
        );
        if let Some(inputs) = nodes.get_mut("3").and_then(|node| node.get_mut("inputs")) {
            inputs["latent_image"] = json!(["11", 0]);
        }
    }
    graph
}

/// Upload name derived from the request, so staging and submission agree
pub fn upload_name(params: &ResolvedParameters, image: &SourceImage) -> String {
    let mut hasher = DefaultHasher::new();
    image.bytes.hash(&mut hasher);
    let extension = image::guess_format(&image.bytes)
        .ok()
        .and_then(|format| format.extensions_str().first().copied())
        .unwrap_or("png");
    format!(
        "relay-{}-{}x{}-{:016x}.{}",
        params.seed,
        params.width,
        params.height,
        hasher.finish(),
        extension
    )
}

/// Patch the input nodes of a workflow graph in place
pub fn patch_workflow(
    graph: &mut Value,
    params: &ResolvedParameters,
    prompt: &CanonicalPrompt,
    scheduler: &str,
    image_name: Option<&str>,
) -> Result<()> {
    let nodes = graph
        .as_object_mut()
        .ok_or_else(|| AppError::Backend("workflow must be a JSON object".to_string()))?;

    let mut positive_ids = Vec::new();
    let mut negative_ids = Vec::new();
    let mut has_sampler = false;

    for node in nodes.values_mut() {
        let class_type = node.get("class_type").and_then(Value::as_str).unwrap_or_default().to_string();
        let Some(inputs) = node.get_mut("inputs").and_then(Value::as_object_mut) else {
            continue;
        };
        match class_type.as_str() {
            "KSampler" => {
                has_sampler = true;
                inputs.insert("seed".into(), json!(params.seed));
                inputs.insert("steps".into(), json!(params.steps));
                inputs.insert("cfg".into(), json!(params.scale));
                inputs.insert("sampler_name".into(), json!(params.sampler_key));
                inputs.insert("scheduler".into(), json!(scheduler));
                inputs.insert("denoise".into(), json!(params.strength.unwrap_or(1.0)));
                positive_ids.extend(linked_node(inputs, "positive"));
                negative_ids.extend(linked_node(inputs, "negative"));
            }
            "CheckpointLoaderSimple" => {
                if let Some(model) = &params.model {
                    inputs.insert("ckpt_name".into(), json!(model));
                }
            }
            "EmptyLatentImage" => {
                inputs.insert("width".into(), json!(params.width));
                inputs.insert("height".into(), json!(params.height));
                inputs.insert("batch_size".into(), json!(1));
            }
            "LoadImage" => {
                if let Some(name) = image_name {
                    inputs.insert("image".into(), json!(name));
                }
            }
            _ => {}
        }
    }

    if !has_sampler {
        return Err(AppError::Backend("workflow has no KSampler node".to_string()));
    }

    for (ids, text) in [(positive_ids, prompt.positive()), (negative_ids, prompt.negative())] {
        for id in ids {
            if let Some(inputs) = nodes.get_mut(&id).and_then(|node| node.get_mut("inputs")) {
                inputs["text"] = json!(text);
            }
        }
    }
    Ok(())
}

fn linked_node(inputs: &Map<String, Value>, key: &str) -> Option<String> {
    match inputs.get(key)?.get(0)? {
        Value::String(id) => Some(id.clone()),
        Value::Number(id) => Some(id.to_string()),
        _ => None,
    }
}

fn load_workflow(path: Option<&Path>, fallback: fn() -> Value) -> Result<Value> {
    match path {
        Some(path) => {
            let text = std::fs::read_to_string(path)?;
            Ok(serde_json::from_str(&text)?)
        }
        None => Ok(fallback()),
    }
}

pub struct ComfyUiAdapter {
    text2image: Value,
    image2image: Value,
    scheduler: String,
    client_id: String,
}

impl ComfyUiAdapter {
    pub fn new(config: &BackendConfig) -> Result<Self> {
        Ok(Self {
            text2image: load_workflow(config.workflow_text2image.as_deref(), default_text2image)?,
            image2image: load_workflow(config.workflow_image2image.as_deref(), default_image2image)?,
            scheduler: config
                .scheduler
                .clone()
                .unwrap_or_else(|| DEFAULT_SCHEDULER.to_string()),
            client_id: Uuid::new_v4().to_string(),
        })
    }
}

#[async_trait]
impl BackendAdapter for ComfyUiAdapter {
    fn kind(&self) -> BackendKind {
        BackendKind::ComfyUi
    }

    async fn stage(&self, exchange: &Exchange<'_>, params: &ResolvedParameters) -> Result<()> {
        let Some(image) = &params.source_image else {
            return Ok(());
        };
        let name = upload_name(params, image);
        let mime = image::guess_format(&image.bytes)
            .map(|format| format.to_mime_type())
            .unwrap_or("image/png");
        debug!(file = %name, "Uploading source image");

        let call = HttpCall::post(
            UPLOAD_PATH,
            RequestBody::Multipart {
                field: "image".to_string(),
                file_name: name,
                mime: mime.to_string(),
                bytes: image.bytes.clone(),
                fields: vec![("overwrite".to_string(), "true".to_string())],
            },
        );
        exchange.send(&call).await?;
        Ok(())
    }

    fn build_request(&self, params: &ResolvedParameters, prompt: &CanonicalPrompt) -> Result<BackendRequest> {
        let (mut graph, image_name) = match &params.source_image {
            Some(image) => (self.image2image.clone(), Some(upload_name(params, image))),
            None => (self.text2image.clone(), None),
        };
        patch_workflow(&mut graph, params, prompt, &self.scheduler, image_name.as_deref())?;
        Ok(BackendRequest::new(
            SUBMIT_PATH,
            json!({ "prompt": graph, "client_id": self.client_id }),
        ))
    }

    fn parse_response(&self, body: &[u8]) -> Result<ResponseOutcome> {
        let response: SubmitResponse = serde_json::from_slice(body)?;
        match response.prompt_id {
            Some(id) => Ok(ResponseOutcome::Submitted(JobHandle(id))),
            None => Err(AppError::Backend(format!(
                "workflow rejected: {}",
                response.error.unwrap_or(Value::Null)
            ))),
        }
    }

    async fn poll(&self, exchange: &Exchange<'_>, job: &JobHandle) -> Result<PollState> {
        let mut history: Map<String, Value> = exchange
            .send(&HttpCall::get(format!("/history/{}", job.0)))
            .await?
            .json()?;
        let Some(entry) = history.remove(&job.0) else {
            return Ok(PollState::Pending { detail: None });
        };
        let entry: HistoryEntry = serde_json::from_value(entry)?;

        if let Some(status) = entry.status.as_ref().and_then(|s| s.status_str.as_deref()) {
            if status == "error" {
                return Err(AppError::Backend(format!("prompt {} failed", job.0)));
            }
        }

        // Preview nodes report temporary images; only saved outputs count
        let image = entry
            .outputs
            .values()
            .filter_map(|output| output.get("images").and_then(Value::as_array))
            .flatten()
            .filter_map(|image| serde_json::from_value::<OutputImage>(image.clone()).ok())
            .find(|image| image.kind == "output");
        // History entries only appear once the prompt has finished
        let Some(image) = image else {
            return Err(AppError::EmptyResponse);
        };

        let call = HttpCall::get("/view")
            .with_query("filename", image.filename)
            .with_query("subfolder", image.subfolder)
            .with_query("type", image.kind);
        let raw = exchange.send(&call).await?;
        Ok(PollState::Ready(base64::encode(&raw.body)))
    }
}
