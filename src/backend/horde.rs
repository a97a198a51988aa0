//! Stable Horde (volunteer compute) adapter

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tracing::debug;

use crate::backend::traits::{
    AuthHeader, BackendAdapter, BackendRequest, Exchange, HttpCall, JobHandle, PollState, ResponseOutcome,
};
use crate::config::{BackendConfig, NsfwPolicy};
use crate::error::{AppError, Result};
use crate::params::BackendKind;
use crate::params::ResolvedParameters;
use crate::prompt::CanonicalPrompt;
use crate::response::base64;

/// Key sent when no account key is configured
pub const ANONYMOUS_KEY: &str = "0000000000";

const SUBMIT_PATH: &str = "/api/v2/generate/async";

#[derive(Debug, Deserialize)]
struct SubmitResponse {
    id: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CheckResponse {
    #[serde(default)]
    done: bool,
    #[serde(default)]
    faulted: bool,
    #[serde(default)]
    queue_position: Option<u64>,
    #[serde(default)]
    wait_time: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct StatusResponse {
    #[serde(default)]
    generations: Vec<Generation>,
}

#[derive(Debug, Deserialize)]
struct Generation {
    img: String,
}

pub struct HordeAdapter {
    nsfw: NsfwPolicy,
    trusted_workers: bool,
    hires_fix: bool,
    model: Option<String>,
}

impl HordeAdapter {
    pub fn new(config: &BackendConfig) -> Self {
        Self {
            nsfw: config.nsfw,
            trusted_workers: config.trusted_workers,
            hires_fix: config.hires_fix,
            model: config.model.clone(),
        }
    }

    async fn fetch_image(&self, exchange: &Exchange<'_>, job: &JobHandle) -> Result<String> {
        let status: StatusResponse = exchange
            .send(&HttpCall::get(format!("/api/v2/generate/status/{}", job.0)))
            .await?
            .json()?;
        let img = status
            .generations
            .into_iter()
            .next()
            .map(|generation| generation.img)
            .ok_or(AppError::EmptyResponse)?;

        if img.starts_with("http://") || img.starts_with("https://") {
            debug!(job = %job.0, "Fetching generated image from storage");
            let raw = exchange.dispatcher.fetch(&img).await?;
            return Ok(base64::encode(&raw.body));
        }
        Ok(base64::strip_data_prefix(&img).to_string())
    }
}

#[async_trait]
impl BackendAdapter for HordeAdapter {
    fn kind(&self) -> BackendKind {
        BackendKind::Horde
    }

    fn auth(&self) -> AuthHeader {
        AuthHeader::ApiKey
    }

    fn build_request(&self, params: &ResolvedParameters, prompt: &CanonicalPrompt) -> Result<BackendRequest> {
        let mut generation = Map::new();
        generation.insert("sampler_name".into(), json!(params.sampler_key));
        generation.insert("cfg_scale".into(), json!(params.scale));
        generation.insert("seed".into(), json!(params.seed.to_string()));
        generation.insert("height".into(), json!(params.height));
        generation.insert("width".into(), json!(params.width));
        generation.insert("post_processing".into(), json!([]));
        generation.insert("karras".into(), json!(params.sampler_key.starts_with("k_")));
        generation.insert("hires_fix".into(), json!(self.hires_fix && !params.is_image_request()));
        generation.insert("steps".into(), json!(params.steps));
        generation.insert("n".into(), json!(1));
        if let Some(strength) = params.strength {
            generation.insert("denoising_strength".into(), json!(strength));
        }

        let model = params.model.as_ref().or(self.model.as_ref());
        let mut payload = json!({
            "prompt": format!("{} ### {}", prompt.positive(), prompt.negative()),
            "params": generation,
            "nsfw": self.nsfw != NsfwPolicy::Disallow,
            "censor_nsfw": self.nsfw == NsfwPolicy::Censor,
            "trusted_workers": self.trusted_workers,
            "models": model.map(|m| vec![m.clone()]).unwrap_or_default(),
            "r2": false,
            "shared": true,
        });
        if let (Some(image), Value::Object(map)) = (&params.source_image, &mut payload) {
            map.insert("source_image".into(), json!(image.base64));
            map.insert("source_processing".into(), json!("img2img"));
        }
        Ok(BackendRequest::new(SUBMIT_PATH, payload))
    }

    fn parse_response(&self, body: &[u8]) -> Result<ResponseOutcome> {
        let response: SubmitResponse = serde_json::from_slice(body)?;
        match response.id {
            Some(id) if !id.is_empty() => Ok(ResponseOutcome::Submitted(JobHandle(id))),
            _ => Err(AppError::Backend(
                response.message.unwrap_or_else(|| "submission returned no job id".to_string()),
            )),
        }
    }

    async fn poll(&self, exchange: &Exchange<'_>, job: &JobHandle) -> Result<PollState> {
        let check: CheckResponse = exchange
            .send(&HttpCall::get(format!("/api/v2/generate/check/{}", job.0)))
            .await?
            .json()?;

        if check.faulted {
            return Err(AppError::Backend(format!("job {} faulted", job.0)));
        }
        if !check.done {
            let detail = check
                .queue_position
                .map(|position| format!("queue position {}, wait {}s", position, check.wait_time.unwrap_or(0)));
            return Ok(PollState::Pending { detail });
        }
        Ok(PollState::Ready(self.fetch_image(exchange, job).await?))
    }
}
