//! Request handlers

use std::sync::Arc;

use axum::{extract::State, Json};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::Result;
use crate::gateway::{GenerationRequest, UpscaleRequest};
use crate::params::{GenerationOptions, SourceImage};
use crate::response::{GenerationOutput, UpscaleOutput};
use crate::AppState;

fn default_scope() -> String {
    "default".to_string()
}

#[derive(Debug, Deserialize)]
pub struct GenerateBody {
    #[serde(default = "default_scope")]
    pub scope: String,
    #[serde(default)]
    pub prompt: String,
    #[serde(default)]
    pub options: GenerationOptions,
    /// Base64 or data URL
    #[serde(default)]
    pub image: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct GenerateResponse {
    #[serde(flatten)]
    pub output: GenerationOutput,
    pub summary: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct UpscaleBody {
    #[serde(default = "default_scope")]
    pub scope: String,
    pub image: String,
    #[serde(default)]
    pub scale: Option<f64>,
    #[serde(default)]
    pub resolution: Option<String>,
    #[serde(default)]
    pub upscaler: Option<String>,
    #[serde(default)]
    pub upscaler2: Option<String>,
    #[serde(default)]
    pub upscaler2_visibility: Option<f64>,
    #[serde(default)]
    pub upscale_first: bool,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub backend: String,
    pub in_flight: usize,
}

pub async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        backend: state.relay.kind().to_string(),
        in_flight: state.relay.gate().in_flight(),
    })
}

pub async fn generate(
    State(state): State<Arc<AppState>>,
    Json(body): Json<GenerateBody>,
) -> Result<Json<GenerateResponse>> {
    let source_image = body
        .image
        .as_deref()
        .map(SourceImage::from_base64)
        .transpose()?;
    let output = state
        .relay
        .generate(GenerationRequest {
            scope: body.scope,
            prompt: body.prompt,
            options: body.options,
            source_image,
        })
        .await?;

    info!(seed = output.seed, queue_depth = output.queue_depth, "Generation completed");
    let mode = state.relay.snapshot().settings.dispatch.output;
    let summary = output.summary_lines(mode);
    Ok(Json(GenerateResponse { output, summary }))
}

pub async fn upscale(
    State(state): State<Arc<AppState>>,
    Json(body): Json<UpscaleBody>,
) -> Result<Json<UpscaleOutput>> {
    let source_image = SourceImage::from_base64(&body.image)?;
    let output = state
        .relay
        .upscale(UpscaleRequest {
            scope: body.scope,
            source_image,
            scale: body.scale,
            resolution: body.resolution,
            upscaler: body.upscaler,
            upscaler2: body.upscaler2,
            upscaler2_visibility: body.upscaler2_visibility,
            upscale_first: body.upscale_first,
        })
        .await?;
    Ok(Json(output))
}
