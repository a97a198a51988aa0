//! Request orchestration: sanitation, resolution, admission, dispatch and polling

use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::time::{sleep, Instant};
use tracing::{debug, error, info, warn};

use crate::backend::traits::{BackendAdapter, Exchange, PollState, ResponseOutcome, UpscaleParams};
use crate::backend::build_adapter;
use crate::config::Settings;
use crate::error::{AppError, Result, TransportFailure, ValidationError};
use crate::gateway::credentials::{CredentialCache, CredentialSource};
use crate::gateway::dispatcher::Dispatcher;
use crate::params::resolver::parse_resolution;
use crate::params::{self, BackendKind, GenerationOptions, ResolvedParameters, SourceImage};
use crate::prompt::{self, CanonicalPrompt, ForbiddenSet};
use crate::queue::ConcurrencyGate;
use crate::response::{GenerationOutput, UpscaleOutput};

const DEFAULT_UPSCALE_FACTOR: f64 = 2.0;

/// One generation request as handed over by the calling integration
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    /// Concurrency scope, usually the conversation the request came from
    pub scope: String,
    pub prompt: String,
    pub options: GenerationOptions,
    pub source_image: Option<SourceImage>,
}

/// Upscale of an existing image
#[derive(Debug, Clone)]
pub struct UpscaleRequest {
    pub scope: String,
    pub source_image: SourceImage,
    pub scale: Option<f64>,
    pub resolution: Option<String>,
    pub upscaler: Option<String>,
    pub upscaler2: Option<String>,
    pub upscaler2_visibility: Option<f64>,
    pub upscale_first: bool,
}

/// Everything derived from one configuration load
pub struct Runtime {
    pub settings: Arc<Settings>,
    pub kind: BackendKind,
    pub adapter: Arc<dyn BackendAdapter>,
    pub dispatcher: Dispatcher,
    pub forbidden: Arc<ForbiddenSet>,
    pub credentials: Arc<CredentialCache>,
}

impl Runtime {
    fn build(settings: Settings, previous: Option<&Runtime>) -> Result<Self> {
        let kind = BackendKind::from(settings.backend.kind);
        let adapter = build_adapter(&settings.backend)?;
        let dispatcher = Dispatcher::new(&settings.backend, &settings.dispatch)?;

        let forbidden = match previous {
            Some(previous) => ForbiddenSet::refresh(&previous.forbidden, &settings.prompt.forbidden),
            None => Arc::new(ForbiddenSet::new(&settings.prompt.forbidden)),
        };

        let credentials = match previous {
            Some(previous)
                if previous.settings.backend.credential_fingerprint()
                    == settings.backend.credential_fingerprint() =>
            {
                previous.credentials.clone()
            }
            _ => Arc::new(CredentialCache::new(CredentialSource::from_config(
                &settings.backend,
                &settings.dispatch,
            )?)),
        };

        Ok(Self {
            settings: Arc::new(settings),
            kind,
            adapter,
            dispatcher,
            forbidden,
            credentials,
        })
    }

    fn exchange<'a>(&'a self, credential: Option<&'a str>) -> Exchange<'a> {
        Exchange {
            dispatcher: &self.dispatcher,
            auth: self.adapter.auth(),
            credential,
        }
    }
}

/// Entry point for generation requests
pub struct Relay {
    runtime: RwLock<Arc<Runtime>>,
    gate: ConcurrencyGate,
}

impl Relay {
    pub fn new(settings: Settings) -> Result<Self> {
        let gate = ConcurrencyGate::new(settings.dispatch.max_concurrency);
        let runtime = Runtime::build(settings, None)?;
        info!(backend = %runtime.kind, endpoint = %runtime.dispatcher.endpoint(), "Relay initialized");
        Ok(Self {
            runtime: RwLock::new(Arc::new(runtime)),
            gate,
        })
    }

    /// Swap in a new configuration; in-flight requests keep their snapshot
    pub fn reload(&self, settings: Settings) -> Result<()> {
        let current = self.snapshot();
        let runtime = Runtime::build(settings, Some(&current))?;
        self.gate.set_max_per_scope(runtime.settings.dispatch.max_concurrency);
        info!(
            backend = %runtime.kind,
            rules = runtime.forbidden.rules().len(),
            credentials_reused = Arc::ptr_eq(&current.credentials, &runtime.credentials),
            "Configuration reloaded"
        );
        *self.runtime.write() = Arc::new(runtime);
        Ok(())
    }

    pub fn snapshot(&self) -> Arc<Runtime> {
        self.runtime.read().clone()
    }

    pub fn gate(&self) -> &ConcurrencyGate {
        &self.gate
    }

    pub fn kind(&self) -> BackendKind {
        self.snapshot().kind
    }

    /// Sanitize the prompt without touching the network
    pub fn normalize(&self, raw: &str, override_defaults: bool) -> Result<CanonicalPrompt> {
        let runtime = self.snapshot();
        Ok(prompt::normalize(
            raw,
            &runtime.settings.prompt,
            &runtime.forbidden,
            runtime.kind.bracket_dialect(),
            override_defaults,
        )?)
    }

    /// Run one generation request end to end
    pub async fn generate(&self, request: GenerationRequest) -> Result<GenerationOutput> {
        let runtime = self.snapshot();
        let settings = &runtime.settings;

        let prompt = prompt::normalize(
            &request.prompt,
            &settings.prompt,
            &runtime.forbidden,
            runtime.kind.bracket_dialect(),
            request.options.override_defaults,
        )?;
        if prompt.positive_tags.is_empty() && request.source_image.is_none() {
            return Err(ValidationError::ExpectPrompt.into());
        }

        let params = params::resolve(&request.options, request.source_image, settings, runtime.kind)?;
        let credential = runtime.credentials.token().await?;
        let task = self.gate.try_admit(&request.scope)?;

        debug!(
            backend = %runtime.kind,
            scope = %request.scope,
            task = %task.id(),
            queue_depth = task.queue_depth(),
            "Dispatching generation"
        );

        let result = self
            .run(&runtime, &params, &prompt, credential.as_deref())
            .await;
        task.release();

        let image = match result {
            Ok(image) if image.trim().is_empty() => return Err(AppError::EmptyResponse),
            Ok(image) => image,
            Err(e) => return Err(self.note_failure(&runtime, e)),
        };

        Ok(GenerationOutput::new(
            image,
            &params,
            &prompt,
            task.queue_depth(),
            runtime.kind.is_metered(),
        ))
    }

    async fn run(
        &self,
        runtime: &Runtime,
        params: &ResolvedParameters,
        prompt: &CanonicalPrompt,
        credential: Option<&str>,
    ) -> Result<String> {
        let exchange = runtime.exchange(credential);
        runtime.adapter.stage(&exchange, params).await?;

        let request = runtime.adapter.build_request(params, prompt)?;
        let response = exchange.send(&request.into_call()).await?;
        match runtime.adapter.parse_response(&response.body)? {
            ResponseOutcome::Image(image) => Ok(image),
            ResponseOutcome::Submitted(job) => {
                let dispatch = &runtime.settings.dispatch;
                let interval = Duration::from_millis(dispatch.poll_interval_ms);
                let deadline = Instant::now() + Duration::from_millis(dispatch.poll_timeout_ms);
                debug!(backend = %runtime.kind, job = %job.0, "Job submitted, polling");

                loop {
                    match runtime.adapter.poll(&exchange, &job).await? {
                        PollState::Ready(image) => return Ok(image),
                        PollState::Pending { detail } => {
                            debug!(job = %job.0, detail = ?detail, "Job pending");
                        }
                    }
                    if Instant::now() + interval > deadline {
                        warn!(job = %job.0, "Gave up polling job");
                        return Err(TransportFailure::Timeout.into());
                    }
                    sleep(interval).await;
                }
            }
        }
    }

    /// Upscale an image through the web UI extras endpoint
    pub async fn upscale(&self, request: UpscaleRequest) -> Result<UpscaleOutput> {
        let runtime = self.snapshot();
        let settings = &runtime.settings;
        if runtime.kind != BackendKind::WebUi || !settings.features.upscale {
            return Err(ValidationError::FeatureDisabled("upscale").into());
        }

        let size = match request.resolution.as_deref() {
            Some(resolution) => Some(parse_resolution(resolution, 1, settings.params.max_resolution, false)?),
            None => None,
        };
        let scale = request.scale.unwrap_or(DEFAULT_UPSCALE_FACTOR);
        if !scale.is_finite() || scale <= 0.0 {
            return Err(ValidationError::OutOfRange { field: "scale", value: scale }.into());
        }
        let upscaler2_visibility = request.upscaler2_visibility.unwrap_or(1.0);
        if !(0.0..=1.0).contains(&upscaler2_visibility) {
            return Err(ValidationError::OutOfRange {
                field: "upscaler2_visibility",
                value: upscaler2_visibility,
            }
            .into());
        }

        let params = UpscaleParams {
            image_data_url: request.source_image.data_url,
            scale,
            width: size.map(|s| s.width),
            height: size.map(|s| s.height),
            upscaler: request
                .upscaler
                .unwrap_or_else(|| settings.backend.upscaler.clone()),
            upscaler2: request.upscaler2.unwrap_or_else(|| "None".to_string()),
            upscaler2_visibility,
            upscale_first: request.upscale_first,
        };
        let call = runtime.adapter.build_upscale(&params)?.into_call();

        let credential = runtime.credentials.token().await?;
        let task = self.gate.try_admit(&request.scope)?;
        let result = runtime
            .exchange(credential.as_deref())
            .send(&call)
            .await
            .and_then(|response| runtime.adapter.parse_upscale(&response.body));
        task.release();

        let image = match result {
            Ok(image) if image.trim().is_empty() => return Err(AppError::EmptyResponse),
            Ok(image) => image,
            Err(e) => return Err(self.note_failure(&runtime, e)),
        };
        Ok(UpscaleOutput {
            image_base64: image,
            upscaler: params.upscaler,
            created: chrono::Utc::now(),
        })
    }

    fn note_failure(&self, runtime: &Runtime, error: AppError) -> AppError {
        match &error {
            AppError::Transport(TransportFailure::Unauthorized(status)) => {
                warn!(backend = %runtime.kind, status = status, "Credential rejected by backend");
                runtime.credentials.invalidate();
            }
            AppError::Transport(_) | AppError::EmptyResponse => {}
            other => error!(backend = %runtime.kind, error = %other, "Generation failed"),
        }
        error
    }
}
