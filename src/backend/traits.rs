//! Common traits and types for image generation backends

use async_trait::async_trait;
use reqwest::Method;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::{AppError, Result, ValidationError};
use crate::gateway::dispatcher::Dispatcher;
use crate::params::{BackendKind, ResolvedParameters};
use crate::prompt::CanonicalPrompt;

/// Submission built by an adapter: path relative to the endpoint plus JSON payload
#[derive(Debug, Clone, PartialEq)]
pub struct BackendRequest {
    pub path: String,
    pub payload: Value,
}

impl BackendRequest {
    pub fn new(path: impl Into<String>, payload: Value) -> Self {
        Self {
            path: path.into(),
            payload,
        }
    }

    pub fn into_call(self) -> HttpCall {
        HttpCall::post_json(self.path, self.payload)
    }
}

/// Body of an outbound call
#[derive(Debug, Clone)]
pub enum RequestBody {
    Empty,
    Json(Value),
    /// Single-file multipart upload; rebuilt for every attempt
    Multipart {
        field: String,
        file_name: String,
        mime: String,
        bytes: Vec<u8>,
        fields: Vec<(String, String)>,
    },
}

/// One HTTP exchange the dispatcher can replay across attempts
#[derive(Debug, Clone)]
pub struct HttpCall {
    pub method: Method,
    /// Relative to the backend endpoint unless it is an absolute URL
    pub path: String,
    pub query: Vec<(String, String)>,
    pub body: RequestBody,
}

impl HttpCall {
    pub fn get(path: impl Into<String>) -> Self {
        Self {
            method: Method::GET,
            path: path.into(),
            query: Vec::new(),
            body: RequestBody::Empty,
        }
    }

    pub fn post(path: impl Into<String>, body: RequestBody) -> Self {
        Self {
            method: Method::POST,
            path: path.into(),
            query: Vec::new(),
            body,
        }
    }

    pub fn post_json(path: impl Into<String>, payload: Value) -> Self {
        Self::post(path, RequestBody::Json(payload))
    }

    pub fn with_query(mut self, key: &str, value: impl Into<String>) -> Self {
        self.query.push((key.to_string(), value.into()));
        self
    }
}

/// Successful raw response
#[derive(Debug, Clone)]
pub struct RawResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

impl RawResponse {
    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_slice(&self.body)?)
    }
}

/// How the cached credential is attached to outbound calls
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthHeader {
    Bearer,
    /// `apikey: <token>`
    ApiKey,
}

/// Handle for a job accepted by an asynchronous backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobHandle(pub String);

/// Parsed submission response
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponseOutcome {
    /// Base64 image, possibly empty
    Image(String),
    Submitted(JobHandle),
}

/// State of an asynchronous job between polls
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollState {
    Pending { detail: Option<String> },
    Ready(String),
}

/// Upscale options after validation
#[derive(Debug, Clone, PartialEq)]
pub struct UpscaleParams {
    pub image_data_url: String,
    /// Resize factor, used when no explicit size is given
    pub scale: f64,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub upscaler: String,
    pub upscaler2: String,
    pub upscaler2_visibility: f64,
    pub upscale_first: bool,
}

/// Authenticated access to the dispatcher for follow-up calls
pub struct Exchange<'a> {
    pub dispatcher: &'a Dispatcher,
    pub auth: AuthHeader,
    pub credential: Option<&'a str>,
}

impl Exchange<'_> {
    pub async fn send(&self, call: &HttpCall) -> Result<RawResponse> {
        let credential = self.credential.map(|token| (self.auth, token));
        Ok(self.dispatcher.execute(call, credential).await?)
    }
}

/// Trait for image generation backends
#[async_trait]
pub trait BackendAdapter: Send + Sync {
    fn kind(&self) -> BackendKind;

    /// How the credential is sent; bearer unless the service says otherwise
    fn auth(&self) -> AuthHeader {
        AuthHeader::Bearer
    }

    /// Build the submission for one generation
    fn build_request(&self, params: &ResolvedParameters, prompt: &CanonicalPrompt) -> Result<BackendRequest>;

    /// Parse the submission response body
    fn parse_response(&self, body: &[u8]) -> Result<ResponseOutcome>;

    /// Side effects that must precede submission (uploads)
    async fn stage(&self, _exchange: &Exchange<'_>, _params: &ResolvedParameters) -> Result<()> {
        Ok(())
    }

    /// Check an asynchronous job once
    async fn poll(&self, _exchange: &Exchange<'_>, job: &JobHandle) -> Result<PollState> {
        Err(AppError::Backend(format!(
            "{} does not run asynchronous jobs ({})",
            self.kind(),
            job.0
        )))
    }

    /// Build an upscale call; only some services support it
    fn build_upscale(&self, _params: &UpscaleParams) -> Result<BackendRequest> {
        Err(ValidationError::FeatureDisabled("upscale").into())
    }

    fn parse_upscale(&self, _body: &[u8]) -> Result<String> {
        Err(ValidationError::FeatureDisabled("upscale").into())
    }
}
