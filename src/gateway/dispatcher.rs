//! Dispatch loop: one HTTP exchange with failure classification and bounded retry

use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue, AUTHORIZATION};
use reqwest::multipart::{Form, Part};
use reqwest::Client;
use tracing::{debug, warn};

use crate::backend::traits::{AuthHeader, HttpCall, RawResponse, RequestBody};
use crate::config::{BackendConfig, DispatchConfig};
use crate::error::{AppError, Result, TransportFailure};

/// Outcome of a single attempt that did not succeed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptFailure {
    /// Worth another attempt while the budget lasts
    Transient(TransportFailure),
    Terminal(TransportFailure),
}

impl AttemptFailure {
    pub fn into_inner(self) -> TransportFailure {
        match self {
            AttemptFailure::Transient(failure) | AttemptFailure::Terminal(failure) => failure,
        }
    }
}

/// Classify a client-side error
pub fn classify_error(error: &reqwest::Error) -> AttemptFailure {
    if error.is_timeout() {
        return AttemptFailure::Terminal(TransportFailure::Timeout);
    }
    let code = if error.is_connect() {
        "connect"
    } else if error.is_body() {
        "body"
    } else if error.is_decode() {
        "decode"
    } else if error.is_redirect() {
        "redirect"
    } else {
        "request"
    };
    AttemptFailure::Transient(TransportFailure::Network(format!("{}: {}", code, error)))
}

/// Classify a non-success status code
pub fn classify_status(status: u16) -> AttemptFailure {
    match status {
        401 | 402 | 403 => AttemptFailure::Terminal(TransportFailure::Unauthorized(status)),
        _ => AttemptFailure::Transient(TransportFailure::Status(status)),
    }
}

/// Executes calls against the configured endpoint
#[derive(Debug, Clone)]
pub struct Dispatcher {
    client: Client,
    endpoint: String,
    max_attempts: u32,
}

impl Dispatcher {
    pub fn new(backend: &BackendConfig, dispatch: &DispatchConfig) -> Result<Self> {
        let mut headers = HeaderMap::new();
        for (name, value) in &backend.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| AppError::Internal(format!("Invalid header name '{}': {}", name, e)))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| AppError::Internal(format!("Invalid header value for '{}': {}", name, e)))?;
            headers.insert(name, value);
        }

        let client = Client::builder()
            .timeout(Duration::from_millis(dispatch.request_timeout_ms))
            .default_headers(headers)
            .build()
            .map_err(|e| AppError::Internal(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            endpoint: backend.endpoint(),
            max_attempts: dispatch.max_retry_count.max(1),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    fn url_for(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            path.to_string()
        } else {
            format!("{}{}", self.endpoint, path)
        }
    }

    /// Run `call` until it succeeds, fails terminally, or the attempt budget is spent
    pub async fn execute(
        &self,
        call: &HttpCall,
        credential: Option<(AuthHeader, &str)>,
    ) -> std::result::Result<RawResponse, TransportFailure> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.attempt(call, credential).await {
                Ok(response) => {
                    debug!(path = %call.path, attempt = attempt, status = response.status, "Backend call succeeded");
                    return Ok(response);
                }
                Err(AttemptFailure::Transient(failure)) if attempt < self.max_attempts => {
                    warn!(
                        path = %call.path,
                        attempt = attempt,
                        max_attempts = self.max_attempts,
                        error = %failure,
                        "Transient backend failure, retrying"
                    );
                }
                Err(failure) => {
                    let failure = failure.into_inner();
                    warn!(path = %call.path, attempt = attempt, error = %failure, "Backend call failed");
                    return Err(failure);
                }
            }
        }
    }

    /// Fetch an absolute URL once, without credentials
    pub async fn fetch(&self, url: &str) -> std::result::Result<RawResponse, TransportFailure> {
        self.attempt(&HttpCall::get(url), None)
            .await
            .map_err(AttemptFailure::into_inner)
    }

    async fn attempt(
        &self,
        call: &HttpCall,
        credential: Option<(AuthHeader, &str)>,
    ) -> std::result::Result<RawResponse, AttemptFailure> {
        let mut request = self
            .client
            .request(call.method.clone(), self.url_for(&call.path));
        if !call.query.is_empty() {
            request = request.query(&call.query);
        }
        request = match credential {
            Some((AuthHeader::Bearer, token)) => request.header(AUTHORIZATION, format!("Bearer {}", token)),
            Some((AuthHeader::ApiKey, token)) => request.header("apikey", token),
            None => request,
        };
        request = match &call.body {
            RequestBody::Empty => request,
            RequestBody::Json(payload) => request.json(payload),
            RequestBody::Multipart {
                field,
                file_name,
                mime,
                bytes,
                fields,
            } => {
                let part = Part::bytes(bytes.clone())
                    .file_name(file_name.clone())
                    .mime_str(mime)
                    .map_err(|e| classify_error(&e))?;
                let form = fields
                    .iter()
                    .fold(Form::new(), |form, (key, value)| form.text(key.clone(), value.clone()))
                    .part(field.clone(), part);
                request.multipart(form)
            }
        };

        let response = request.send().await.map_err(|e| classify_error(&e))?;
        let status = response.status();
        if !status.is_success() {
            return Err(classify_status(status.as_u16()));
        }
        let body = response.bytes().await.map_err(|e| classify_error(&e))?;
        Ok(RawResponse {
            status: status.as_u16(),
            body: body.to_vec(),
        })
    }
}
