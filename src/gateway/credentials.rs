//! Cached backend credential with in-flight fetch de-duplication

use std::time::Duration;

use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::backend::horde::ANONYMOUS_KEY;
use crate::config::{BackendConfig, BackendType, DispatchConfig};
use crate::error::{AppError, Result};

type SharedFetch = Shared<BoxFuture<'static, std::result::Result<Option<String>, String>>>;

/// Where the credential comes from
#[derive(Debug, Clone)]
pub enum CredentialSource {
    /// No credential is sent
    Anonymous,
    Static(String),
    /// Exchange an access key for a session token
    Login {
        client: Client,
        url: String,
        access_key: String,
    },
}

impl CredentialSource {
    pub fn from_config(backend: &BackendConfig, dispatch: &DispatchConfig) -> Result<Self> {
        let token = backend.token.clone().filter(|t| !t.trim().is_empty());
        let source = match backend.kind {
            BackendType::Login => {
                let client = Client::builder()
                    .timeout(Duration::from_millis(dispatch.request_timeout_ms))
                    .build()
                    .map_err(|e| AppError::Internal(format!("Failed to create HTTP client: {}", e)))?;
                CredentialSource::Login {
                    client,
                    url: format!("{}/user/login", backend.api_endpoint.trim_end_matches('/')),
                    access_key: backend.access_key.clone().unwrap_or_default(),
                }
            }
            BackendType::StableHorde => {
                CredentialSource::Static(token.unwrap_or_else(|| ANONYMOUS_KEY.to_string()))
            }
            _ => token.map_or(CredentialSource::Anonymous, CredentialSource::Static),
        };
        Ok(source)
    }

    async fn fetch(self) -> std::result::Result<Option<String>, String> {
        match self {
            CredentialSource::Anonymous => Ok(None),
            CredentialSource::Static(token) => Ok(Some(token)),
            CredentialSource::Login {
                client,
                url,
                access_key,
            } => login(&client, &url, &access_key).await.map(Some),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LoginResponse {
    access_token: String,
}

async fn login(client: &Client, url: &str, access_key: &str) -> std::result::Result<String, String> {
    debug!(url = %url, "Requesting session token");
    let response = client
        .post(url)
        .json(&serde_json::json!({ "key": access_key }))
        .send()
        .await
        .map_err(|e| e.to_string())?;
    let status = response.status();
    if !status.is_success() {
        return Err(format!("login rejected with status {}", status.as_u16()));
    }
    let body: LoginResponse = response.json().await.map_err(|e| e.to_string())?;
    info!("Obtained session token");
    Ok(body.access_token)
}

#[derive(Default)]
struct Slot {
    epoch: u64,
    pending: Option<SharedFetch>,
}

/// Credential cache shared by all requests of one configuration snapshot
pub struct CredentialCache {
    source: CredentialSource,
    slot: Mutex<Slot>,
}

impl CredentialCache {
    pub fn new(source: CredentialSource) -> Self {
        Self {
            source,
            slot: Mutex::new(Slot::default()),
        }
    }

    /// Current credential; concurrent callers share one fetch
    pub async fn token(&self) -> Result<Option<String>> {
        let (epoch, fetch) = {
            let mut slot = self.slot.lock();
            let fetch = match &slot.pending {
                Some(fetch) => fetch.clone(),
                None => {
                    let fetch = self.source.clone().fetch().boxed().shared();
                    slot.pending = Some(fetch.clone());
                    fetch
                }
            };
            (slot.epoch, fetch)
        };

        match fetch.await {
            Ok(token) => Ok(token),
            Err(message) => {
                let mut slot = self.slot.lock();
                if slot.epoch == epoch {
                    slot.pending = None;
                    slot.epoch += 1;
                }
                warn!(error = %message, "Credential fetch failed");
                Err(AppError::Credential(message))
            }
        }
    }

    /// Drop the cached value so the next caller fetches again
    pub fn invalidate(&self) {
        let mut slot = self.slot.lock();
        slot.pending = None;
        slot.epoch += 1;
        debug!("Credential invalidated");
    }
}
