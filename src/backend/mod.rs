//! Backend module - adapter trait and one adapter per service family

pub mod comfyui;
pub mod horde;
pub mod novelai;
pub mod traits;
pub mod webui;

use std::sync::Arc;

use crate::config::BackendConfig;
use crate::error::Result;
use crate::params::BackendKind;

pub use traits::{BackendAdapter, BackendRequest, Exchange, HttpCall, JobHandle, PollState, ResponseOutcome};

/// Select the adapter for the configured backend
pub fn build_adapter(config: &BackendConfig) -> Result<Arc<dyn BackendAdapter>> {
    let kind = BackendKind::from(config.kind);
    let adapter: Arc<dyn BackendAdapter> = match kind {
        BackendKind::NovelAi | BackendKind::Naifu => Arc::new(novelai::NovelAiAdapter::new(kind, config)),
        BackendKind::WebUi => Arc::new(webui::WebUiAdapter::new(config)),
        BackendKind::Horde => Arc::new(horde::HordeAdapter::new(config)),
        BackendKind::ComfyUi => Arc::new(comfyui::ComfyUiAdapter::new(config)?),
    };
    Ok(adapter)
}
