//! Image generation relay
//!
//! Turns free-form generation requests into correctly shaped calls against
//! NovelAI, naifu, the Stable Diffusion web UI, Stable Horde or ComfyUI, with
//! prompt sanitation, parameter translation, concurrency admission and
//! retrying dispatch.

pub mod api;
pub mod backend;
pub mod config;
pub mod error;
pub mod gateway;
pub mod params;
pub mod prompt;
pub mod queue;
pub mod response;

pub use error::{AppError, Result};

use gateway::Relay;

/// Application state shared across all handlers
pub struct AppState {
    pub relay: Relay,
}
