//! Static per-backend capability and sampler tables

use std::fmt;

use crate::config::BackendType;
use crate::prompt::BracketDialect;

/// Closed set of backend families the relay can drive
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendKind {
    NovelAi,
    Naifu,
    WebUi,
    Horde,
    ComfyUi,
}

impl From<BackendType> for BackendKind {
    fn from(kind: BackendType) -> Self {
        match kind {
            BackendType::Token | BackendType::Login => BackendKind::NovelAi,
            BackendType::Naifu => BackendKind::Naifu,
            BackendType::SdWebui => BackendKind::WebUi,
            BackendType::StableHorde => BackendKind::Horde,
            BackendType::Comfyui => BackendKind::ComfyUi,
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BackendKind::NovelAi => "novelai",
            BackendKind::Naifu => "naifu",
            BackendKind::WebUi => "sd-webui",
            BackendKind::Horde => "stable-horde",
            BackendKind::ComfyUi => "comfyui",
        };
        f.write_str(name)
    }
}

impl BackendKind {
    /// Width and height must be multiples of this value
    pub fn resolution_multiple(&self) -> u32 {
        match self {
            BackendKind::NovelAi | BackendKind::Naifu | BackendKind::Horde => 64,
            BackendKind::WebUi | BackendKind::ComfyUi => 8,
        }
    }

    /// Requests spend paid credit, so overrides are permission-gated
    pub fn is_metered(&self) -> bool {
        matches!(self, BackendKind::NovelAi)
    }

    pub fn bracket_dialect(&self) -> BracketDialect {
        match self {
            BackendKind::NovelAi | BackendKind::Naifu => BracketDialect::Neutral,
            BackendKind::WebUi | BackendKind::Horde | BackendKind::ComfyUi => BracketDialect::WebUi,
        }
    }

    pub fn fallback_sampler(&self) -> &'static str {
        match self {
            BackendKind::ComfyUi => "euler",
            _ => "k_euler",
        }
    }
}

/// Caller-facing key and backend display name
pub type SamplerTable = &'static [(&'static str, &'static str)];

pub const NAI_SAMPLERS: SamplerTable = &[
    ("k_euler_a", "Euler ancestral"),
    ("k_euler", "Euler"),
    ("k_lms", "LMS"),
    ("ddim", "DDIM"),
    ("plms", "PLMS"),
];

pub const NAI3_SAMPLERS: SamplerTable = &[
    ("k_euler", "Euler"),
    ("k_euler_a", "Euler ancestral"),
    ("k_dpmpp_2s_ancestral", "DPM++ 2S ancestral"),
    ("k_dpmpp_2m", "DPM++ 2M"),
    ("k_dpmpp_sde", "DPM++ SDE"),
    ("ddim_v3", "DDIM V3"),
];

pub const NAI4_SAMPLERS: SamplerTable = &[
    ("k_euler", "Euler"),
    ("k_euler_a", "Euler ancestral"),
    ("k_dpmpp_2s_ancestral", "DPM++ 2S ancestral"),
    ("k_dpmpp_2m_sde", "DPM++ 2M SDE"),
    ("k_dpmpp_2m", "DPM++ 2M"),
    ("k_dpmpp_sde", "DPM++ SDE"),
];

pub const WEBUI_SAMPLERS: SamplerTable = &[
    ("k_euler_a", "Euler a"),
    ("k_euler", "Euler"),
    ("k_lms", "LMS"),
    ("k_heun", "Heun"),
    ("k_dpm_2", "DPM2"),
    ("k_dpm_2_a", "DPM2 a"),
    ("k_dpmpp_2s_a", "DPM++ 2S a"),
    ("k_dpmpp_2m", "DPM++ 2M"),
    ("k_dpmpp_sde", "DPM++ SDE"),
    ("k_dpmpp_2m_sde", "DPM++ 2M SDE"),
    ("k_dpm_fast", "DPM fast"),
    ("k_dpm_ad", "DPM adaptive"),
    ("ddim", "DDIM"),
    ("plms", "PLMS"),
    ("unipc", "UniPC"),
    ("lcm", "LCM"),
];

pub const HORDE_SAMPLERS: SamplerTable = &[
    ("k_lms", "LMS"),
    ("k_heun", "Heun"),
    ("k_euler", "Euler"),
    ("k_euler_a", "Euler a"),
    ("k_dpm_2", "DPM2"),
    ("k_dpm_2_a", "DPM2 a"),
    ("k_dpm_fast", "DPM fast"),
    ("k_dpm_adaptive", "DPM adaptive"),
    ("k_dpmpp_2m", "DPM++ 2M"),
    ("k_dpmpp_2s_a", "DPM++ 2S a"),
    ("k_dpmpp_sde", "DPM++ SDE"),
    ("dpmsolver", "DPM solver"),
    ("lcm", "LCM"),
    ("DDIM", "DDIM"),
];

pub const COMFYUI_SAMPLERS: SamplerTable = &[
    ("euler", "Euler"),
    ("euler_ancestral", "Euler ancestral"),
    ("heun", "Heun"),
    ("heunpp2", "Heun++ 2"),
    ("dpm_2", "DPM 2"),
    ("dpm_2_ancestral", "DPM 2 ancestral"),
    ("lms", "LMS"),
    ("dpm_fast", "DPM fast"),
    ("dpm_adaptive", "DPM adaptive"),
    ("dpmpp_2s_ancestral", "DPM++ 2S ancestral"),
    ("dpmpp_sde", "DPM++ SDE"),
    ("dpmpp_sde_gpu", "DPM++ SDE GPU"),
    ("dpmpp_2m", "DPM++ 2M"),
    ("dpmpp_2m_sde", "DPM++ 2M SDE"),
    ("dpmpp_2m_sde_gpu", "DPM++ 2M SDE GPU"),
    ("dpmpp_3m_sde", "DPM++ 3M SDE"),
    ("dpmpp_3m_sde_gpu", "DPM++ 3M SDE GPU"),
    ("ddpm", "DDPM"),
    ("lcm", "LCM"),
    ("ddim", "DDIM"),
    ("uni_pc", "UniPC"),
    ("uni_pc_bh2", "UniPC BH2"),
];

/// NovelAI model aliases and their service identifiers
pub const NAI_MODELS: &[(&str, &str)] = &[
    ("safe", "safe-diffusion"),
    ("nai", "nai-diffusion"),
    ("furry", "nai-diffusion-furry"),
    ("nai-v3", "nai-diffusion-3"),
    ("nai-v4-curated-preview", "nai-diffusion-4-curated-preview"),
];

pub const DEFAULT_NAI_MODEL: &str = "nai-v3";

/// Sampler table for a backend; NovelAI tables depend on the model generation
pub fn sampler_table(kind: BackendKind, model: Option<&str>) -> SamplerTable {
    match kind {
        BackendKind::NovelAi => match model {
            Some(id) if id.starts_with("nai-diffusion-4") => NAI4_SAMPLERS,
            Some("nai-diffusion-3") => NAI3_SAMPLERS,
            _ => NAI_SAMPLERS,
        },
        BackendKind::Naifu => NAI_SAMPLERS,
        BackendKind::WebUi => WEBUI_SAMPLERS,
        BackendKind::Horde => HORDE_SAMPLERS,
        BackendKind::ComfyUi => COMFYUI_SAMPLERS,
    }
}

pub fn lookup(table: SamplerTable, key: &str) -> Option<&'static str> {
    table.iter().find(|(k, _)| *k == key).map(|(_, name)| *name)
}

/// Map a model alias (or an already-resolved identifier) to the service identifier
pub fn nai_model_id(name: &str) -> Option<&'static str> {
    NAI_MODELS
        .iter()
        .find(|(alias, id)| *alias == name || *id == name)
        .map(|(_, id)| *id)
}
