//! Application settings and configuration management

use crate::error::{AppError, Result};
use crate::prompt::Placement;
use crate::response::OutputMode;
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Environment variable holding an alternative configuration file path
pub const CONFIG_PATH_ENV: &str = "IMG_RELAY_CONFIG";

/// Root configuration structure
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Settings {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub backend: BackendConfig,
    #[serde(default)]
    pub params: ParamConfig,
    #[serde(default)]
    pub prompt: PromptConfig,
    #[serde(default)]
    pub dispatch: DispatchConfig,
    #[serde(default)]
    pub features: FeatureConfig,
}

/// Server configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_true() -> bool {
    true
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "json".to_string()
}

/// Which service the relay talks to
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum BackendType {
    /// NovelAI with a persistent token
    #[default]
    Token,
    /// NovelAI with an access key exchanged for a token
    Login,
    Naifu,
    SdWebui,
    StableHorde,
    Comfyui,
}

/// NSFW policy sent to the volunteer compute service
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NsfwPolicy {
    Disallow,
    Censor,
    #[default]
    Allow,
}

/// Backend connection and model defaults
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BackendConfig {
    #[serde(rename = "type", default)]
    pub kind: BackendType,
    #[serde(default)]
    pub token: Option<String>,
    /// Pre-derived NovelAI access key used by `login`
    #[serde(default)]
    pub access_key: Option<String>,
    #[serde(default = "default_api_endpoint")]
    pub api_endpoint: String,
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub sampler: Option<String>,
    #[serde(default)]
    pub scheduler: Option<String>,
    #[serde(default)]
    pub smea: bool,
    #[serde(default)]
    pub smea_dyn: bool,
    #[serde(default)]
    pub rescale: f64,
    #[serde(default)]
    pub decrisper: bool,
    #[serde(default = "default_upscaler")]
    pub upscaler: String,
    #[serde(default)]
    pub restore_faces: bool,
    #[serde(default)]
    pub hires_fix: bool,
    #[serde(default = "default_hires_fix_upscaler")]
    pub hires_fix_upscaler: String,
    #[serde(default)]
    pub nsfw: NsfwPolicy,
    #[serde(default)]
    pub trusted_workers: bool,
    #[serde(default)]
    pub workflow_text2image: Option<PathBuf>,
    #[serde(default)]
    pub workflow_image2image: Option<PathBuf>,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            kind: BackendType::default(),
            token: None,
            access_key: None,
            api_endpoint: default_api_endpoint(),
            endpoint: None,
            headers: HashMap::new(),
            model: None,
            sampler: None,
            scheduler: None,
            smea: false,
            smea_dyn: false,
            rescale: 0.0,
            decrisper: false,
            upscaler: default_upscaler(),
            restore_faces: false,
            hires_fix: false,
            hires_fix_upscaler: default_hires_fix_upscaler(),
            nsfw: NsfwPolicy::default(),
            trusted_workers: false,
            workflow_text2image: None,
            workflow_image2image: None,
        }
    }
}

fn default_api_endpoint() -> String {
    "https://api.novelai.net".to_string()
}

fn default_upscaler() -> String {
    "Lanczos".to_string()
}

fn default_hires_fix_upscaler() -> String {
    "Latent".to_string()
}

impl BackendConfig {
    /// Generation endpoint, falling back to the public service address
    pub fn endpoint(&self) -> String {
        let endpoint = match (&self.endpoint, self.kind) {
            (Some(endpoint), _) if !endpoint.trim().is_empty() => endpoint.clone(),
            (_, BackendType::Token | BackendType::Login) => "https://image.novelai.net".to_string(),
            (_, BackendType::StableHorde) => "https://stablehorde.net".to_string(),
            _ => String::new(),
        };
        endpoint.trim_end_matches('/').to_string()
    }

    /// Fields whose change must invalidate a cached credential
    pub fn credential_fingerprint(&self) -> (BackendType, Option<&str>, Option<&str>, &str) {
        (
            self.kind,
            self.token.as_deref(),
            self.access_key.as_deref(),
            self.api_endpoint.as_str(),
        )
    }
}

/// Generation parameter defaults and ceilings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ParamConfig {
    #[serde(default = "default_scale")]
    pub scale: f64,
    #[serde(default = "default_text_steps")]
    pub text_steps: u32,
    #[serde(default = "default_image_steps")]
    pub image_steps: u32,
    /// Zero disables the ceiling
    #[serde(default = "default_max_steps")]
    pub max_steps: u32,
    #[serde(default = "default_strength")]
    pub strength: f64,
    #[serde(default = "default_noise")]
    pub noise: f64,
    /// Orientation name or `WIDTHxHEIGHT`
    #[serde(default = "default_resolution")]
    pub resolution: String,
    /// Zero disables the ceiling
    #[serde(default = "default_max_resolution")]
    pub max_resolution: u32,
}

impl Default for ParamConfig {
    fn default() -> Self {
        Self {
            scale: default_scale(),
            text_steps: default_text_steps(),
            image_steps: default_image_steps(),
            max_steps: default_max_steps(),
            strength: default_strength(),
            noise: default_noise(),
            resolution: default_resolution(),
            max_resolution: default_max_resolution(),
        }
    }
}

fn default_scale() -> f64 {
    5.0
}

fn default_text_steps() -> u32 {
    28
}

fn default_image_steps() -> u32 {
    50
}

fn default_max_steps() -> u32 {
    64
}

fn default_strength() -> f64 {
    0.7
}

fn default_noise() -> f64 {
    0.2
}

fn default_resolution() -> String {
    "portrait".to_string()
}

fn default_max_resolution() -> u32 {
    1920
}

/// Prompt sanitation settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PromptConfig {
    #[serde(default = "default_base_prompt")]
    pub base_prompt: String,
    #[serde(default = "default_negative_prompt")]
    pub negative_prompt: String,
    /// Denylist, comma or newline separated; a trailing `!` marks a strict entry
    #[serde(default)]
    pub forbidden: String,
    #[serde(default)]
    pub default_prompt_enabled: bool,
    #[serde(default)]
    pub default_prompt: String,
    #[serde(default)]
    pub placement: Placement,
    #[serde(default)]
    pub latin_only: bool,
    #[serde(default = "default_true")]
    pub lower_case: bool,
    /// Zero disables the limit
    #[serde(default)]
    pub max_words: usize,
}

impl Default for PromptConfig {
    fn default() -> Self {
        Self {
            base_prompt: default_base_prompt(),
            negative_prompt: default_negative_prompt(),
            forbidden: String::new(),
            default_prompt_enabled: false,
            default_prompt: String::new(),
            placement: Placement::default(),
            latin_only: false,
            lower_case: true,
            max_words: 0,
        }
    }
}

fn default_base_prompt() -> String {
    "best quality, amazing quality, very aesthetic, absurdres".to_string()
}

fn default_negative_prompt() -> String {
    [
        "nsfw, lowres, {bad}, error, fewer, extra, missing, worst quality",
        "jpeg artifacts, bad quality, watermark, unfinished, displeasing",
        "chromatic aberration, signature, extra digits, artistic error, username, scan, [abstract]",
    ]
    .join(", ")
}

/// Retry, timeout and concurrency settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DispatchConfig {
    #[serde(default = "default_max_retry_count")]
    pub max_retry_count: u32,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_ms: u64,
    /// Per-scope ceiling; zero disables it
    #[serde(default)]
    pub max_concurrency: usize,
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_poll_timeout")]
    pub poll_timeout_ms: u64,
    #[serde(default)]
    pub output: OutputMode,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            max_retry_count: default_max_retry_count(),
            request_timeout_ms: default_request_timeout(),
            max_concurrency: 0,
            poll_interval_ms: default_poll_interval(),
            poll_timeout_ms: default_poll_timeout(),
            output: OutputMode::default(),
        }
    }
}

fn default_max_retry_count() -> u32 {
    3
}

fn default_request_timeout() -> u64 {
    60000
}

fn default_poll_interval() -> u64 {
    1000
}

fn default_poll_timeout() -> u64 {
    600000
}

/// Feature switches
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FeatureConfig {
    #[serde(default = "default_true")]
    pub text: bool,
    #[serde(default = "default_true")]
    pub image: bool,
    #[serde(default = "default_true")]
    pub upscale: bool,
    /// Let every caller spend metered credit (custom sizes, steps, enhance)
    #[serde(default = "default_true")]
    pub allow_credit: bool,
}

impl Default for FeatureConfig {
    fn default() -> Self {
        Self {
            text: true,
            image: true,
            upscale: true,
            allow_credit: true,
        }
    }
}

impl Settings {
    /// Load settings from configuration files and environment variables
    pub fn load() -> Result<Self> {
        let path = std::env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| "config/default.toml".to_string());
        Self::load_from_path(path)
    }

    /// Load settings from a specific configuration file path
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let config = Config::builder()
            .set_default("server.host", "0.0.0.0")?
            .set_default("server.port", 8080)?
            .set_default("backend.type", "token")?
            .add_source(File::from(path.as_ref()).required(false))
            // Override with environment variables (prefixed with IMG_RELAY_)
            .add_source(
                Environment::with_prefix("IMG_RELAY")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let settings: Settings = config.try_deserialize()?;
        Ok(settings)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(invalid("Server port cannot be 0"));
        }

        let backend = &self.backend;
        match backend.kind {
            BackendType::Token if is_blank(backend.token.as_deref()) => {
                return Err(invalid("Backend type 'token' requires a token"));
            }
            BackendType::Login if is_blank(backend.access_key.as_deref()) => {
                return Err(invalid("Backend type 'login' requires an access_key"));
            }
            BackendType::Naifu | BackendType::SdWebui | BackendType::Comfyui
                if backend.endpoint().is_empty() =>
            {
                return Err(invalid(format!(
                    "Backend type '{:?}' requires an endpoint",
                    backend.kind
                )));
            }
            BackendType::Comfyui if is_blank(backend.model.as_deref()) => {
                return Err(invalid("Backend type 'comfyui' requires a model file name"));
            }
            _ => {}
        }

        for path in [&backend.workflow_text2image, &backend.workflow_image2image]
            .into_iter()
            .flatten()
        {
            if !path.is_file() {
                return Err(invalid(format!(
                    "Workflow template '{}' does not exist",
                    path.display()
                )));
            }
        }

        if self.dispatch.poll_interval_ms == 0 {
            return Err(invalid("dispatch.poll_interval_ms must be greater than 0"));
        }

        for (field, value) in [("strength", self.params.strength), ("noise", self.params.noise)] {
            if !(0.0..=1.0).contains(&value) {
                return Err(invalid(format!("params.{} must be within 0..=1", field)));
            }
        }

        Ok(())
    }
}

fn is_blank(value: Option<&str>) -> bool {
    value.map(|v| v.trim().is_empty()).unwrap_or(true)
}

fn invalid(message: impl Into<String>) -> AppError {
    AppError::Config(config::ConfigError::Message(message.into()))
}
