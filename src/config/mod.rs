//! Configuration module - settings loaded from file and environment

pub mod settings;

pub use settings::{
    BackendConfig, BackendType, DispatchConfig, FeatureConfig, LoggingConfig, NsfwPolicy,
    ParamConfig, PromptConfig, ServerConfig, Settings,
};
