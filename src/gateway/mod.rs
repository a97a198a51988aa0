//! Gateway module - dispatch loop, credential cache and request relay

pub mod credentials;
pub mod dispatcher;
pub mod relay;

pub use credentials::{CredentialCache, CredentialSource};
pub use dispatcher::Dispatcher;
pub use relay::{GenerationRequest, Relay, UpscaleRequest};
