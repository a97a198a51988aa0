//! Queue module - concurrency admission for generation tasks

pub mod gate;

pub use gate::{ConcurrencyGate, TaskGuard};
