//! Prompt module - sanitation, denylist filtering and canonical tag lists

pub mod forbidden;
pub mod normalizer;

use serde::{Deserialize, Serialize};

pub use forbidden::{ForbiddenRule, ForbiddenSet};
pub use normalizer::normalize;

/// Where configured prompt fragments go relative to user tags
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Placement {
    Before,
    #[default]
    After,
}

/// Which bracket family carries emphasis for the target backend
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BracketDialect {
    /// `(...)` emphasis; unescaped `{}` are rewritten to `()`
    WebUi,
    /// `{...}` emphasis; unescaped `()` are rewritten to `{}`
    Neutral,
}

/// Normalized, deduplicated prompt used for every backend
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CanonicalPrompt {
    pub positive_tags: Vec<String>,
    pub negative_tags: Vec<String>,
    /// Positive tags after sanitation but before default augmentation
    pub sanitized_echo: String,
}

impl CanonicalPrompt {
    pub fn positive(&self) -> String {
        self.positive_tags.join(", ")
    }

    pub fn negative(&self) -> String {
        self.negative_tags.join(", ")
    }
}
