//! Boundary to the on-device inference library.
//!
//! The session never touches weights, tokens, or sampling directly. It only
//! asks an adapter to load a variant and asks the resulting handle for a reply.

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::model::variant::ModelVariant;
use crate::session::turn::Turn;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AdapterError {
    #[error("model not found: {0}")]
    ModelNotFound(String),

    #[error("download failed: {0}")]
    DownloadFailed(String),

    #[error("model load failed: {0}")]
    ModelLoadFailed(String),

    #[error("generation failed: {0}")]
    GenerationFailed(String),

    #[error("model returned no output")]
    EmptyOutput,
}

/// Receives load progress as a fraction in `[0, 1]`.
pub type ProgressCallback = Arc<dyn Fn(f64) + Send + Sync>;

/// Loads models.
#[async_trait]
pub trait ModelAdapter: Send + Sync {
    /// Load `variant`, preferring cached weights over a remote fetch.
    ///
    /// `progress` is called with non-decreasing fractions while the weights
    /// are fetched or opened.
    async fn load(
        &self,
        variant: ModelVariant,
        progress: ProgressCallback,
    ) -> Result<Arc<dyn ModelHandle>, AdapterError>;
}

/// A loaded model, ready to answer.
///
/// Handles carry model state, so callers must not run two `generate` calls on
/// the same handle at once.
#[async_trait]
pub trait ModelHandle: Send + Sync {
    /// Variant this handle was loaded from.
    fn variant(&self) -> ModelVariant;

    /// Produce the assistant reply to `user_text` given the turns before it.
    async fn generate(&self, history: &[Turn], user_text: &str) -> Result<String, AdapterError>;
}
