//! Local model backend.
//!
//! Resolves a variant's weights in two steps: a cached GGUF file under the
//! models directory first, then a remote fetch. The inference library itself
//! is stubbed; the handle renders the real prompt but returns a canned reply
//! so the rest of the app can be exercised without native code.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info};

use crate::config::ModelConfig;
use crate::model::adapter::{AdapterError, ModelAdapter, ModelHandle, ProgressCallback};
use crate::model::variant::ModelVariant;
use crate::session::turn::Turn;

/// Where a handle's weights came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WeightSource {
    /// Opened from a cached file.
    Cached(PathBuf),
    /// Fetched from the remote repository.
    Remote(String),
}

/// Adapter backed by files in `ModelConfig::models_dir`.
pub struct LocalModelAdapter {
    config: ModelConfig,
    system_prompt: String,
}

impl LocalModelAdapter {
    pub fn new(config: ModelConfig, system_prompt: impl Into<String>) -> Self {
        Self {
            config,
            system_prompt: system_prompt.into(),
        }
    }

    /// Path the cached weights for `variant` are expected at.
    pub fn cached_path(&self, variant: ModelVariant) -> PathBuf {
        self.config.models_dir.join(variant.spec().local_file_name)
    }

    /// Stub fetch: reports progress in equal chunks.
    ///
    /// A real implementation streams the GGUF from the model repository and
    /// quantizes it to the variant's level.
    async fn fetch(&self, variant: ModelVariant, progress: &ProgressCallback) -> Result<(), AdapterError> {
        let spec = variant.spec();
        let chunks = self.config.download_chunks.max(1);
        let delay = Duration::from_millis(self.config.chunk_delay_ms);

        info!(
            model = spec.model_identifier,
            quantization = %spec.quantization,
            chunks,
            "Fetching model"
        );

        for i in 1..=chunks {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            let fraction = f64::from(i) / f64::from(chunks);
            debug!(fraction, "Fetch progress");
            progress(fraction);
        }

        Ok(())
    }
}

#[async_trait]
impl ModelAdapter for LocalModelAdapter {
    async fn load(
        &self,
        variant: ModelVariant,
        progress: ProgressCallback,
    ) -> Result<Arc<dyn ModelHandle>, AdapterError> {
        let path = self.cached_path(variant);

        let source = match tokio::fs::metadata(&path).await {
            Ok(meta) => {
                if meta.len() == 0 {
                    return Err(AdapterError::ModelLoadFailed(format!(
                        "{} is empty",
                        path.display()
                    )));
                }
                info!(path = %path.display(), bytes = meta.len(), "Opening cached model");
                progress(1.0);
                WeightSource::Cached(path)
            }
            Err(_) if self.config.allow_download => {
                self.fetch(variant, &progress).await?;
                WeightSource::Remote(variant.spec().model_identifier.to_string())
            }
            Err(_) => {
                return Err(AdapterError::ModelNotFound(format!(
                    "{} (downloads disabled)",
                    path.display()
                )));
            }
        };

        Ok(Arc::new(LocalModel {
            variant,
            source,
            system_prompt: self.system_prompt.clone(),
            reply_delay: Duration::from_millis(self.config.reply_delay_ms),
        }))
    }
}

/// Stub model handle.
///
/// In a real implementation this would own the llama context and KV cache.
pub struct LocalModel {
    variant: ModelVariant,
    source: WeightSource,
    system_prompt: String,
    reply_delay: Duration,
}

impl LocalModel {
    pub fn source(&self) -> &WeightSource {
        &self.source
    }
}

#[async_trait]
impl ModelHandle for LocalModel {
    fn variant(&self) -> ModelVariant {
        self.variant
    }

    async fn generate(&self, history: &[Turn], user_text: &str) -> Result<String, AdapterError> {
        let template = self.variant.spec().prompt_template;
        let prompt = template.render(&self.system_prompt, history, user_text);

        // Stub tokenization: ~1 token per 4 chars.
        let prompt_tokens = (prompt.len() / 4).max(1);
        debug!(
            model = %self.variant,
            prompt_tokens,
            history = history.len(),
            "Generating reply"
        );

        if !self.reply_delay.is_zero() {
            tokio::time::sleep(self.reply_delay).await;
        }

        Ok(format!(
            "[{} stub, {prompt_tokens} prompt tokens] You said: {}",
            self.variant,
            user_text.trim()
        ))
    }
}
