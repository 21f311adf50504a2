//! Generation coordinator
//!
//! Validates a prompt, runs the image generator exactly once, persists the
//! result, and applies retention. The generator is an expensive shared
//! device, so calls into it are serialized through a FIFO async mutex;
//! storage work runs outside the gate.
//!
//! ```text
//! prompt ─► validate ─► [gate: generator.generate] ─► store.create ─► retention.enforce
//! ```

use crate::artifact::{Artifact, ArtifactStore, EvictionReport, RetentionPolicy};
use crate::config::GeneratorConfig;
use crate::error::{Error, Result};
use crate::generator::{is_jpeg, GenerationParams, GeneratorError, ImageGenerator};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;

/// Turns prompts into stored artifacts
pub struct GenerationCoordinator {
    generator: Arc<dyn ImageGenerator>,
    store: Arc<ArtifactStore>,
    retention: RetentionPolicy,
    params: GenerationParams,
    max_prompt_chars: usize,
    gate: Mutex<()>,
}

impl GenerationCoordinator {
    pub fn new(
        generator: Arc<dyn ImageGenerator>,
        store: Arc<ArtifactStore>,
        retention: RetentionPolicy,
        config: &GeneratorConfig,
    ) -> Self {
        Self {
            generator,
            store,
            retention,
            params: GenerationParams::from(config),
            max_prompt_chars: config.max_prompt_chars,
            gate: Mutex::new(()),
        }
    }

    /// Generate and persist one image for `prompt`.
    ///
    /// Either returns a fully stored artifact or an error with nothing new
    /// visible in the store.
    pub async fn generate(&self, prompt: &str) -> Result<Artifact> {
        let prompt = self.validate_prompt(prompt)?;

        if !self.generator.is_ready() {
            return Err(Error::GeneratorUnavailable(format!(
                "{} is not loaded",
                self.generator.name()
            )));
        }

        let payload = {
            let _permit = self.gate.lock().await;
            let started = Instant::now();
            tracing::info!(prompt = %prompt, "Generating image");

            let result = self.generator.generate(prompt, &self.params).await;
            tracing::debug!(
                elapsed_ms = started.elapsed().as_millis() as u64,
                ok = result.is_ok(),
                "Generator returned"
            );
            result
        }
        .map_err(|e| match e {
            GeneratorError::Unavailable(msg) => Error::GeneratorUnavailable(msg),
            GeneratorError::Failed(msg) => {
                tracing::error!(prompt = %prompt, "Image generation failed: {}", msg);
                Error::GenerationFailed(msg)
            }
        })?;

        if payload.is_empty() {
            return Err(Error::GenerationFailed("generator returned no data".to_string()));
        }
        if !is_jpeg(&payload) {
            return Err(Error::GenerationFailed(
                "generator returned a non-JPEG payload".to_string(),
            ));
        }

        let artifact = self.store.create(&payload, prompt).await?;
        tracing::info!(id = %artifact.id, size = artifact.size_bytes, "Image stored");

        if let Err(e) = self.retention.enforce(&self.store).await {
            tracing::warn!("Retention pass after generation failed: {}", e);
        }

        Ok(artifact)
    }

    /// Run a retention pass on demand
    pub async fn cleanup(&self) -> Result<EvictionReport> {
        self.retention.enforce(&self.store).await
    }

    /// Whether the generator is loaded
    pub fn model_loaded(&self) -> bool {
        self.generator.is_ready()
    }

    /// Generator backend name
    pub fn generator_name(&self) -> &str {
        self.generator.name()
    }

    pub fn retention(&self) -> RetentionPolicy {
        self.retention
    }

    pub fn store(&self) -> &Arc<ArtifactStore> {
        &self.store
    }

    fn validate_prompt<'a>(&self, prompt: &'a str) -> Result<&'a str> {
        let trimmed = prompt.trim();
        if trimmed.is_empty() {
            return Err(Error::InvalidPrompt("No prompt provided".to_string()));
        }
        let chars = trimmed.chars().count();
        if chars > self.max_prompt_chars {
            return Err(Error::InvalidPrompt(format!(
                "Prompt is {} characters, limit is {}",
                chars, self.max_prompt_chars
            )));
        }
        Ok(trimmed)
    }
}
