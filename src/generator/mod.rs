//! Image generator interface
//!
//! The model that turns a prompt into pixels is an external collaborator.
//! It is loaded once per process, reports readiness, and is invoked with
//! fixed quality parameters taken from configuration.

pub mod http;

pub use http::HttpImageGenerator;

use crate::config::GeneratorConfig;
use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

/// Failure reported by an image generator
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GeneratorError {
    /// The model is not loaded or the backend cannot be reached
    #[error("unavailable: {0}")]
    Unavailable(String),

    /// The model ran and failed
    #[error("failed: {0}")]
    Failed(String),
}

/// Fixed generation parameters passed through to the backend
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GenerationParams {
    pub steps: u32,
    pub guidance_scale: f32,
    pub width: u32,
    pub height: u32,
    pub jpeg_quality: u8,
    pub negative_prompt: Option<String>,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self::from(&GeneratorConfig::default())
    }
}

impl From<&GeneratorConfig> for GenerationParams {
    fn from(config: &GeneratorConfig) -> Self {
        Self {
            steps: config.steps,
            guidance_scale: config.guidance_scale,
            width: config.width,
            height: config.height,
            jpeg_quality: config.jpeg_quality,
            negative_prompt: config.negative_prompt.clone(),
        }
    }
}

/// Pluggable text-to-image backend.
///
/// Implementations are shared across requests but need not be reentrant:
/// callers serialize `generate` through a single gate.
#[async_trait]
pub trait ImageGenerator: Send + Sync {
    /// Load or connect to the model. Called once at startup.
    async fn load(&self) -> Result<(), GeneratorError>;

    /// Whether `load` has succeeded.
    fn is_ready(&self) -> bool;

    /// Produce one JPEG image for `prompt`.
    async fn generate(
        &self,
        prompt: &str,
        params: &GenerationParams,
    ) -> Result<Vec<u8>, GeneratorError>;

    /// Human-readable backend name (used in logs and health output).
    fn name(&self) -> &str;
}

/// JPEG start-of-image marker
pub fn is_jpeg(bytes: &[u8]) -> bool {
    bytes.len() >= 3 && bytes[..3] == [0xFF, 0xD8, 0xFF]
}
