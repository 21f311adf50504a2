//! Imation configuration management

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Main Imation configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ImationConfig {
    /// HTTP server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Artifact storage configuration
    #[serde(default)]
    pub storage: StorageConfig,

    /// Image generator configuration
    #[serde(default)]
    pub generator: GeneratorConfig,
}

impl ImationConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        Self::from_toml(&content)
    }

    /// Parse configuration from a TOML string
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| Error::Config(format!("Invalid configuration: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the service cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.storage.max_images == 0 {
            return Err(Error::Config(
                "storage.max_images must be at least 1".to_string(),
            ));
        }
        if self.generator.base_url.trim().is_empty() {
            return Err(Error::Config("generator.base_url is empty".to_string()));
        }
        if self.generator.steps == 0 {
            return Err(Error::Config("generator.steps must be at least 1".to_string()));
        }
        if self.generator.width == 0 || self.generator.height == 0 {
            return Err(Error::Config(
                "generator.width and generator.height must be non-zero".to_string(),
            ));
        }
        if self.generator.max_prompt_chars == 0 {
            return Err(Error::Config(
                "generator.max_prompt_chars must be at least 1".to_string(),
            ));
        }
        if let Some(bad) = self.server.cors_origins.iter().find(|o| !is_origin(o)) {
            return Err(Error::Config(format!(
                "server.cors_origins entry {:?} is not an origin like https://host[:port]",
                bad
            )));
        }
        Ok(())
    }
}

/// `http(s)://host[:port]` with no path, query, or trailing slash
fn is_origin(origin: &str) -> bool {
    let Some(authority) = origin
        .strip_prefix("https://")
        .or_else(|| origin.strip_prefix("http://"))
    else {
        return false;
    };
    !authority.is_empty()
        && authority
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | ':' | '[' | ']'))
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host to bind to
    pub host: String,

    /// Port to listen on
    pub port: u16,

    /// Base URL used in returned image links (e.g. `https://img.example.com`).
    /// When unset, links are built from the request's `Host` header, which the
    /// client controls; set this for any deployment reachable from outside.
    pub public_base_url: Option<String>,

    /// Allowed CORS origins (empty = any)
    pub cors_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 5000,
            public_base_url: None,
            cors_origins: Vec::new(),
        }
    }
}

/// Artifact storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory holding generated images
    pub images_dir: PathBuf,

    /// Maximum number of retained images; the oldest are evicted beyond this
    pub max_images: usize,
}

impl Default for StorageConfig {
    fn default() -> Self {
        let base = dirs_next::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("imation");

        Self {
            images_dir: base.join("images"),
            max_images: 50,
        }
    }
}

/// Image generator configuration
///
/// Quality knobs are passed through to the backend unchanged.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneratorConfig {
    /// Base URL of the txt2img backend
    pub base_url: String,

    /// Request timeout in seconds
    pub timeout_secs: u64,

    /// Maximum prompt length in characters
    pub max_prompt_chars: usize,

    /// Diffusion step count
    pub steps: u32,

    /// Classifier-free guidance scale
    pub guidance_scale: f32,

    /// Output width in pixels
    pub width: u32,

    /// Output height in pixels
    pub height: u32,

    /// JPEG quality requested from the backend
    pub jpeg_quality: u8,

    /// Optional negative prompt applied to every generation
    pub negative_prompt: Option<String>,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:7860".to_string(),
            timeout_secs: 300,
            max_prompt_chars: 1000,
            steps: 15,
            guidance_scale: 7.5,
            width: 512,
            height: 512,
            jpeg_quality: 95,
            negative_prompt: None,
        }
    }
}
