//! HTTP image generator backend
//!
//! Talks to a Stable Diffusion WebUI compatible server:
//! - `GET  /sdapi/v1/sd-models` to check the model is loaded
//! - `POST /sdapi/v1/txt2img`   to generate, images returned base64 encoded
//!
//! JPEG output is requested per call through `override_settings`, so the
//! server's own defaults are left alone.

use super::{GenerationParams, GeneratorError, ImageGenerator};
use crate::config::GeneratorConfig;
use async_trait::async_trait;
use base64::Engine;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

const MODELS_PATH: &str = "/sdapi/v1/sd-models";
const TXT2IMG_PATH: &str = "/sdapi/v1/txt2img";

#[derive(Debug, Serialize)]
struct Txt2ImgRequest<'a> {
    prompt: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    negative_prompt: Option<&'a str>,
    steps: u32,
    cfg_scale: f32,
    width: u32,
    height: u32,
    batch_size: u32,
    n_iter: u32,
    send_images: bool,
    save_images: bool,
    override_settings: OverrideSettings,
    override_settings_restore_afterwards: bool,
}

#[derive(Debug, Serialize)]
struct OverrideSettings {
    samples_format: &'static str,
    jpeg_quality: u8,
}

#[derive(Debug, Deserialize)]
struct Txt2ImgResponse {
    #[serde(default)]
    images: Vec<String>,
}

/// Image generator backed by a remote txt2img HTTP API
pub struct HttpImageGenerator {
    client: reqwest::Client,
    base_url: String,
    ready: AtomicBool,
}

impl HttpImageGenerator {
    /// Create a generator for the configured backend
    pub fn new(config: &GeneratorConfig) -> Result<Self, GeneratorError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs.max(1)))
            .build()
            .map_err(|e| GeneratorError::Unavailable(format!("HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            ready: AtomicBool::new(false),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

#[async_trait]
impl ImageGenerator for HttpImageGenerator {
    async fn load(&self) -> Result<(), GeneratorError> {
        let response = self
            .client
            .get(self.url(MODELS_PATH))
            .send()
            .await
            .map_err(|e| GeneratorError::Unavailable(format!("{}: {}", self.base_url, e)))?;

        if !response.status().is_success() {
            return Err(GeneratorError::Unavailable(format!(
                "{} answered {}",
                self.base_url,
                response.status()
            )));
        }

        self.ready.store(true, Ordering::Release);
        tracing::info!(backend = %self.base_url, "Image generator ready");
        Ok(())
    }

    fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    async fn generate(
        &self,
        prompt: &str,
        params: &GenerationParams,
    ) -> Result<Vec<u8>, GeneratorError> {
        if !self.is_ready() {
            return Err(GeneratorError::Unavailable("model not loaded".to_string()));
        }

        let request = Txt2ImgRequest {
            prompt,
            negative_prompt: params.negative_prompt.as_deref(),
            steps: params.steps,
            cfg_scale: params.guidance_scale,
            width: params.width,
            height: params.height,
            batch_size: 1,
            n_iter: 1,
            send_images: true,
            save_images: false,
            override_settings: OverrideSettings {
                samples_format: "jpg",
                jpeg_quality: params.jpeg_quality,
            },
            override_settings_restore_afterwards: true,
        };

        let response = self
            .client
            .post(self.url(TXT2IMG_PATH))
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_connect() {
                    GeneratorError::Unavailable(format!("{}: {}", self.base_url, e))
                } else if e.is_timeout() {
                    GeneratorError::Failed("generation timed out".to_string())
                } else {
                    GeneratorError::Failed(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let snippet: String = body.chars().take(200).collect();
            return Err(GeneratorError::Failed(format!("backend answered {}: {}", status, snippet)));
        }

        let parsed: Txt2ImgResponse = response
            .json()
            .await
            .map_err(|e| GeneratorError::Failed(format!("malformed response: {}", e)))?;

        let encoded = parsed
            .images
            .into_iter()
            .next()
            .ok_or_else(|| GeneratorError::Failed("backend returned no images".to_string()))?;

        decode_image(&encoded)
    }

    fn name(&self) -> &str {
        "sd-webui"
    }
}

/// Decode a base64 image, tolerating a `data:` URI prefix
fn decode_image(encoded: &str) -> Result<Vec<u8>, GeneratorError> {
    let data = match encoded.split_once(',') {
        Some((header, data)) if header.starts_with("data:") => data,
        _ => encoded,
    };
    base64::engine::general_purpose::STANDARD
        .decode(data.trim())
        .map_err(|e| GeneratorError::Failed(format!("invalid base64 image: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        http::StatusCode,
        routing::{get, post},
        Json, Router,
    };
    use std::sync::{Arc, Mutex};

    const JPEG: &[u8] = &[0xFF, 0xD8, 0xFF, 0xE0, 1, 2, 3];

    /// Start a fake backend on an ephemeral port, returning its base URL
    async fn spawn_backend(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{}", addr)
    }

    fn generator_for(base_url: &str) -> HttpImageGenerator {
        let config = GeneratorConfig {
            base_url: base_url.to_string(),
            timeout_secs: 5,
            ..Default::default()
        };
        HttpImageGenerator::new(&config).unwrap()
    }

    fn ok_backend(captured: Arc<Mutex<Option<serde_json::Value>>>) -> Router {
        Router::new()
            .route(
                MODELS_PATH,
                get(|| async { Json(serde_json::json!([{"title": "v1-5"}])) }),
            )
            .route(
                TXT2IMG_PATH,
                post(move |Json(body): Json<serde_json::Value>| {
                    let captured = captured.clone();
                    async move {
                        *captured.lock().unwrap() = Some(body);
                        let encoded = base64::engine::general_purpose::STANDARD.encode(JPEG);
                        Json(serde_json::json!({"images": [encoded], "info": "{}"}))
                    }
                }),
            )
    }

    #[tokio::test]
    async fn test_load_and_generate() {
        let captured = Arc::new(Mutex::new(None));
        let base = spawn_backend(ok_backend(captured.clone())).await;
        let generator = generator_for(&base);

        assert!(!generator.is_ready());
        generator.load().await.unwrap();
        assert!(generator.is_ready());

        let params = GenerationParams::default();
        let bytes = generator.generate("a cat", &params).await.unwrap();
        assert_eq!(bytes, JPEG);

        let body = captured.lock().unwrap().clone().unwrap();
        assert_eq!(body["prompt"], "a cat");
        assert_eq!(body["steps"], 15);
        assert_eq!(body["cfg_scale"], 7.5);
        assert_eq!(body["override_settings"]["samples_format"], "jpg");
        assert!(body.get("negative_prompt").is_none());
    }

    #[tokio::test]
    async fn test_generate_before_load_is_unavailable() {
        let generator = generator_for("http://127.0.0.1:9");
        let err = generator
            .generate("x", &GenerationParams::default())
            .await
            .unwrap_err();
        assert!(matches!(err, GeneratorError::Unavailable(_)));
    }

    #[tokio::test]
    async fn test_load_unreachable_backend() {
        // Bind then drop to get a port nobody listens on.
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let generator = generator_for(&format!("http://{}", addr));
        let err = generator.load().await.unwrap_err();
        assert!(matches!(err, GeneratorError::Unavailable(_)));
        assert!(!generator.is_ready());
    }

    #[tokio::test]
    async fn test_backend_error_is_failure() {
        let router = Router::new()
            .route(MODELS_PATH, get(|| async { Json(serde_json::json!([])) }))
            .route(
                TXT2IMG_PATH,
                post(|| async { (StatusCode::INTERNAL_SERVER_ERROR, "CUDA out of memory") }),
            );
        let base = spawn_backend(router).await;
        let generator = generator_for(&base);
        generator.load().await.unwrap();

        let err = generator
            .generate("x", &GenerationParams::default())
            .await
            .unwrap_err();
        match err {
            GeneratorError::Failed(msg) => assert!(msg.contains("CUDA out of memory")),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_empty_images_is_failure() {
        let router = Router::new()
            .route(MODELS_PATH, get(|| async { Json(serde_json::json!([])) }))
            .route(
                TXT2IMG_PATH,
                post(|| async { Json(serde_json::json!({"images": []})) }),
            );
        let base = spawn_backend(router).await;
        let generator = generator_for(&base);
        generator.load().await.unwrap();

        let err = generator
            .generate("x", &GenerationParams::default())
            .await
            .unwrap_err();
        assert!(matches!(err, GeneratorError::Failed(_)));
    }

    #[tokio::test]
    async fn test_models_endpoint_error_is_unavailable() {
        let router = Router::new().route(
            MODELS_PATH,
            get(|| async { StatusCode::SERVICE_UNAVAILABLE }),
        );
        let base = spawn_backend(router).await;
        let generator = generator_for(&base);
        assert!(matches!(
            generator.load().await.unwrap_err(),
            GeneratorError::Unavailable(_)
        ));
    }

    #[test]
    fn test_decode_image_variants() {
        let encoded = base64::engine::general_purpose::STANDARD.encode(JPEG);
        assert_eq!(decode_image(&encoded).unwrap(), JPEG);
        assert_eq!(
            decode_image(&format!("data:image/jpeg;base64,{}", encoded)).unwrap(),
            JPEG
        );
        assert!(decode_image("not base64!!").is_err());
    }
}
