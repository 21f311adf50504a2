//! Unified API router for Imation
//!
//! Merges the generation and image routers into a single axum `Router` with
//! CORS, request tracing, and consistent error bodies.
//!
//! ## Endpoint Map
//!
//! | Route                  | Method | Description                       |
//! |------------------------|--------|-----------------------------------|
//! | `/generate-image`      | POST   | Generate and store an image       |
//! | `/images/:name`        | GET    | Stream a stored image             |
//! | `/images/:name`        | DELETE | Remove a stored image             |
//! | `/list-images`         | GET    | List stored images                |
//! | `/health`              | GET    | Liveness and generator readiness  |
//! | `/cleanup`             | POST   | Run a retention pass              |

use crate::coordinator::GenerationCoordinator;
use crate::error::{Error, Result};
use crate::server::handler::request_host;
use crate::server::{images_router, ArtifactServer, ImagesState};
use axum::{
    extract::State,
    http::{header, HeaderMap, HeaderValue, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Combined application state
#[derive(Clone)]
pub struct AppState {
    pub coordinator: Arc<GenerationCoordinator>,
    pub server: Arc<ArtifactServer>,
}

/// Build the complete HTTP application
pub fn build_app(state: AppState, cors_origins: &[String]) -> Router {
    let images = images_router(ImagesState {
        server: state.server.clone(),
    });

    Router::new()
        .route("/generate-image", post(generate_image))
        .route("/health", get(health_check))
        .route("/cleanup", post(cleanup))
        .with_state(state)
        .merge(images)
        .layer(build_cors(cors_origins))
        .layer(TraceLayer::new_for_http())
}

// =============================================================================
// Error responses
// =============================================================================

#[derive(Serialize)]
struct ErrorBody {
    success: bool,
    error: String,
    kind: &'static str,
}

impl Error {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Error::InvalidPrompt(_) | Error::InvalidId(_) => StatusCode::BAD_REQUEST,
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::GeneratorUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Error::GenerationFailed(_)
            | Error::Storage { .. }
            | Error::Config(_)
            | Error::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Message safe to send to clients; storage paths stay in the logs.
    fn client_message(&self) -> String {
        match self {
            Error::Storage { op, source, .. } => {
                format!("Storage error during {}: {}", op, source.kind())
            }
            other => other.to_string(),
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::warn!(kind = self.kind(), "Request failed: {}", self);
        }
        let body = ErrorBody {
            success: false,
            error: self.client_message(),
            kind: self.kind(),
        };
        (status, Json(body)).into_response()
    }
}

// =============================================================================
// Handlers
// =============================================================================

#[derive(Debug, Deserialize)]
struct GenerateRequest {
    #[serde(default)]
    prompt: String,
}

#[derive(Serialize)]
struct GenerateResponse {
    success: bool,
    image_url: String,
    filename: String,
    id: String,
    size: u64,
    created_at: DateTime<Utc>,
}

/// POST /generate-image
async fn generate_image(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<GenerateRequest>,
) -> Result<impl IntoResponse> {
    let artifact = state.coordinator.generate(&request.prompt).await?;
    let filename = artifact.filename();
    Ok((
        StatusCode::CREATED,
        Json(GenerateResponse {
            success: true,
            image_url: state.server.url_for(request_host(&headers), &filename),
            filename,
            id: artifact.id.to_string(),
            size: artifact.size_bytes,
            created_at: artifact.created_at,
        }),
    ))
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    model_loaded: bool,
    generator: String,
    images_count: usize,
    max_images: usize,
    version: String,
}

/// GET /health
async fn health_check(State(state): State<AppState>) -> Result<impl IntoResponse> {
    let coordinator = &state.coordinator;
    let images_count = coordinator.store().count().await?;
    let model_loaded = coordinator.model_loaded();
    Ok(Json(HealthResponse {
        status: if model_loaded { "ok" } else { "degraded" },
        model_loaded,
        generator: coordinator.generator_name().to_string(),
        images_count,
        max_images: coordinator.retention().max_count(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    }))
}

#[derive(Serialize)]
struct CleanupResponse {
    success: bool,
    retained: usize,
    evicted: usize,
    failed: usize,
}

/// POST /cleanup
async fn cleanup(State(state): State<AppState>) -> Result<impl IntoResponse> {
    let report = state.coordinator.cleanup().await?;
    Ok(Json(CleanupResponse {
        success: report.failed.is_empty(),
        retained: report.retained,
        evicted: report.evicted.len(),
        failed: report.failed.len(),
    }))
}

// =============================================================================
// CORS
// =============================================================================

fn build_cors(origins: &[String]) -> CorsLayer {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::ACCEPT]);

    if origins.is_empty() {
        cors.allow_origin(Any)
    } else {
        let parsed: Vec<HeaderValue> = origins
            .iter()
            .filter_map(|o| match o.parse() {
                Ok(value) => Some(value),
                Err(_) => {
                    tracing::warn!(origin = %o, "Ignoring malformed CORS origin");
                    None
                }
            })
            .collect();
        cors.allow_origin(parsed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifact::{ArtifactStore, RetentionPolicy};
    use crate::config::GeneratorConfig;
    use crate::coordinator::test_support::FakeGenerator;
    use crate::generator::{GeneratorError, ImageGenerator};
    use axum::body::Body;
    use axum::http::Request;
    use tempfile::TempDir;
    use tower::ServiceExt;

    async fn make_app(generator: FakeGenerator, max_images: usize) -> (Router, AppState, TempDir) {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(ArtifactStore::open(dir.path()).await.unwrap());
        let generator: Arc<dyn ImageGenerator> = Arc::new(generator);
        let state = AppState {
            coordinator: Arc::new(GenerationCoordinator::new(
                generator,
                store.clone(),
                RetentionPolicy::new(max_images),
                &GeneratorConfig::default(),
            )),
            server: Arc::new(ArtifactServer::new(store, None)),
        };
        (build_app(state.clone(), &[]), state, dir)
    }

    async fn body_json(response: Response) -> serde_json::Value {
        let body = axum::body::to_bytes(response.into_body(), 1024 * 64)
            .await
            .unwrap();
        serde_json::from_slice(&body).unwrap()
    }

    fn generate_request(body: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/generate-image")
            .header("content-type", "application/json")
            .header("host", "localhost:5000")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_generate_then_fetch() {
        let (app, _state, _dir) = make_app(FakeGenerator::ready(), 50).await;

        let resp = app
            .clone()
            .oneshot(generate_request(r#"{"prompt": "cat"}"#))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::CREATED);
        let json = body_json(resp).await;
        assert_eq!(json["success"], true);
        let filename = json["filename"].as_str().unwrap().to_string();
        assert!(filename.starts_with("generated_"));
        assert!(filename.ends_with(".jpg"));
        assert_eq!(
            json["image_url"],
            format!("http://localhost:5000/images/{}", filename)
        );
        assert!(json["created_at"].is_string());

        let resp = app
            .oneshot(
                Request::builder()
                    .uri(format!("/images/{}", filename))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = axum::body::to_bytes(resp.into_body(), 1024).await.unwrap();
        assert_eq!(body.to_vec(), FakeGenerator::payload_for("cat"));
    }

    #[tokio::test]
    async fn test_generate_empty_prompt() {
        let (app, state, _dir) = make_app(FakeGenerator::ready(), 50).await;
        for body in [r#"{"prompt": "  "}"#, r#"{}"#] {
            let resp = app.clone().oneshot(generate_request(body)).await.unwrap();
            assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
            let json = body_json(resp).await;
            assert_eq!(json["success"], false);
            assert_eq!(json["kind"], "INVALID_PROMPT");
        }
        assert_eq!(state.server.store().count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_generate_malformed_json() {
        let (app, _state, _dir) = make_app(FakeGenerator::ready(), 50).await;
        let resp = app.oneshot(generate_request("{not json")).await.unwrap();
        assert!(resp.status().is_client_error());
    }

    #[tokio::test]
    async fn test_generate_unavailable() {
        let (app, state, _dir) = make_app(FakeGenerator::unloaded(), 50).await;
        let resp = app
            .oneshot(generate_request(r#"{"prompt": "cat"}"#))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body_json(resp).await["kind"], "GENERATOR_UNAVAILABLE");
        assert_eq!(state.server.store().count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_generate_failure() {
        let (app, _state, _dir) = make_app(
            FakeGenerator::failing(GeneratorError::Failed("out of memory".into())),
            50,
        )
        .await;
        let resp = app
            .oneshot(generate_request(r#"{"prompt": "cat"}"#))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let json = body_json(resp).await;
        assert_eq!(json["kind"], "GENERATION_FAILED");
        assert!(json["error"].as_str().unwrap().contains("out of memory"));
    }

    #[tokio::test]
    async fn test_health() {
        let (app, _state, _dir) = make_app(FakeGenerator::ready(), 7).await;
        let resp = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let json = body_json(resp).await;
        assert_eq!(json["status"], "ok");
        assert_eq!(json["model_loaded"], true);
        assert_eq!(json["generator"], "fake");
        assert_eq!(json["images_count"], 0);
        assert_eq!(json["max_images"], 7);
    }

    #[tokio::test]
    async fn test_health_degraded() {
        let (app, _state, _dir) = make_app(FakeGenerator::unloaded(), 7).await;
        let resp = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let json = body_json(resp).await;
        assert_eq!(json["status"], "degraded");
        assert_eq!(json["model_loaded"], false);
    }

    #[tokio::test]
    async fn test_cleanup() {
        let (app, state, _dir) = make_app(FakeGenerator::ready(), 2).await;
        let store = state.server.store();
        for i in 0..5u8 {
            store.create(&[0xFF, 0xD8, 0xFF, i], "seed").await.unwrap();
        }

        let resp = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/cleanup")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let json = body_json(resp).await;
        assert_eq!(json["success"], true);
        assert_eq!(json["evicted"], 3);
        assert_eq!(json["retained"], 2);
        assert_eq!(json["failed"], 0);
        assert_eq!(store.count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_retention_through_api() {
        let (app, state, _dir) = make_app(FakeGenerator::ready(), 2).await;
        let mut filenames = Vec::new();
        for prompt in ["a", "b", "c"] {
            let resp = app
                .clone()
                .oneshot(generate_request(&format!(r#"{{"prompt": "{}"}}"#, prompt)))
                .await
                .unwrap();
            filenames.push(body_json(resp).await["filename"].as_str().unwrap().to_string());
        }

        let listed: Vec<String> = state
            .server
            .list_all(None)
            .await
            .unwrap()
            .into_iter()
            .map(|l| l.filename)
            .collect();
        assert_eq!(listed, vec![filenames[2].clone(), filenames[1].clone()]);
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(Error::InvalidPrompt("x".into()).status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(Error::InvalidId("x".into()).status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(Error::NotFound("x".into()).status_code(), StatusCode::NOT_FOUND);
        assert_eq!(
            Error::GeneratorUnavailable("x".into()).status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            Error::storage("read", "/tmp/x", std::io::ErrorKind::Other.into()).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[tokio::test]
    async fn test_storage_error_hides_path() {
        let err = Error::storage(
            "read",
            "/srv/imation/images/generated_1_0000beef.jpg",
            std::io::ErrorKind::PermissionDenied.into(),
        );
        let resp = err.into_response();
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let json = body_json(resp).await;
        assert_eq!(json["kind"], "STORAGE_ERROR");
        let message = json["error"].as_str().unwrap();
        assert!(message.contains("read"));
        assert!(message.contains("permission denied"));
        assert!(!message.contains("/srv/imation"));
    }

    #[test]
    fn test_build_cors_with_origins() {
        let _cors = build_cors(&[
            "http://localhost:3000".to_string(),
            "bad\norigin".to_string(),
        ]);
    }
}
