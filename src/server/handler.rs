//! HTTP handlers for stored images
//!
//! - GET    /images/:name  stream one image
//! - DELETE /images/:name  remove one image
//! - GET    /list-images   listing with absolute URLs

use super::{ArtifactServer, ImageListing};
use crate::artifact::ArtifactId;
use crate::error::Result;
use axum::{
    extract::{Path, State},
    http::{header, HeaderMap},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::Serialize;
use std::sync::Arc;

/// Shared state for image handlers
#[derive(Clone)]
pub struct ImagesState {
    pub server: Arc<ArtifactServer>,
}

/// Create the images router
pub fn images_router(state: ImagesState) -> Router {
    Router::new()
        .route("/images/:name", get(serve_image).delete(delete_image))
        .route("/list-images", get(list_images))
        .with_state(state)
}

/// Value of the request's `Host` header, if any
pub(crate) fn request_host(headers: &HeaderMap) -> Option<&str> {
    headers.get(header::HOST).and_then(|v| v.to_str().ok())
}

#[derive(Serialize)]
struct ListResponse {
    images: Vec<ImageListing>,
    count: usize,
}

#[derive(Serialize)]
struct DeleteResponse {
    success: bool,
    deleted: String,
}

// =============================================================================
// Handlers
// =============================================================================

/// GET /images/:name
async fn serve_image(State(state): State<ImagesState>, Path(name): Path<String>) -> Result<Response> {
    state.server.serve(&name).await
}

/// DELETE /images/:name
async fn delete_image(
    State(state): State<ImagesState>,
    Path(name): Path<String>,
) -> Result<impl IntoResponse> {
    let id = ArtifactId::from_filename(&name)?;
    state.server.store().delete(id.as_str()).await?;
    tracing::info!(id = %id, "Image deleted");
    Ok(Json(DeleteResponse {
        success: true,
        deleted: id.filename(),
    }))
}

/// GET /list-images
async fn list_images(State(state): State<ImagesState>, headers: HeaderMap) -> Result<impl IntoResponse> {
    let images = state.server.list_all(request_host(&headers)).await?;
    Ok(Json(ListResponse {
        count: images.len(),
        images,
    }))
}
