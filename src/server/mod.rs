//! Artifact server
//!
//! Streams stored images to clients and builds public listings with
//! absolute links.

pub mod handler;

pub use handler::{images_router, ImagesState};

use crate::artifact::{ArtifactId, ArtifactStore, IMAGE_CONTENT_TYPE};
use crate::error::{Error, Result};
use axum::{
    body::Body,
    http::{header, StatusCode},
    response::Response,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tokio_util::io::ReaderStream;

const NO_CACHE: &str = "no-cache, no-store, must-revalidate";

/// Entry in the public image listing
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ImageListing {
    pub filename: String,
    pub size: u64,
    pub modified: DateTime<Utc>,
    pub url: String,
}

/// Read-side view over the artifact store
pub struct ArtifactServer {
    store: Arc<ArtifactStore>,
    public_base_url: Option<String>,
}

impl ArtifactServer {
    pub fn new(store: Arc<ArtifactStore>, public_base_url: Option<String>) -> Self {
        Self {
            store,
            public_base_url: public_base_url.map(|u| u.trim_end_matches('/').to_string()),
        }
    }

    pub fn store(&self) -> &Arc<ArtifactStore> {
        &self.store
    }

    /// Stream the artifact named by `requested` (bare id or `<id>.jpg`).
    pub async fn serve(&self, requested: &str) -> Result<Response> {
        let id = ArtifactId::from_filename(requested)?;
        let (file, artifact) = self.store.open_artifact(id.as_str()).await?;
        tracing::debug!(id = %artifact.id, size = artifact.size_bytes, "Serving image");

        Response::builder()
            .status(StatusCode::OK)
            .header(header::CONTENT_TYPE, IMAGE_CONTENT_TYPE)
            .header(header::CONTENT_LENGTH, artifact.size_bytes)
            .header(header::CACHE_CONTROL, NO_CACHE)
            .header(header::PRAGMA, "no-cache")
            .header(header::EXPIRES, "0")
            .header(header::X_CONTENT_TYPE_OPTIONS, "nosniff")
            .body(Body::from_stream(ReaderStream::new(file)))
            .map_err(|e| Error::Internal(format!("building image response: {}", e)))
    }

    /// Listing of every stored artifact, newest first.
    ///
    /// `host` is the request's `Host` header, used when no public base URL
    /// is configured.
    pub async fn list_all(&self, host: Option<&str>) -> Result<Vec<ImageListing>> {
        let base = self.base_url(host);
        let listings = self
            .store
            .list()
            .await?
            .into_iter()
            .map(|a| {
                let filename = a.filename();
                ImageListing {
                    url: format!("{}/images/{}", base, filename),
                    filename,
                    size: a.size_bytes,
                    modified: a.created_at,
                }
            })
            .collect();
        Ok(listings)
    }

    /// Absolute URL for a published filename
    pub fn url_for(&self, host: Option<&str>, filename: &str) -> String {
        format!("{}/images/{}", self.base_url(host), filename)
    }

    fn base_url(&self, host: Option<&str>) -> String {
        if let Some(base) = &self.public_base_url {
            return base.clone();
        }
        match host {
            Some(host) if is_plain_host(host) => format!("http://{}", host),
            Some(host) => {
                tracing::debug!(host = %host, "Ignoring malformed Host header");
                "http://localhost".to_string()
            }
            None => "http://localhost".to_string(),
        }
    }
}

/// `name[:port]` or `[v6]:port` and nothing else: no userinfo, path, or query.
fn is_plain_host(host: &str) -> bool {
    !host.is_empty()
        && host.len() <= 255
        && host
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | ':' | '[' | ']'))
}
