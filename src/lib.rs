//! Imation - prompt-to-image service with bounded artifact storage
//!
//! Imation accepts a text prompt over HTTP, runs a text-to-image model, and
//! stores the resulting JPEG as an addressable artifact that can be fetched,
//! listed, and deleted. The number of stored artifacts is bounded; the oldest
//! are evicted automatically.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                        HTTP API (axum)                        │
//! │  POST /generate-image   GET/DELETE /images/:name   /health   │
//! └──────────────┬───────────────────────────────┬───────────────┘
//!                │                               │
//! ┌──────────────▼──────────────┐   ┌────────────▼─────────────┐
//! │    GenerationCoordinator    │   │      ArtifactServer      │
//! │  - prompt validation        │   │  - streaming + headers   │
//! │  - single-flight gate       │   │  - listings with URLs    │
//! └──────┬───────────────┬──────┘   └────────────┬─────────────┘
//!        │               │                       │
//! ┌──────▼──────┐ ┌──────▼───────────────────────▼─────────────┐
//! │ImageGenerator│ │ ArtifactStore + RetentionPolicy            │
//! │ (SD WebUI)   │ │  - atomic publish, validated ids           │
//! └─────────────┘ │  - newest-N retention                      │
//!                 └─────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`artifact`]: identifiers, on-disk store, and retention
//! - [`generator`]: image generator trait and HTTP backend
//! - [`coordinator`]: prompt-to-artifact pipeline
//! - [`server`]: image streaming and listing
//! - [`api`]: HTTP router
//! - [`config`]: configuration management

pub mod api;
pub mod artifact;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod generator;
pub mod server;

pub use config::ImationConfig;
pub use error::{Error, Result};
