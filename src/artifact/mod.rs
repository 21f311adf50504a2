//! Artifact storage
//!
//! Generated images are persisted under a single directory, addressed by
//! validated identifiers, and bounded in number by a retention policy.

pub mod retention;
pub mod store;
pub mod types;

pub use retention::{EvictionReport, RetentionPolicy};
pub use store::ArtifactStore;
pub use types::{Artifact, ArtifactId, IMAGE_CONTENT_TYPE};
