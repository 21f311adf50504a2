//! Artifact data types
//!
//! An [`ArtifactId`] is the only way to address a stored image. Parsing one
//! is the path-traversal defense: anything that is not a short run of
//! `[A-Za-z0-9_-]` is rejected before a path is ever built from it.

use crate::error::{Error, Result};
use chrono::{DateTime, TimeZone, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicI64, Ordering};

/// Prefix of every identifier minted by this service.
pub const ID_PREFIX: &str = "generated";

/// File extension of the single supported encoding.
pub const IMAGE_EXTENSION: &str = "jpg";

/// MIME type served for every artifact.
pub const IMAGE_CONTENT_TYPE: &str = "image/jpeg";

/// Longest identifier accepted from clients.
pub const MAX_ID_LEN: usize = 128;

const SUFFIX_LEN: usize = 8;

/// Validated artifact identifier
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ArtifactId(String);

impl ArtifactId {
    /// Validate untrusted input as an identifier.
    pub fn parse(raw: &str) -> Result<Self> {
        if raw.is_empty() {
            return Err(Error::InvalidId("identifier is empty".to_string()));
        }
        if raw.len() > MAX_ID_LEN {
            return Err(Error::InvalidId(format!(
                "identifier longer than {} characters",
                MAX_ID_LEN
            )));
        }
        if let Some(bad) = raw
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || *c == '_' || *c == '-'))
        {
            return Err(Error::InvalidId(format!(
                "identifier contains disallowed character {:?}",
                bad
            )));
        }
        Ok(Self(raw.to_string()))
    }

    /// Accept either a bare identifier or its published filename (`<id>.jpg`).
    pub fn from_filename(name: &str) -> Result<Self> {
        let stem = name
            .strip_suffix(IMAGE_EXTENSION)
            .and_then(|s| s.strip_suffix('.'))
            .unwrap_or(name);
        Self::parse(stem)
    }

    /// Mint a new identifier for the given creation time.
    pub(crate) fn generate(created_at_micros: i64) -> Self {
        let suffix: u32 = rand::thread_rng().gen();
        Self(format!(
            "{}_{:016}_{:0width$x}",
            ID_PREFIX,
            created_at_micros,
            suffix,
            width = SUFFIX_LEN
        ))
    }

    /// Creation time encoded in an identifier minted by [`ArtifactId::generate`].
    ///
    /// Returns `None` for identifiers that do not follow the minted layout.
    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        let rest = self.0.strip_prefix(ID_PREFIX)?.strip_prefix('_')?;
        let (micros, suffix) = rest.split_once('_')?;
        if suffix.len() != SUFFIX_LEN || !suffix.chars().all(|c| c.is_ascii_hexdigit()) {
            return None;
        }
        let micros: i64 = micros.parse().ok()?;
        Utc.timestamp_micros(micros).single()
    }

    /// Published filename for this identifier
    pub fn filename(&self) -> String {
        format!("{}.{}", self.0, IMAGE_EXTENSION)
    }

    /// Sidecar metadata filename for this identifier
    pub fn meta_filename(&self) -> String {
        format!("{}.json", self.0)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ArtifactId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for ArtifactId {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<ArtifactId> for String {
    fn from(id: ArtifactId) -> Self {
        id.0
    }
}

/// A generated image persisted to storage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Artifact {
    /// Unique identifier, never reused
    pub id: ArtifactId,
    /// Creation time, encoded in the identifier
    pub created_at: DateTime<Utc>,
    /// Size of the persisted payload
    pub size_bytes: u64,
    /// Prompt that produced the image
    pub source_prompt: Option<String>,
}

impl Artifact {
    /// Published filename
    pub fn filename(&self) -> String {
        self.id.filename()
    }

    /// Listing order: newest first, ties broken by ascending id.
    pub fn newest_first(a: &Artifact, b: &Artifact) -> std::cmp::Ordering {
        b.created_at
            .cmp(&a.created_at)
            .then_with(|| a.id.cmp(&b.id))
    }
}

/// Hands out strictly increasing creation timestamps (Unix microseconds).
///
/// Wall-clock based, but never repeats or goes backwards within a process,
/// so artifacts minted in the same second remain totally ordered.
#[derive(Debug, Default)]
pub struct IdClock {
    last: AtomicI64,
}

impl IdClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Never hand out a timestamp at or below `micros` again.
    pub fn observe(&self, micros: i64) {
        self.last.fetch_max(micros, Ordering::AcqRel);
    }

    /// Next timestamp: `max(now, last + 1)`.
    pub fn next_micros(&self) -> i64 {
        let now = Utc::now().timestamp_micros();
        let mut last = self.last.load(Ordering::Relaxed);
        loop {
            let next = now.max(last + 1);
            match self
                .last
                .compare_exchange_weak(last, next, Ordering::AcqRel, Ordering::Relaxed)
            {
                Ok(_) => return next,
                Err(actual) => last = actual,
            }
        }
    }
}
