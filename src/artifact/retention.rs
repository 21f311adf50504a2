//! Count-bounded retention
//!
//! Keeps the `max_count` newest artifacts and evicts the rest. Planning is a
//! pure function over a listing snapshot; enforcement deletes best-effort,
//! so one stuck file never blocks the pass and is retried on the next one.

use super::store::ArtifactStore;
use super::types::{Artifact, ArtifactId};
use crate::error::{Error, Result};
use serde::Serialize;

/// Outcome of one enforcement pass
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct EvictionReport {
    /// Artifacts left in the snapshot after eviction
    pub retained: usize,
    /// Artifacts removed by this pass
    pub evicted: Vec<ArtifactId>,
    /// Artifacts marked for eviction that could not be removed
    pub failed: Vec<ArtifactId>,
}

/// Retention policy bounding the number of stored artifacts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionPolicy {
    max_count: usize,
}

impl RetentionPolicy {
    pub fn new(max_count: usize) -> Self {
        Self { max_count }
    }

    pub fn max_count(&self) -> usize {
        self.max_count
    }

    /// Ids to evict from `artifacts` (in any order) so that at most
    /// `max_count` of the newest remain.
    pub fn plan(&self, artifacts: &[Artifact]) -> Vec<ArtifactId> {
        if artifacts.len() <= self.max_count {
            return Vec::new();
        }
        let mut ordered: Vec<&Artifact> = artifacts.iter().collect();
        ordered.sort_by(|a, b| Artifact::newest_first(a, b));
        ordered
            .into_iter()
            .skip(self.max_count)
            .map(|a| a.id.clone())
            .collect()
    }

    /// Run one pass against `store`.
    ///
    /// Artifacts created after the snapshot is taken are left for the next pass.
    pub async fn enforce(&self, store: &ArtifactStore) -> Result<EvictionReport> {
        let snapshot = store.list().await?;
        let doomed = self.plan(&snapshot);
        if doomed.is_empty() {
            return Ok(EvictionReport {
                retained: snapshot.len(),
                ..Default::default()
            });
        }

        let mut report = EvictionReport::default();
        for id in doomed {
            match store.delete_id(&id).await {
                Ok(()) => report.evicted.push(id),
                // Someone else removed it first; the goal is met either way.
                Err(Error::NotFound(_)) => {
                    tracing::debug!(id = %id, "Artifact already gone during eviction");
                    report.evicted.push(id);
                }
                Err(e) => {
                    tracing::warn!(id = %id, "Failed to evict artifact: {}", e);
                    report.failed.push(id);
                }
            }
        }
        report.retained = snapshot.len() - report.evicted.len();

        tracing::info!(
            evicted = report.evicted.len(),
            failed = report.failed.len(),
            retained = report.retained,
            max = self.max_count,
            "Retention pass complete"
        );
        Ok(report)
    }
}
