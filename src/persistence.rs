//! PersistenceCoordinator: save one record, or every unsaved record in turn.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

use crate::config::SAVE_ALL_DELAY;
use crate::record::RecordId;
use crate::service::{NetworkError, PersistenceService};
use crate::store::RecordStore;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PersistenceError {
    #[error(transparent)]
    Network(#[from] NetworkError),

    #[error("Save rejected: {0}")]
    Rejected(String),

    #[error("Record {0} has no server reference to update")]
    MissingUpstreamId(String),

    #[error("No record at index {0}")]
    RecordNotFound(usize),
}

/// One record that failed during `save_all`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveFailure {
    pub index: usize,
    pub record_id: String,
    pub error: String,
}

/// Aggregate result of `save_all`.
///
/// `success_count + fail_count` equals the number of records that were
/// unsaved when the run started. Already-saved records are only counted in
/// `skipped`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveSummary {
    pub success_count: usize,
    pub fail_count: usize,
    pub skipped: usize,
    pub failures: Vec<SaveFailure>,
}

impl SaveSummary {
    pub fn attempted(&self) -> usize {
        self.success_count + self.fail_count
    }

    /// One-line text for the clerk.
    pub fn message(&self) -> String {
        match (self.attempted(), self.fail_count) {
            (0, _) => "All records are already saved".to_string(),
            (n, 0) => format!("Saved {n} record{}", if n == 1 { "" } else { "s" }),
            (n, failed) => format!(
                "Saved {} of {n} records, {failed} failed",
                self.success_count
            ),
        }
    }
}

pub struct PersistenceCoordinator {
    service: Arc<dyn PersistenceService>,
    delay: Duration,
}

impl PersistenceCoordinator {
    pub fn new(service: Arc<dyn PersistenceService>) -> Self {
        Self {
            service,
            delay: SAVE_ALL_DELAY,
        }
    }

    /// Pause between consecutive requests in `save_all`.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Save the record at `index`.
    ///
    /// On success the record is marked persisted and carries the server id;
    /// on failure it is left exactly as it was so the save can be retried.
    pub async fn save_one(
        &self,
        store: &mut RecordStore,
        index: usize,
    ) -> Result<RecordId, PersistenceError> {
        let record = store
            .get(index)
            .ok_or(PersistenceError::RecordNotFound(index))?;
        let kind = record.kind;

        let server_id = match self.service.save(record).await {
            Ok(id) => id,
            Err(e) => {
                tracing::warn!(index, kind = %kind, error = %e, "Save failed");
                return Err(e);
            }
        };

        let id = store
            .mark_persisted(index, server_id)
            .map_err(|_| PersistenceError::RecordNotFound(index))?
            .clone();
        tracing::info!(index, kind = %kind, id = %id, "Record saved");
        Ok(id)
    }

    /// Save every unsaved record, one at a time, continuing past failures.
    pub async fn save_all(&self, store: &mut RecordStore) -> SaveSummary {
        let targets = store.unpersisted_indices();
        let mut summary = SaveSummary {
            skipped: store.len() - targets.len(),
            ..SaveSummary::default()
        };
        tracing::info!(
            pending = targets.len(),
            skipped = summary.skipped,
            "Saving all records"
        );

        for (n, index) in targets.into_iter().enumerate() {
            if n > 0 && !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            let record_id = store
                .get(index)
                .map(|r| r.id().to_string())
                .unwrap_or_default();

            match self.save_one(store, index).await {
                Ok(_) => summary.success_count += 1,
                Err(e) => {
                    summary.fail_count += 1;
                    summary.failures.push(SaveFailure {
                        index,
                        record_id,
                        error: e.to_string(),
                    });
                }
            }
        }

        tracing::info!(
            success = summary.success_count,
            failed = summary.fail_count,
            skipped = summary.skipped,
            "Save all finished"
        );
        summary
    }
}
