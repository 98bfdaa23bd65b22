//! AcquisitionQueue: one independent extraction request per capture.
//!
//! Requests run concurrently on the tokio runtime and settle in any order.
//! The queue counts outstanding requests and flags the settlement that
//! brings the count to zero, so callers react to batch completion exactly
//! once, after every submission has settled.

use std::sync::Arc;

use serde::Serialize;
use tokio::task::JoinSet;

use super::normalizer::ResultNormalizer;
use crate::capture::RawCapture;
use crate::record::StructuredRecord;
use crate::service::{ExtractionService, ExtractionTarget, NetworkError};

/// Outcome of one capture's extraction request.
#[derive(Debug)]
pub struct CaptureOutcome {
    pub filename: String,
    pub batch_id: u64,
    pub result: Result<Vec<StructuredRecord>, NetworkError>,
}

/// One settled request, as returned by [`AcquisitionQueue::next_settled`].
#[derive(Debug)]
pub struct Settled {
    pub outcome: CaptureOutcome,
    /// True when this was the last outstanding request of the batch.
    pub batch_complete: bool,
}

/// Handle returned by `submit`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BatchTicket {
    pub batch_id: u64,
    pub submitted: usize,
    pub pending: usize,
}

/// Running totals for the current batch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchProgress {
    pub batch_id: u64,
    pub submitted: usize,
    pub settled: usize,
    pub records: usize,
    pub failed: usize,
}

pub struct AcquisitionQueue {
    service: Arc<dyn ExtractionService>,
    normalizer: ResultNormalizer,
    in_flight: JoinSet<CaptureOutcome>,
    pending: usize,
    progress: BatchProgress,
    next_batch_id: u64,
}

impl AcquisitionQueue {
    pub fn new(service: Arc<dyn ExtractionService>, normalizer: ResultNormalizer) -> Self {
        Self {
            service,
            normalizer,
            in_flight: JoinSet::new(),
            pending: 0,
            progress: BatchProgress::default(),
            next_batch_id: 1,
        }
    }

    /// Requests submitted and not yet settled.
    pub fn pending(&self) -> usize {
        self.pending
    }

    pub fn is_idle(&self) -> bool {
        self.pending == 0
    }

    pub fn progress(&self) -> &BatchProgress {
        &self.progress
    }

    /// Submit each capture as its own request.
    ///
    /// Captures submitted while a batch is still pending join that batch;
    /// otherwise a new batch starts. Must be called within a tokio runtime.
    pub fn submit(&mut self, target: &ExtractionTarget, captures: Vec<RawCapture>) -> BatchTicket {
        if self.pending == 0 {
            self.progress = BatchProgress {
                batch_id: self.next_batch_id,
                ..BatchProgress::default()
            };
            self.next_batch_id += 1;
        }
        let batch_id = self.progress.batch_id;

        for capture in captures {
            let service = Arc::clone(&self.service);
            let normalizer = self.normalizer.clone();
            let target = target.clone();
            let filename = capture.filename().to_string();

            tracing::debug!(batch_id, file = %filename, size = capture.len(), "Queueing capture");
            self.in_flight.spawn(async move {
                let result = service
                    .extract(&target, capture)
                    .await
                    .map(|payloads| normalizer.normalize_all(&target, &filename, payloads));
                CaptureOutcome {
                    filename,
                    batch_id,
                    result,
                }
            });
            self.pending += 1;
            self.progress.submitted += 1;
        }

        tracing::info!(
            batch_id,
            submitted = self.progress.submitted,
            pending = self.pending,
            "Batch submitted"
        );
        BatchTicket {
            batch_id,
            submitted: self.progress.submitted,
            pending: self.pending,
        }
    }

    /// Wait for the next request to settle, in completion order.
    ///
    /// Returns `None` when nothing is outstanding.
    pub async fn next_settled(&mut self) -> Option<Settled> {
        let joined = self.in_flight.join_next().await?;
        self.pending = self.pending.saturating_sub(1);
        self.progress.settled += 1;

        let outcome = match joined {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::error!(error = %e, "Extraction task did not finish");
                CaptureOutcome {
                    filename: String::new(),
                    batch_id: self.progress.batch_id,
                    result: Err(NetworkError::Transport(format!(
                        "extraction task failed: {e}"
                    ))),
                }
            }
        };

        match &outcome.result {
            Ok(records) => {
                self.progress.records += records.len();
                tracing::info!(
                    file = %outcome.filename,
                    records = records.len(),
                    pending = self.pending,
                    "Capture extracted"
                );
            }
            Err(e) => {
                self.progress.failed += 1;
                tracing::warn!(
                    file = %outcome.filename,
                    error = %e,
                    pending = self.pending,
                    "Capture extraction failed"
                );
            }
        }

        let batch_complete = self.pending == 0;
        if batch_complete {
            tracing::info!(
                batch_id = self.progress.batch_id,
                records = self.progress.records,
                failed = self.progress.failed,
                "Batch complete"
            );
        }
        Some(Settled {
            outcome,
            batch_complete,
        })
    }

    /// Abort everything in flight. Results of aborted requests are never
    /// returned, even if the response already arrived.
    pub fn cancel_all(&mut self) {
        if self.pending > 0 {
            tracing::info!(pending = self.pending, "Cancelling in-flight extractions");
        }
        self.in_flight.abort_all();
        // A fresh set guarantees nothing from the old one is ever joined.
        self.in_flight = JoinSet::new();
        self.pending = 0;
    }
}
