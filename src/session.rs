//! ScanSession: one scanner popup's state, from first capture to last save.
//!
//! ```text
//! SelectingProduct ─(select_candidate)─┐
//!                                      ▼
//!                Capturing ─(submit)→ Extracting{pending} ─(all settled)→ Reviewing
//!                    ▲                                                        │
//!                    └──────────────────────── reset ─────────────────────────┘
//! any phase ─(close)→ Closed
//! ```
//!
//! The session owns every component. Views render [`SessionSnapshot`]s and
//! call back into the methods here; nothing else mutates the state.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

use crate::acquisition::{AcquisitionQueue, BatchProgress, BatchTicket, ResultNormalizer, Settled};
use crate::capture::{
    CameraDevice, CameraFacing, CaptureController, CaptureError, CaptureRoute, CaptureSnapshot,
    PlatformCapabilities, RawCapture,
};
use crate::config::{CAMERA_RETRY_DELAY, MAX_CAPTURES_PER_BATCH, SAVE_ALL_DELAY};
use crate::edit::{EditError, EditSession};
use crate::persistence::{PersistenceCoordinator, PersistenceError, SaveSummary};
use crate::record::{RecordId, RecordKind, StructuredRecord};
use crate::service::{
    ExtractionService, ExtractionTarget, MedicineCandidate, MedicineSearch, NetworkError,
    PersistenceService,
};
use crate::store::{RecordStore, StoreError};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SessionError {
    #[error("Scan session is closed")]
    Closed,

    #[error("Finish or cancel the open edit first")]
    EditInProgress,

    #[error("Choose a product before capturing")]
    NoTarget,

    #[error("Product selection is only available when scanning products")]
    NotProductSession,

    #[error("No captures to submit")]
    EmptyBatch,

    #[error("Too many files: {count} selected, at most {max} per batch")]
    BatchTooLarge { count: usize, max: usize },

    #[error("No record is selected")]
    NoCurrentRecord,

    #[error(transparent)]
    Capture(#[from] CaptureError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Edit(#[from] EditError),

    #[error(transparent)]
    Persistence(#[from] PersistenceError),

    #[error(transparent)]
    Network(#[from] NetworkError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "phase", rename_all = "snake_case")]
pub enum SessionPhase {
    /// Product scans start by picking a catalogue entry.
    SelectingProduct,
    Capturing,
    Extracting { pending: usize },
    Reviewing,
    Closed,
}

/// What `pump` applied.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SessionEvent {
    RecordsAppended {
        filename: String,
        first_index: Option<usize>,
        count: usize,
    },
    CaptureFailed {
        filename: String,
        error: String,
    },
    BatchComplete {
        progress: BatchProgress,
    },
}

/// A picked file that could not become a capture.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FileRejection {
    pub filename: String,
    pub error: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FilesSubmitted {
    pub ticket: BatchTicket,
    pub rejected: Vec<FileRejection>,
}

/// Read-only projection for the view layer.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub kind: RecordKind,
    pub phase: SessionPhase,
    pub target: Option<ExtractionTarget>,
    pub capture: CaptureSnapshot,
    pub records: Vec<StructuredRecord>,
    pub current_index: Option<usize>,
    pub editing: Option<EditSession>,
    pub batch: BatchProgress,
    pub last_notice: Option<String>,
}

/// External collaborators, supplied by whoever mounts the scanner.
#[derive(Clone)]
pub struct Collaborators {
    pub extraction: Arc<dyn ExtractionService>,
    pub persistence: Arc<dyn PersistenceService>,
    pub search: Arc<dyn MedicineSearch>,
    pub camera: Arc<dyn CameraDevice>,
}

impl Collaborators {
    /// Use one service object for extraction, saving and search.
    pub fn from_service<S>(service: Arc<S>, camera: Arc<dyn CameraDevice>) -> Self
    where
        S: ExtractionService + PersistenceService + MedicineSearch + 'static,
    {
        Self {
            extraction: service.clone(),
            persistence: service.clone(),
            search: service,
            camera,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub capabilities: PlatformCapabilities,
    pub save_delay: Duration,
    pub camera_retry_delay: Duration,
    pub normalizer: ResultNormalizer,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            capabilities: PlatformCapabilities::desktop(),
            save_delay: SAVE_ALL_DELAY,
            camera_retry_delay: CAMERA_RETRY_DELAY,
            normalizer: ResultNormalizer::new(),
        }
    }
}

pub struct ScanSession {
    kind: RecordKind,
    target: Option<ExtractionTarget>,
    phase: SessionPhase,
    capture: CaptureController,
    queue: AcquisitionQueue,
    store: RecordStore,
    edit: Option<EditSession>,
    persistence: PersistenceCoordinator,
    search: Arc<dyn MedicineSearch>,
    /// Where the cursor went when this batch's first records arrived.
    batch_anchor: Option<usize>,
    last_notice: Option<String>,
}

impl ScanSession {
    pub fn new(kind: RecordKind, collaborators: Collaborators, options: SessionOptions) -> Self {
        let facing = match kind {
            RecordKind::Product => CameraFacing::User,
            RecordKind::Bill | RecordKind::Prescription => CameraFacing::Environment,
        };
        let capture = CaptureController::new(collaborators.camera, options.capabilities, facing)
            .with_retry_delay(options.camera_retry_delay);

        tracing::info!(kind = %kind, live_camera = options.capabilities.live_camera, "Scan session opened");
        Self {
            kind,
            target: initial_target(kind),
            phase: initial_phase(kind),
            capture,
            queue: AcquisitionQueue::new(collaborators.extraction, options.normalizer),
            store: RecordStore::new(),
            edit: None,
            persistence: PersistenceCoordinator::new(collaborators.persistence)
                .with_delay(options.save_delay),
            search: collaborators.search,
            batch_anchor: None,
            last_notice: None,
        }
    }

    pub fn kind(&self) -> RecordKind {
        self.kind
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    pub fn store(&self) -> &RecordStore {
        &self.store
    }

    pub fn last_notice(&self) -> Option<&str> {
        self.last_notice.as_deref()
    }

    pub fn is_closed(&self) -> bool {
        self.phase == SessionPhase::Closed
    }

    fn ensure_open(&self) -> Result<(), SessionError> {
        if self.is_closed() {
            Err(SessionError::Closed)
        } else {
            Ok(())
        }
    }

    fn ensure_not_editing(&self) -> Result<(), SessionError> {
        self.ensure_open()?;
        if self.edit.is_some() {
            Err(SessionError::EditInProgress)
        } else {
            Ok(())
        }
    }

    fn notice(&mut self, message: impl Into<String>) {
        self.last_notice = Some(message.into());
    }

    // ── Product selection ───────────────────────────────────

    pub async fn search_medicines(&self, term: &str) -> Result<Vec<MedicineCandidate>, SessionError> {
        self.ensure_open()?;
        if self.kind != RecordKind::Product {
            return Err(SessionError::NotProductSession);
        }
        Ok(self.search.search(term).await?)
    }

    /// Scan labels for `candidate` from now on.
    pub fn select_candidate(&mut self, candidate: MedicineCandidate) -> Result<(), SessionError> {
        self.ensure_open()?;
        if self.kind != RecordKind::Product {
            return Err(SessionError::NotProductSession);
        }
        tracing::info!(product = %candidate.id, "Product selected");
        self.target = Some(ExtractionTarget::Product { candidate });
        if self.phase == SessionPhase::SelectingProduct {
            self.phase = SessionPhase::Capturing;
        }
        Ok(())
    }

    // ── Capture ─────────────────────────────────────────────

    /// Open the camera, or learn that the native picker must be used.
    pub async fn begin_capture(&mut self) -> Result<CaptureRoute, SessionError> {
        self.ensure_open()?;
        if self.target.is_none() {
            return Err(SessionError::NoTarget);
        }
        Ok(self.capture.begin().await?)
    }

    pub async fn retry_camera(&mut self) -> Result<(), SessionError> {
        self.ensure_open()?;
        Ok(self.capture.retry().await?)
    }

    pub fn cancel_capture(&mut self) -> Result<(), SessionError> {
        self.ensure_open()?;
        self.capture.release();
        Ok(())
    }

    /// Take the current camera frame and submit it.
    pub fn capture_frame(&mut self) -> Result<BatchTicket, SessionError> {
        self.ensure_open()?;
        if self.target.is_none() {
            return Err(SessionError::NoTarget);
        }
        let capture = self.capture.capture_frame()?;
        self.submit(vec![capture])
    }

    /// Submit files chosen in the native picker. Unreadable or unsupported
    /// files are reported back; the rest are submitted.
    pub async fn submit_files(&mut self, paths: &[PathBuf]) -> Result<FilesSubmitted, SessionError> {
        self.ensure_open()?;
        if self.target.is_none() {
            return Err(SessionError::NoTarget);
        }
        if paths.len() > MAX_CAPTURES_PER_BATCH {
            return Err(SessionError::BatchTooLarge {
                count: paths.len(),
                max: MAX_CAPTURES_PER_BATCH,
            });
        }

        let mut captures = Vec::with_capacity(paths.len());
        let mut rejected = Vec::new();
        let mut first_error = None;
        for path in paths {
            match RawCapture::from_file(path).await {
                Ok(capture) => captures.push(capture),
                Err(e) => {
                    let filename = path
                        .file_name()
                        .map(|n| n.to_string_lossy().into_owned())
                        .unwrap_or_default();
                    tracing::warn!(file = %filename, error = %e, "Skipping picked file");
                    rejected.push(FileRejection {
                        filename,
                        error: e.to_string(),
                    });
                    first_error.get_or_insert(e);
                }
            }
        }

        if captures.is_empty() {
            return Err(match first_error {
                Some(e) => {
                    self.notice(e.to_string());
                    SessionError::Capture(e)
                }
                None => SessionError::EmptyBatch,
            });
        }
        if !rejected.is_empty() {
            self.notice(format!("{} file(s) could not be used", rejected.len()));
        }

        let ticket = self.submit(captures)?;
        Ok(FilesSubmitted { ticket, rejected })
    }

    /// Submit an image handed over as a base64 data URL.
    pub fn submit_data_url(&mut self, data_url: &str, filename: &str) -> Result<BatchTicket, SessionError> {
        self.ensure_open()?;
        let capture = RawCapture::from_data_url(data_url, filename)?;
        self.submit(vec![capture])
    }

    /// Start (or extend) a batch: one extraction request per capture.
    pub fn submit(&mut self, captures: Vec<RawCapture>) -> Result<BatchTicket, SessionError> {
        self.ensure_open()?;
        let target = self.target.as_ref().ok_or(SessionError::NoTarget)?;
        if captures.is_empty() {
            return Err(SessionError::EmptyBatch);
        }
        if captures.len() > MAX_CAPTURES_PER_BATCH {
            return Err(SessionError::BatchTooLarge {
                count: captures.len(),
                max: MAX_CAPTURES_PER_BATCH,
            });
        }

        self.capture.release();
        if self.queue.is_idle() {
            self.batch_anchor = None;
        }
        let ticket = self.queue.submit(target, captures);
        self.phase = SessionPhase::Extracting {
            pending: ticket.pending,
        };
        Ok(ticket)
    }

    // ── Acquisition results ─────────────────────────────────

    /// Wait for the next capture to settle and apply it.
    ///
    /// Returns no events when nothing is in flight.
    pub async fn pump(&mut self) -> Result<Vec<SessionEvent>, SessionError> {
        self.ensure_open()?;
        match self.queue.next_settled().await {
            Some(settled) => Ok(self.apply(settled)),
            None => Ok(Vec::new()),
        }
    }

    /// Pump until the current batch completes.
    pub async fn run_batch(&mut self) -> Result<Vec<SessionEvent>, SessionError> {
        let mut events = Vec::new();
        loop {
            let step = self.pump().await?;
            if step.is_empty() {
                break;
            }
            let done = step
                .iter()
                .any(|e| matches!(e, SessionEvent::BatchComplete { .. }));
            events.extend(step);
            if done {
                break;
            }
        }
        Ok(events)
    }

    fn apply(&mut self, settled: Settled) -> Vec<SessionEvent> {
        let Settled {
            outcome,
            batch_complete,
        } = settled;
        let mut events = Vec::with_capacity(2);

        match outcome.result {
            Ok(records) => {
                let count = records.len();
                let first_index = self.append_arrivals(records);
                events.push(SessionEvent::RecordsAppended {
                    filename: outcome.filename,
                    first_index,
                    count,
                });
            }
            Err(e) => events.push(SessionEvent::CaptureFailed {
                filename: outcome.filename,
                error: e.to_string(),
            }),
        }

        if batch_complete {
            let progress = self.queue.progress().clone();
            self.phase = if self.store.is_empty() {
                initial_phase_after_capture(self.target.as_ref())
            } else {
                SessionPhase::Reviewing
            };
            if progress.failed > 0 {
                self.notice(format!(
                    "{} of {} captures could not be processed",
                    progress.failed, progress.submitted
                ));
            } else if progress.records == 0 {
                self.notice("No records were detected in the captured images");
            }
            events.push(SessionEvent::BatchComplete { progress });
        } else {
            self.phase = SessionPhase::Extracting {
                pending: self.queue.pending(),
            };
        }
        events
    }

    /// Append one capture's records. The first arrival of a batch moves the
    /// cursor to its first record; later arrivals leave the cursor alone.
    fn append_arrivals(&mut self, records: Vec<StructuredRecord>) -> Option<usize> {
        if records.is_empty() {
            return None;
        }
        match self.batch_anchor {
            None => {
                let first = self.store.append(records);
                self.batch_anchor = first;
                first
            }
            Some(_) => {
                let cursor = self.store.current_index();
                let first = self.store.append(records);
                if let Some(cursor) = cursor {
                    // cursor came from this same store, so it is still valid
                    let _ = self.store.select(cursor);
                }
                first
            }
        }
    }

    // ── Review ──────────────────────────────────────────────

    pub fn next(&mut self) -> Result<bool, SessionError> {
        self.ensure_open()?;
        Ok(self.store.next())
    }

    pub fn prev(&mut self) -> Result<bool, SessionError> {
        self.ensure_open()?;
        Ok(self.store.prev())
    }

    pub fn select(&mut self, index: usize) -> Result<(), SessionError> {
        self.ensure_open()?;
        Ok(self.store.select(index)?)
    }

    pub fn remove_record(&mut self, index: usize) -> Result<StructuredRecord, SessionError> {
        self.ensure_not_editing()?;
        match self.store.remove(index) {
            Ok(removed) => Ok(removed),
            Err(e) => {
                if e == StoreError::LastRecord {
                    self.notice(e.to_string());
                }
                Err(e.into())
            }
        }
    }

    // ── Editing ─────────────────────────────────────────────

    pub fn open_edit(&mut self, index: usize) -> Result<&mut EditSession, SessionError> {
        self.ensure_open()?;
        if self.edit.is_some() {
            return Err(EditError::AlreadyOpen.into());
        }
        let session = EditSession::open(&self.store, index)?;
        Ok(self.edit.insert(session))
    }

    pub fn edit_mut(&mut self) -> Result<&mut EditSession, SessionError> {
        self.ensure_open()?;
        self.edit.as_mut().ok_or_else(|| EditError::NotOpen.into())
    }

    pub fn commit_edit(&mut self) -> Result<usize, SessionError> {
        self.ensure_open()?;
        let session = self.edit.take().ok_or(EditError::NotOpen)?;
        Ok(session.commit(&mut self.store)?)
    }

    pub fn cancel_edit(&mut self) -> Result<(), SessionError> {
        self.ensure_open()?;
        if let Some(session) = self.edit.take() {
            session.cancel();
        }
        Ok(())
    }

    // ── Persistence ─────────────────────────────────────────

    pub async fn save_record(&mut self, index: usize) -> Result<RecordId, SessionError> {
        self.ensure_not_editing()?;
        match self.persistence.save_one(&mut self.store, index).await {
            Ok(id) => {
                self.notice("Record saved");
                Ok(id)
            }
            Err(e) => {
                self.notice(e.to_string());
                Err(e.into())
            }
        }
    }

    pub async fn save_current(&mut self) -> Result<RecordId, SessionError> {
        let index = self
            .store
            .current_index()
            .ok_or(SessionError::NoCurrentRecord)?;
        self.save_record(index).await
    }

    pub async fn save_all(&mut self) -> Result<SaveSummary, SessionError> {
        self.ensure_not_editing()?;
        let summary = self.persistence.save_all(&mut self.store).await;
        self.notice(summary.message());
        Ok(summary)
    }

    // ── Lifecycle ───────────────────────────────────────────

    /// Drop everything and start over ("scan another").
    pub fn reset(&mut self) -> Result<(), SessionError> {
        self.ensure_open()?;
        self.queue.cancel_all();
        self.capture.release();
        self.store.clear();
        self.edit = None;
        self.batch_anchor = None;
        self.last_notice = None;
        self.phase = initial_phase_after_capture(self.target.as_ref());
        tracing::info!(kind = %self.kind, "Scan session reset");
        Ok(())
    }

    /// Tear down: release the camera, abandon in-flight work and any open
    /// edit. Every later call fails with `SessionError::Closed`.
    pub fn close(&mut self) {
        if self.is_closed() {
            return;
        }
        self.queue.cancel_all();
        self.capture.release();
        if let Some(edit) = self.edit.take() {
            edit.cancel();
        }
        self.phase = SessionPhase::Closed;
        tracing::info!(
            kind = %self.kind,
            records = self.store.len(),
            "Scan session closed"
        );
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            kind: self.kind,
            phase: self.phase,
            target: self.target.clone(),
            capture: self.capture.snapshot(),
            records: self.store.records().to_vec(),
            current_index: self.store.current_index(),
            editing: self.edit.clone(),
            batch: self.queue.progress().clone(),
            last_notice: self.last_notice.clone(),
        }
    }
}

fn initial_target(kind: RecordKind) -> Option<ExtractionTarget> {
    match kind {
        RecordKind::Bill => Some(ExtractionTarget::Bill),
        RecordKind::Prescription => Some(ExtractionTarget::Prescription),
        RecordKind::Product => None,
    }
}

fn initial_phase(kind: RecordKind) -> SessionPhase {
    initial_phase_after_capture(initial_target(kind).as_ref())
}

fn initial_phase_after_capture(target: Option<&ExtractionTarget>) -> SessionPhase {
    match target {
        Some(_) => SessionPhase::Capturing,
        None => SessionPhase::SelectingProduct,
    }
}
