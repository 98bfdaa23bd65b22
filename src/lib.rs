//! Capture, extract, review and save pharmacy documents.
//!
//! A [`ScanSession`] drives one scanner popup: images come in from the camera
//! or a file picker, each is sent to the extraction service on its own,
//! results are normalized into [`StructuredRecord`]s, reviewed and edited in
//! a [`RecordStore`], then saved one by one or all together.

pub mod acquisition;
pub mod capture;
pub mod config;
pub mod edit;
pub mod persistence;
pub mod record;
pub mod service;
pub mod session;
pub mod store;

pub use acquisition::{AcquisitionQueue, ResultNormalizer};
pub use capture::{CaptureController, CaptureError, DeviceAccessError, RawCapture};
pub use edit::{EditError, EditSession};
pub use persistence::{PersistenceCoordinator, PersistenceError, SaveSummary};
pub use record::{FieldMap, FieldValue, LineItem, RecordId, RecordKind, StructuredRecord};
pub use service::{
    ExtractionTarget, HttpServiceClient, MedicineCandidate, NetworkError, ServiceContext,
};
pub use session::{Collaborators, ScanSession, SessionError, SessionEvent, SessionOptions};
pub use store::{RecordStore, StoreError};

use tracing_subscriber::EnvFilter;

/// Install a fmt subscriber filtered by `RUST_LOG`, or the crate default.
///
/// Does nothing if a global subscriber is already set.
pub fn init_tracing() {
    let installed = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config::default_log_filter())),
        )
        .try_init()
        .is_ok();

    if installed {
        tracing::info!("{} v{}", config::APP_NAME, config::APP_VERSION);
    }
}
