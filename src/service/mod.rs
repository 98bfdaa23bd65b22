//! The HTTP extraction/persistence service, seen from the core.
//!
//! The core only depends on the three traits below; `HttpServiceClient` is the
//! production implementation and `MockService` the in-memory one.

pub mod client;
pub mod mock;
pub mod wire;

pub use client::HttpServiceClient;
pub use mock::MockService;

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::capture::RawCapture;
use crate::persistence::PersistenceError;
use crate::record::{RecordKind, StructuredRecord};

/// Request-level failure talking to the service.
///
/// Missing or expired session cookies surface as `Unauthorized`, which the
/// core treats like any other network failure.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NetworkError {
    #[error("Cannot reach service at {0}")]
    Connection(String),

    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    #[error("Not signed in or session expired (HTTP {0})")]
    Unauthorized(u16),

    #[error("Service returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Malformed service response: {0}")]
    Malformed(String),

    #[error("Service error: {0}")]
    Service(String),

    #[error("HTTP client error: {0}")]
    Transport(String),
}

/// Caller-supplied context shared by every request of a session.
///
/// Built when the scanner is mounted and dropped with it.
#[derive(Debug, Clone, Default)]
pub struct ServiceContext {
    /// Raw `Cookie` header value carrying the signed-in session.
    pub session_cookie: Option<String>,
    /// Ask the service to enrich saved products from its medicine catalogue.
    pub auto_enrich: bool,
}

impl ServiceContext {
    /// Session cookie from `PHARMASCAN_SESSION_COOKIE`, enrichment off.
    pub fn from_env() -> Self {
        Self {
            session_cookie: crate::config::session_cookie_from_env(),
            auto_enrich: false,
        }
    }

    pub fn with_auto_enrich(mut self, enabled: bool) -> Self {
        self.auto_enrich = enabled;
        self
    }
}

/// A catalogue match offered before a product capture.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MedicineCandidate {
    pub id: String,
    pub name: String,
    pub manufacturer: Option<String>,
    pub category: String,
    pub composition: Option<String>,
}

/// What a capture is being extracted as.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ExtractionTarget {
    Bill,
    Prescription,
    /// Product label for a catalogue entry chosen beforehand.
    Product { candidate: MedicineCandidate },
}

impl ExtractionTarget {
    pub fn kind(&self) -> RecordKind {
        match self {
            Self::Bill => RecordKind::Bill,
            Self::Prescription => RecordKind::Prescription,
            Self::Product { .. } => RecordKind::Product,
        }
    }
}

#[async_trait]
pub trait ExtractionService: Send + Sync {
    /// Submit one capture. Returns the raw result payloads (zero or more;
    /// one photo may contain several bills).
    async fn extract(
        &self,
        target: &ExtractionTarget,
        capture: RawCapture,
    ) -> Result<Vec<serde_json::Value>, NetworkError>;
}

#[async_trait]
pub trait PersistenceService: Send + Sync {
    /// Save one record. Returns the server-assigned id.
    async fn save(&self, record: &StructuredRecord) -> Result<String, PersistenceError>;
}

#[async_trait]
pub trait MedicineSearch: Send + Sync {
    async fn search(&self, term: &str) -> Result<Vec<MedicineCandidate>, NetworkError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn traits_are_object_safe() {
        fn _assert_extraction(_: &dyn ExtractionService) {}
        fn _assert_persistence(_: &dyn PersistenceService) {}
        fn _assert_search(_: &dyn MedicineSearch) {}
    }

    #[test]
    fn target_maps_to_record_kind() {
        let candidate = MedicineCandidate {
            id: "m1".into(),
            name: "Paracetamol 500".into(),
            manufacturer: None,
            category: "General".into(),
            composition: None,
        };
        assert_eq!(ExtractionTarget::Bill.kind(), RecordKind::Bill);
        assert_eq!(ExtractionTarget::Prescription.kind(), RecordKind::Prescription);
        assert_eq!(
            ExtractionTarget::Product { candidate }.kind(),
            RecordKind::Product
        );
    }

    #[test]
    fn timeout_reports_sub_second_budgets() {
        let err = NetworkError::Timeout(Duration::from_millis(250));
        assert_eq!(err.to_string(), "Request timed out after 250ms");
    }

    #[test]
    fn unauthorized_is_described_as_session_problem() {
        let err = NetworkError::Unauthorized(401);
        assert!(err.to_string().contains("session expired"));
    }
}
