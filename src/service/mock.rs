//! In-memory service with scripted responses.
//!
//! Extraction outcomes are keyed by capture filename, save outcomes are
//! consumed in call order. Every call is logged so tests can assert on what
//! reached the "network".

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use super::{
    ExtractionService, ExtractionTarget, MedicineCandidate, MedicineSearch, NetworkError,
    PersistenceService,
};
use crate::capture::RawCapture;
use crate::persistence::PersistenceError;
use crate::record::StructuredRecord;

#[derive(Debug, Clone)]
struct ScriptedExtraction {
    delay: Duration,
    outcome: Result<Vec<Value>, NetworkError>,
}

#[derive(Default)]
pub struct MockService {
    extractions: Mutex<HashMap<String, ScriptedExtraction>>,
    save_outcomes: Mutex<VecDeque<Result<String, PersistenceError>>>,
    save_delay: Duration,
    candidates: Vec<MedicineCandidate>,
    submitted: Mutex<Vec<String>>,
    saved: Mutex<Vec<StructuredRecord>>,
    searches: Mutex<Vec<String>>,
    saves_in_flight: AtomicUsize,
    max_saves_in_flight: AtomicUsize,
    next_id: AtomicUsize,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl MockService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Captures named `filename` resolve to `payloads` after `delay`.
    pub fn with_extraction(self, filename: &str, delay: Duration, payloads: Vec<Value>) -> Self {
        lock(&self.extractions).insert(
            filename.to_string(),
            ScriptedExtraction {
                delay,
                outcome: Ok(payloads),
            },
        );
        self
    }

    /// Captures named `filename` fail with `error` after `delay`.
    pub fn with_extraction_failure(
        self,
        filename: &str,
        delay: Duration,
        error: NetworkError,
    ) -> Self {
        lock(&self.extractions).insert(
            filename.to_string(),
            ScriptedExtraction {
                delay,
                outcome: Err(error),
            },
        );
        self
    }

    /// Queue save outcomes, consumed one per `save` call. Once drained,
    /// saves succeed with generated ids.
    pub fn with_save_outcomes(
        self,
        outcomes: impl IntoIterator<Item = Result<String, PersistenceError>>,
    ) -> Self {
        lock(&self.save_outcomes).extend(outcomes);
        self
    }

    /// Every save takes at least `delay`.
    pub fn with_save_delay(mut self, delay: Duration) -> Self {
        self.save_delay = delay;
        self
    }

    pub fn with_candidates(mut self, candidates: Vec<MedicineCandidate>) -> Self {
        self.candidates = candidates;
        self
    }

    /// Filenames submitted for extraction, in call order.
    pub fn submitted(&self) -> Vec<String> {
        lock(&self.submitted).clone()
    }

    /// Records passed to `save`, in call order.
    pub fn saved(&self) -> Vec<StructuredRecord> {
        lock(&self.saved).clone()
    }

    pub fn searches(&self) -> Vec<String> {
        lock(&self.searches).clone()
    }

    /// Highest number of saves observed running at once.
    pub fn max_concurrent_saves(&self) -> usize {
        self.max_saves_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ExtractionService for MockService {
    async fn extract(
        &self,
        _target: &ExtractionTarget,
        capture: RawCapture,
    ) -> Result<Vec<Value>, NetworkError> {
        let filename = capture.filename().to_string();
        lock(&self.submitted).push(filename.clone());

        let scripted = lock(&self.extractions).get(&filename).cloned();
        match scripted {
            Some(script) => {
                tokio::time::sleep(script.delay).await;
                script.outcome
            }
            None => Ok(vec![json!({ "original_filename": filename })]),
        }
    }
}

#[async_trait]
impl PersistenceService for MockService {
    async fn save(&self, record: &StructuredRecord) -> Result<String, PersistenceError> {
        let running = self.saves_in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_saves_in_flight.fetch_max(running, Ordering::SeqCst);

        tokio::time::sleep(self.save_delay).await;
        lock(&self.saved).push(record.clone());
        let outcome = lock(&self.save_outcomes).pop_front().unwrap_or_else(|| {
            let n = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(format!("srv-{n}"))
        });

        self.saves_in_flight.fetch_sub(1, Ordering::SeqCst);
        outcome
    }
}

#[async_trait]
impl MedicineSearch for MockService {
    async fn search(&self, term: &str) -> Result<Vec<MedicineCandidate>, NetworkError> {
        let term = term.trim();
        if term.is_empty() {
            return Ok(Vec::new());
        }
        lock(&self.searches).push(term.to_string());

        let needle = term.to_lowercase();
        Ok(self
            .candidates
            .iter()
            .filter(|c| c.name.to_lowercase().contains(&needle))
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::RecordKind;

    fn capture(name: &str) -> RawCapture {
        RawCapture::from_bytes(vec![0xFF, 0xD8, 0xFF, 0xE0, 0, 0, 0, 0], name).unwrap()
    }

    #[tokio::test]
    async fn unscripted_capture_yields_one_payload() {
        let mock = MockService::new();
        let payloads = mock
            .extract(&ExtractionTarget::Bill, capture("a.jpg"))
            .await
            .unwrap();
        assert_eq!(payloads.len(), 1);
        assert_eq!(mock.submitted(), vec!["a.jpg"]);
    }

    #[tokio::test]
    async fn scripted_failure_is_returned() {
        let mock = MockService::new().with_extraction_failure(
            "bad.jpg",
            Duration::ZERO,
            NetworkError::Timeout(Duration::from_secs(120)),
        );
        let err = mock
            .extract(&ExtractionTarget::Bill, capture("bad.jpg"))
            .await
            .unwrap_err();
        assert_eq!(err, NetworkError::Timeout(Duration::from_secs(120)));
    }

    #[tokio::test]
    async fn save_outcomes_are_consumed_in_order() {
        let mock = MockService::new().with_save_outcomes([
            Err(PersistenceError::Rejected("nope".into())),
            Ok("b-1".into()),
        ]);
        let record = StructuredRecord::new(RecordKind::Bill);

        assert!(mock.save(&record).await.is_err());
        assert_eq!(mock.save(&record).await.unwrap(), "b-1");
        assert_eq!(mock.save(&record).await.unwrap(), "srv-1");
        assert_eq!(mock.saved().len(), 3);
        assert_eq!(mock.max_concurrent_saves(), 1);
    }

    #[tokio::test]
    async fn search_filters_by_name() {
        let mock = MockService::new().with_candidates(vec![MedicineCandidate {
            id: "m1".into(),
            name: "Dolo 650".into(),
            manufacturer: None,
            category: "General".into(),
            composition: None,
        }]);
        assert_eq!(mock.search("dolo").await.unwrap().len(), 1);
        assert!(mock.search("crocin").await.unwrap().is_empty());
        assert!(mock.search(" ").await.unwrap().is_empty());
        assert_eq!(mock.searches(), vec!["dolo", "crocin"]);
    }
}
