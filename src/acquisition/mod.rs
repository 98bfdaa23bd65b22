//! Captures in, normalized records out.

pub mod normalizer;
pub mod queue;

pub use normalizer::{parse_date, ResultNormalizer};
pub use queue::{AcquisitionQueue, BatchProgress, BatchTicket, CaptureOutcome, Settled};
