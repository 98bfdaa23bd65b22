//! RecordStore: ordered records plus a "current" cursor.
//!
//! `current_index` is `Some` exactly when the store is non-empty and always
//! points at a valid record.

use serde::Serialize;
use thiserror::Error;

use crate::record::{RecordId, StructuredRecord};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("Cannot delete the only record")]
    LastRecord,

    #[error("No record at index {index} (store holds {len})")]
    IndexOutOfRange { index: usize, len: usize },
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordStore {
    records: Vec<StructuredRecord>,
    current_index: Option<usize>,
}

impl RecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&StructuredRecord> {
        self.records.get(index)
    }

    pub fn records(&self) -> &[StructuredRecord] {
        &self.records
    }

    pub fn current_index(&self) -> Option<usize> {
        self.current_index
    }

    pub fn current(&self) -> Option<&StructuredRecord> {
        self.records.get(self.current_index?)
    }

    pub fn position_of(&self, id: &RecordId) -> Option<usize> {
        self.records.iter().position(|r| r.id() == id)
    }

    /// Indices of records not yet saved, in store order.
    pub fn unpersisted_indices(&self) -> Vec<usize> {
        self.records
            .iter()
            .enumerate()
            .filter(|(_, r)| !r.is_persisted())
            .map(|(i, _)| i)
            .collect()
    }

    /// Add records at the end and point the cursor at the first of them.
    ///
    /// Returns the index of the first appended record, or `None` (and no
    /// cursor change) when `records` is empty.
    pub fn append(&mut self, records: Vec<StructuredRecord>) -> Option<usize> {
        if records.is_empty() {
            return None;
        }
        let first = self.records.len();
        self.records.extend(records);
        self.current_index = Some(first);
        tracing::debug!(first, len = self.records.len(), "Records appended");
        Some(first)
    }

    /// Move forward one record. Returns whether the cursor moved.
    pub fn next(&mut self) -> bool {
        match self.current_index {
            Some(i) if i + 1 < self.records.len() => {
                self.current_index = Some(i + 1);
                true
            }
            _ => false,
        }
    }

    /// Move back one record. Returns whether the cursor moved.
    pub fn prev(&mut self) -> bool {
        match self.current_index {
            Some(i) if i > 0 => {
                self.current_index = Some(i - 1);
                true
            }
            _ => false,
        }
    }

    /// Jump straight to `index`.
    pub fn select(&mut self, index: usize) -> Result<(), StoreError> {
        self.check_index(index)?;
        self.current_index = Some(index);
        Ok(())
    }

    /// Remove the record at `index`, refusing to empty the store.
    pub fn remove(&mut self, index: usize) -> Result<StructuredRecord, StoreError> {
        self.check_index(index)?;
        if self.records.len() == 1 {
            return Err(StoreError::LastRecord);
        }

        let removed = self.records.remove(index);
        let last = self.records.len() - 1;
        let current = self.current_index.unwrap_or(0);
        let repositioned = if index <= current && current > 0 {
            current - 1
        } else {
            current.min(last)
        };
        self.current_index = Some(repositioned);

        tracing::debug!(index, current = repositioned, len = self.records.len(), "Record removed");
        Ok(removed)
    }

    /// Replace the content at `index`, keeping the stored record's identity
    /// and persisted flag. Returns the previous content.
    pub fn replace(
        &mut self,
        index: usize,
        mut record: StructuredRecord,
    ) -> Result<StructuredRecord, StoreError> {
        self.check_index(index)?;
        let slot = &mut self.records[index];
        record.adopt_identity(slot);
        Ok(std::mem::replace(slot, record))
    }

    /// Record a successful save at `index`.
    pub(crate) fn mark_persisted(
        &mut self,
        index: usize,
        server_id: String,
    ) -> Result<&RecordId, StoreError> {
        self.check_index(index)?;
        let record = &mut self.records[index];
        record.mark_persisted(server_id);
        Ok(record.id())
    }

    pub fn clear(&mut self) {
        self.records.clear();
        self.current_index = None;
    }

    fn check_index(&self, index: usize) -> Result<(), StoreError> {
        if index < self.records.len() {
            Ok(())
        } else {
            Err(StoreError::IndexOutOfRange {
                index,
                len: self.records.len(),
            })
        }
    }
}
