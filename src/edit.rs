//! EditSession: a cancellable overlay over one stored record.
//!
//! The session works on a structural clone of the record. Nothing touches the
//! store until `commit`, which writes the whole scratch back in one `replace`.

use serde::Serialize;
use thiserror::Error;

use crate::record::{Field, FieldMap, FieldValue, LineItem, RecordId, StructuredRecord};
use crate::store::{RecordStore, StoreError};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EditError {
    #[error("An edit is already open")]
    AlreadyOpen,

    #[error("No edit is open")]
    NotOpen,

    #[error("Invalid field path: {0}")]
    InvalidPath(String),

    #[error("No line item at index {0}")]
    LineItemOutOfRange(usize),

    #[error("{field} expects a number, got {value:?}")]
    InvalidValue { field: String, value: String },

    #[error("Record at index {0} changed while it was being edited")]
    RecordChanged(usize),

    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EditSession {
    index: usize,
    original_id: RecordId,
    scratch: StructuredRecord,
}

impl EditSession {
    /// Clone the record at `index` into a fresh scratch.
    pub fn open(store: &RecordStore, index: usize) -> Result<Self, EditError> {
        let record = store.get(index).ok_or(StoreError::IndexOutOfRange {
            index,
            len: store.len(),
        })?;
        tracing::debug!(index, record = %record.id(), "Edit opened");
        Ok(Self {
            index,
            original_id: record.id().clone(),
            scratch: record.clone(),
        })
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn scratch(&self) -> &StructuredRecord {
        &self.scratch
    }

    /// Set `"key"` or `"group.key"`. A missing group is created.
    pub fn set_field(&mut self, path: &str, value: impl Into<FieldValue>) -> Result<(), EditError> {
        let invalid = || EditError::InvalidPath(path.to_string());
        let segments: Vec<&str> = path.split('.').collect();
        if segments.iter().any(|s| s.trim().is_empty()) {
            return Err(invalid());
        }

        let fields = &mut self.scratch.fields;
        match segments.as_slice() {
            [key] => {
                if matches!(fields.get(key), Some(Field::Group(_))) {
                    return Err(invalid());
                }
                fields.insert(*key, value);
            }
            [group, key] => {
                if matches!(fields.get(group), Some(Field::Value(_))) {
                    return Err(invalid());
                }
                if fields.group(group).is_none() {
                    fields.insert_group(*group, FieldMap::new());
                }
                let target = fields.group_mut(group).ok_or_else(invalid)?;
                if matches!(target.get(key), Some(Field::Group(_))) {
                    return Err(invalid());
                }
                target.insert(*key, value);
            }
            _ => return Err(invalid()),
        }
        Ok(())
    }

    /// Set one attribute of a line item. `name`, `quantity`, `unitPrice` and
    /// `amount` are the item's own columns; anything else goes to metadata.
    pub fn set_line_item(
        &mut self,
        index: usize,
        field: &str,
        value: impl Into<FieldValue>,
    ) -> Result<(), EditError> {
        let value = value.into();
        let item = self
            .scratch
            .line_items
            .get_mut(index)
            .ok_or(EditError::LineItemOutOfRange(index))?;

        let number = || {
            value.as_number().ok_or_else(|| EditError::InvalidValue {
                field: field.to_string(),
                value: value.to_string(),
            })
        };
        match field {
            "name" => item.name = value.to_string(),
            "quantity" => item.quantity = number()?,
            "unitPrice" => item.unit_price = number()?,
            "amount" => item.amount = number()?,
            "" => return Err(EditError::InvalidPath(field.to_string())),
            key => {
                item.metadata.insert(key, value);
            }
        }
        Ok(())
    }

    /// Append a line item. Returns its position.
    pub fn add_line_item(&mut self, template: LineItem) -> usize {
        self.scratch.line_items.push(template);
        self.scratch.line_items.len() - 1
    }

    pub fn remove_line_item(&mut self, index: usize) -> Result<LineItem, EditError> {
        if index >= self.scratch.line_items.len() {
            return Err(EditError::LineItemOutOfRange(index));
        }
        Ok(self.scratch.line_items.remove(index))
    }

    /// Write the scratch back at the original index and close the session.
    ///
    /// Fails without touching the store if the slot no longer holds the
    /// record that was opened.
    pub fn commit(self, store: &mut RecordStore) -> Result<usize, EditError> {
        match store.get(self.index) {
            Some(record) if record.id() == &self.original_id => {}
            Some(_) | None => return Err(EditError::RecordChanged(self.index)),
        }
        store.replace(self.index, self.scratch)?;
        tracing::info!(index = self.index, "Edit committed");
        Ok(self.index)
    }

    /// Discard the scratch.
    pub fn cancel(self) {
        tracing::debug!(index = self.index, "Edit cancelled");
    }
}
