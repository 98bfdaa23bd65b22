//! Structured records: the reviewable unit produced from one extraction result.
//!
//! A record is a bill, a prescription, or a product entry. It carries an
//! ordered map of named scalar fields (with one level of grouping, e.g.
//! `patient.name`), an ordered list of line items, and its persistence state.
//!
//! Identity rules:
//! - New records get a client-temporary id (`temp-<uuid>`).
//! - The only id mutation is temporary → server-assigned, on first save.
//! - `persisted` is monotonic: false → true, never back.
//!
//! `Clone` on every type here is a full structural copy (all data is owned),
//! which is what edit sessions rely on for their scratch copy.

use std::sync::LazyLock;

use chrono::NaiveDate;
use regex::Regex;
use serde::ser::{SerializeMap, Serializer};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Prefix for client-generated ids of records not yet saved.
pub const TEMP_ID_PREFIX: &str = "temp-";

// ═══════════════════════════════════════════════════════════
// RecordKind / RecordId
// ═══════════════════════════════════════════════════════════

/// What kind of document a record was extracted from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    Bill,
    Prescription,
    Product,
}

impl RecordKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Bill => "bill",
            Self::Prescription => "prescription",
            Self::Product => "product",
        }
    }
}

impl std::fmt::Display for RecordKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Record identity: client-temporary until the service assigns one.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(tag = "state", content = "value", rename_all = "snake_case")]
pub enum RecordId {
    Temporary(String),
    Persisted(String),
}

impl RecordId {
    /// Fresh `temp-<uuid>` id.
    pub fn temporary() -> Self {
        Self::Temporary(format!("{TEMP_ID_PREFIX}{}", Uuid::new_v4()))
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Temporary(id) | Self::Persisted(id) => id,
        }
    }

    pub fn is_temporary(&self) -> bool {
        matches!(self, Self::Temporary(_))
    }
}

impl std::fmt::Display for RecordId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ═══════════════════════════════════════════════════════════
// Field values
// ═══════════════════════════════════════════════════════════

/// A scalar field value.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum FieldValue {
    Text(String),
    Number(f64),
    Date(NaiveDate),
}

impl FieldValue {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Numeric view: numbers as-is, text parsed leniently (`"₹1,200.50"` → 1200.5).
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            Self::Text(s) => parse_amount(s),
            Self::Date(_) => None,
        }
    }

    pub fn as_date(&self) -> Option<NaiveDate> {
        match self {
            Self::Date(d) => Some(*d),
            _ => None,
        }
    }
}

impl std::fmt::Display for FieldValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Text(s) => f.write_str(s),
            Self::Number(n) => write!(f, "{n}"),
            Self::Date(d) => write!(f, "{}", d.format("%Y-%m-%d")),
        }
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<f64> for FieldValue {
    fn from(value: f64) -> Self {
        Self::Number(value)
    }
}

impl From<NaiveDate> for FieldValue {
    fn from(value: NaiveDate) -> Self {
        Self::Date(value)
    }
}

static AMOUNT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"-?\d[\d,]*(?:\.\d+)?").unwrap());

/// Parse a money/quantity string such as `₹ 1,250.00/-` or `Rs.500`.
///
/// The first numeric token wins; currency prefixes, grouping commas and
/// trailing `/-` are ignored.
pub fn parse_amount(raw: &str) -> Option<f64> {
    let token = AMOUNT_RE.find(raw)?;
    token.as_str().replace(',', "").parse::<f64>().ok()
}

/// A top-level entry: either a scalar or a named group of scalars.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Field {
    Value(FieldValue),
    Group(FieldMap),
}

// ═══════════════════════════════════════════════════════════
// FieldMap (insertion-ordered)
// ═══════════════════════════════════════════════════════════

/// Insertion-ordered map of named fields.
///
/// Overwriting an existing key keeps its original position.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FieldMap {
    entries: Vec<(String, Field)>,
}

impl FieldMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, key: &str) -> Option<&Field> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, f)| f)
    }

    fn get_mut(&mut self, key: &str) -> Option<&mut Field> {
        self.entries
            .iter_mut()
            .find(|(k, _)| k == key)
            .map(|(_, f)| f)
    }

    /// Top-level scalar by key (`None` for groups).
    pub fn value(&self, key: &str) -> Option<&FieldValue> {
        match self.get(key)? {
            Field::Value(v) => Some(v),
            Field::Group(_) => None,
        }
    }

    pub fn group(&self, key: &str) -> Option<&FieldMap> {
        match self.get(key)? {
            Field::Group(g) => Some(g),
            Field::Value(_) => None,
        }
    }

    pub fn group_mut(&mut self, key: &str) -> Option<&mut FieldMap> {
        match self.get_mut(key)? {
            Field::Group(g) => Some(g),
            Field::Value(_) => None,
        }
    }

    /// Resolve `"key"` or `"group.key"`.
    pub fn lookup(&self, path: &str) -> Option<&FieldValue> {
        match path.split_once('.') {
            Some((group, key)) => self.group(group)?.value(key),
            None => self.value(path),
        }
    }

    /// Set a scalar. Returns the previous entry if the key existed.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<FieldValue>) -> Option<Field> {
        self.put(key.into(), Field::Value(value.into()))
    }

    /// Set a group. Returns the previous entry if the key existed.
    pub fn insert_group(&mut self, key: impl Into<String>, group: FieldMap) -> Option<Field> {
        self.put(key.into(), Field::Group(group))
    }

    fn put(&mut self, key: String, field: Field) -> Option<Field> {
        match self.get_mut(&key) {
            Some(existing) => Some(std::mem::replace(existing, field)),
            None => {
                self.entries.push((key, field));
                None
            }
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Field)> {
        self.entries.iter().map(|(k, f)| (k.as_str(), f))
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(k, _)| k.as_str())
    }
}

impl Serialize for FieldMap {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (key, field) in &self.entries {
            map.serialize_entry(key, field)?;
        }
        map.end()
    }
}

// ═══════════════════════════════════════════════════════════
// LineItem
// ═══════════════════════════════════════════════════════════

/// One row of a record: a billed product or a prescribed medication.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LineItem {
    pub name: String,
    pub quantity: f64,
    pub unit_price: f64,
    pub amount: f64,
    /// Kind-specific extras (batch number, dosage, expiry...).
    pub metadata: FieldMap,
}

impl LineItem {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            quantity: 0.0,
            unit_price: 0.0,
            amount: 0.0,
            metadata: FieldMap::new(),
        }
    }
}

// ═══════════════════════════════════════════════════════════
// StructuredRecord
// ═══════════════════════════════════════════════════════════

/// The normalized, editable unit shown to the clerk for review.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StructuredRecord {
    id: RecordId,
    pub kind: RecordKind,
    /// Stored source image (service URL or opaque reference).
    pub source_image_ref: Option<String>,
    pub original_filename: Option<String>,
    pub extracted_text: Option<String>,
    /// Id the service attached at extraction time (bill id, prescription `_id`).
    pub upstream_ref: Option<String>,
    pub fields: FieldMap,
    pub line_items: Vec<LineItem>,
    persisted: bool,
}

impl StructuredRecord {
    /// New unsaved record with a temporary id.
    pub fn new(kind: RecordKind) -> Self {
        Self {
            id: RecordId::temporary(),
            kind,
            source_image_ref: None,
            original_filename: None,
            extracted_text: None,
            upstream_ref: None,
            fields: FieldMap::new(),
            line_items: Vec::new(),
            persisted: false,
        }
    }

    pub fn id(&self) -> &RecordId {
        &self.id
    }

    pub fn is_persisted(&self) -> bool {
        self.persisted
    }

    /// Record a successful save.
    ///
    /// The id is swapped only while it is still temporary; `persisted`
    /// never goes back to false.
    pub(crate) fn mark_persisted(&mut self, server_id: String) {
        if self.id.is_temporary() {
            self.id = RecordId::Persisted(server_id);
        }
        self.persisted = true;
    }

    /// Copy identity and persistence state from `other`.
    ///
    /// Used when replacing a record's content so replacement can never
    /// rewrite identity or un-persist a record.
    pub(crate) fn adopt_identity(&mut self, other: &StructuredRecord) {
        self.id = other.id.clone();
        self.persisted = other.persisted;
    }

    /// Sum of line item amounts.
    pub fn line_items_total(&self) -> f64 {
        self.line_items.iter().map(|item| item.amount).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn temporary_ids_are_prefixed_and_unique() {
        let a = RecordId::temporary();
        let b = RecordId::temporary();
        assert!(a.as_str().starts_with(TEMP_ID_PREFIX));
        assert!(a.is_temporary());
        assert_ne!(a, b);
    }

    #[test]
    fn insert_preserves_order_and_overwrite_position() {
        let mut fields = FieldMap::new();
        fields.insert("vendor", "Medi Supplies");
        fields.insert("billNumber", "INV-1");
        fields.insert("totalAmount", 120.0);
        let previous = fields.insert("vendor", "Apex Pharma");

        assert_eq!(
            previous,
            Some(Field::Value(FieldValue::Text("Medi Supplies".into())))
        );
        let keys: Vec<&str> = fields.keys().collect();
        assert_eq!(keys, vec!["vendor", "billNumber", "totalAmount"]);
        assert_eq!(fields.value("vendor"), Some(&FieldValue::from("Apex Pharma")));
    }

    #[test]
    fn lookup_resolves_group_paths() {
        let mut patient = FieldMap::new();
        patient.insert("name", "R. Sharma");
        patient.insert("age", 42.0);

        let mut fields = FieldMap::new();
        fields.insert_group("patient", patient);
        fields.insert("notes", "after food");

        assert_eq!(fields.lookup("patient.name"), Some(&FieldValue::from("R. Sharma")));
        assert_eq!(fields.lookup("patient.age").and_then(|v| v.as_number()), Some(42.0));
        assert_eq!(fields.lookup("notes"), Some(&FieldValue::from("after food")));
        assert!(fields.lookup("patient").is_none());
        assert!(fields.lookup("doctor.name").is_none());
        assert!(fields.lookup("notes.x").is_none());
    }

    #[test]
    fn parse_amount_strips_currency_and_separators() {
        assert_eq!(parse_amount("₹15,450.00"), Some(15450.0));
        assert_eq!(parse_amount("250"), Some(250.0));
        assert_eq!(parse_amount("-12.5"), Some(-12.5));
        assert_eq!(parse_amount("N/A"), None);
        assert_eq!(parse_amount(""), None);
    }

    #[test]
    fn parse_amount_reads_rupee_notations() {
        assert_eq!(parse_amount("Rs.500"), Some(500.0));
        assert_eq!(parse_amount("Rs. 1,250.00"), Some(1250.0));
        assert_eq!(parse_amount("500/-"), Some(500.0));
        assert_eq!(parse_amount("₹ 1,250.00/-"), Some(1250.0));
        assert_eq!(parse_amount("INR 12,34,567.50"), Some(1234567.5));
    }

    #[test]
    fn text_value_has_numeric_view() {
        assert_eq!(FieldValue::from("500.00").as_number(), Some(500.0));
        assert_eq!(FieldValue::from(3.0).as_number(), Some(3.0));
        let date = NaiveDate::from_ymd_opt(2025, 4, 10).unwrap();
        assert_eq!(FieldValue::from(date).as_number(), None);
        assert_eq!(FieldValue::from(date).to_string(), "2025-04-10");
    }

    #[test]
    fn mark_persisted_swaps_temporary_id_once() {
        let mut record = StructuredRecord::new(RecordKind::Bill);
        assert!(!record.is_persisted());

        record.mark_persisted("bill-001".into());
        assert!(record.is_persisted());
        assert_eq!(record.id(), &RecordId::Persisted("bill-001".into()));

        // A later save (update) keeps the first server id
        record.mark_persisted("bill-002".into());
        assert!(record.is_persisted());
        assert_eq!(record.id().as_str(), "bill-001");
    }

    #[test]
    fn clone_is_independent() {
        let mut original = StructuredRecord::new(RecordKind::Bill);
        original.fields.insert("vendor", "Medi Supplies");
        original.line_items.push(LineItem::new("Surgical Mask"));

        let mut copy = original.clone();
        copy.fields.insert("vendor", "Other");
        copy.line_items[0].name = "Gloves".into();
        copy.line_items[0].metadata.insert("batchNumber", "B1");

        assert_eq!(original.fields.value("vendor"), Some(&FieldValue::from("Medi Supplies")));
        assert_eq!(original.line_items[0].name, "Surgical Mask");
        assert!(original.line_items[0].metadata.is_empty());
    }

    #[test]
    fn field_map_serializes_in_insertion_order() {
        let mut fields = FieldMap::new();
        fields.insert("zeta", "z");
        fields.insert("alpha", 1.0);
        let json = serde_json::to_string(&fields).unwrap();
        assert_eq!(json, r#"{"zeta":"z","alpha":1.0}"#);
    }

    #[test]
    fn line_items_total_sums_amounts() {
        let mut record = StructuredRecord::new(RecordKind::Bill);
        let mut a = LineItem::new("A");
        a.amount = 100.0;
        let mut b = LineItem::new("B");
        b.amount = 50.5;
        record.line_items = vec![a, b];
        assert_eq!(record.line_items_total(), 150.5);
    }
}
