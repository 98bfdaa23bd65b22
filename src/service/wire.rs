//! JSON shapes exchanged with the service.
//!
//! Response envelopes are unwrapped into per-record payloads here; turning a
//! payload into a `StructuredRecord` is the normalizer's job. Outgoing save
//! bodies are built from records with the service's snake_case keys.

use serde_json::{json, Map, Value};

use super::{ExtractionTarget, MedicineCandidate, NetworkError};
use crate::record::{Field, FieldMap, FieldValue, LineItem, StructuredRecord};

/// Date format the bill endpoints expect.
const BILL_DATE_FORMAT: &str = "%d/%m/%Y";
/// Date format for prescriptions and products.
const ISO_DATE_FORMAT: &str = "%Y-%m-%d";

const DEFAULT_CATEGORY: &str = "General";

// ═══════════════════════════════════════════════════════════
// Responses
// ═══════════════════════════════════════════════════════════

/// Split an extraction response into raw record payloads.
///
/// A body carrying an `error` string is a service-level failure even when the
/// HTTP status was a success.
pub fn extraction_payloads(
    target: &ExtractionTarget,
    body: Value,
) -> Result<Vec<Value>, NetworkError> {
    if let Some(message) = service_error(&body) {
        return Err(NetworkError::Service(message));
    }
    let Value::Object(mut envelope) = body else {
        return Err(NetworkError::Malformed("expected a JSON object".into()));
    };

    match target {
        ExtractionTarget::Bill => match envelope.remove("results") {
            Some(Value::Array(results)) => Ok(results),
            Some(Value::Null) | None => Err(NetworkError::Malformed(
                "missing results array".into(),
            )),
            Some(_) => Err(NetworkError::Malformed("results is not an array".into())),
        },
        ExtractionTarget::Prescription => {
            let data = envelope
                .remove("prescription_data")
                .and_then(|mut p| p.get_mut("data").map(Value::take));
            match data {
                Some(data @ Value::Object(_)) => Ok(vec![data]),
                _ => Err(NetworkError::Malformed(
                    "missing prescription_data.data".into(),
                )),
            }
        }
        // Missing label info still yields a record seeded from the candidate.
        ExtractionTarget::Product { .. } => match envelope.remove("extracted_info") {
            Some(info @ Value::Object(_)) => Ok(vec![info]),
            _ => Ok(vec![Value::Object(Map::new())]),
        },
    }
}

/// `{"error": "..."}` or `{"success": false, ...}` bodies.
pub fn service_error(body: &Value) -> Option<String> {
    if let Some(message) = body.get("error").and_then(Value::as_str) {
        return Some(message.to_string());
    }
    if body.get("success").and_then(Value::as_bool) == Some(false) {
        let message = body
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("request was not accepted");
        return Some(message.to_string());
    }
    None
}

/// First id-like value found under `keys`, as a string.
pub fn saved_id(body: &Value, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|key| id_string(body.get(*key)?))
}

/// Mongo-style ids arrive as strings, numbers, or `{"$oid": "..."}`.
pub fn id_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::Object(map) => map.get("$oid").and_then(id_string),
        Value::Array(items) => items.first().and_then(id_string),
        _ => None,
    }
}

/// Parse one catalogue search hit. Hits without an id are dropped.
pub fn candidate_from(value: &Value) -> Option<MedicineCandidate> {
    let id = value.get("_id").or_else(|| value.get("id")).and_then(id_string)?;
    let text = |key: &str| {
        value
            .get(key)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    };

    Some(MedicineCandidate {
        id,
        name: text("product_name").unwrap_or_default(),
        manufacturer: text("product_manufactured"),
        category: text("sub_category").unwrap_or_else(|| DEFAULT_CATEGORY.to_string()),
        composition: text("salt_composition").or_else(|| text("composition")),
    })
}

// ═══════════════════════════════════════════════════════════
// Save bodies
// ═══════════════════════════════════════════════════════════

/// Body for the bill save endpoint.
pub fn bill_save_body(record: &StructuredRecord, auto_enrich: bool) -> Value {
    const RENAMES: &[(&str, &str)] = &[("vendor", "drawing_party")];

    let products: Vec<Value> = record
        .line_items
        .iter()
        .map(|item| {
            let mut product = Map::new();
            product.insert("product_name".into(), json!(item.name));
            product.insert("quantity".into(), json!(item.quantity));
            product.insert("rate".into(), json!(item.unit_price));
            product.insert("amount".into(), json!(item.amount));
            extend_wire(
                &mut product,
                &item.metadata,
                &[("expiryDate", "exp_date")],
                BILL_DATE_FORMAT,
            );
            Value::Object(product)
        })
        .collect();

    json!({
        "bill_id": record.upstream_ref,
        "image_url": record.source_image_ref,
        "original_filename": record.original_filename,
        "bill_details": fields_to_wire(&record.fields, RENAMES, BILL_DATE_FORMAT),
        "products": products,
        "auto_enrich": auto_enrich,
    })
}

/// Body for the prescription update endpoint.
pub fn prescription_body(record: &StructuredRecord) -> Value {
    const RENAMES: &[(&str, &str)] = &[
        ("patient", "patient_info"),
        ("doctor", "doctor_info"),
        ("hospital", "hospital_info"),
        ("details", "prescription_details"),
        ("notes", "additional_notes"),
    ];

    let medications: Vec<Value> = record.line_items.iter().map(medication_to_wire).collect();

    let mut body = fields_to_wire(&record.fields, RENAMES, ISO_DATE_FORMAT);
    body.insert("medications".into(), Value::Array(medications));
    body.insert(
        "image_data".into(),
        json!({ "url": record.source_image_ref }),
    );
    Value::Object(body)
}

/// Body for the product save endpoint.
pub fn product_body(record: &StructuredRecord) -> Value {
    let mut body = fields_to_wire(&record.fields, &[], ISO_DATE_FORMAT);
    body.insert("image_url".into(), json!(record.source_image_ref));
    Value::Object(body)
}

fn medication_to_wire(item: &LineItem) -> Value {
    let mut medication = Map::new();
    medication.insert("name".into(), json!(item.name));
    if item.quantity != 0.0 {
        medication.insert("quantity".into(), json!(item.quantity));
    }
    extend_wire(&mut medication, &item.metadata, &[], ISO_DATE_FORMAT);
    Value::Object(medication)
}

fn fields_to_wire(fields: &FieldMap, renames: &[(&str, &str)], date_format: &str) -> Map<String, Value> {
    let mut out = Map::new();
    extend_wire(&mut out, fields, renames, date_format);
    out
}

fn extend_wire(
    out: &mut Map<String, Value>,
    fields: &FieldMap,
    renames: &[(&str, &str)],
    date_format: &str,
) {
    for (key, field) in fields.iter() {
        let wire_key = renames
            .iter()
            .find(|(from, _)| *from == key)
            .map(|(_, to)| to.to_string())
            .unwrap_or_else(|| to_snake_case(key));
        let value = match field {
            Field::Value(value) => value_to_wire(value, date_format),
            Field::Group(group) => Value::Object(fields_to_wire(group, &[], date_format)),
        };
        out.insert(wire_key, value);
    }
}

fn value_to_wire(value: &FieldValue, date_format: &str) -> Value {
    match value {
        FieldValue::Text(text) => json!(text),
        FieldValue::Number(n) => json!(n),
        FieldValue::Date(date) => json!(date.format(date_format).to_string()),
    }
}

/// `billNumber` → `bill_number`.
pub fn to_snake_case(key: &str) -> String {
    let mut out = String::with_capacity(key.len() + 4);
    for (i, ch) in key.chars().enumerate() {
        if ch.is_ascii_uppercase() {
            if i > 0 {
                out.push('_');
            }
            out.push(ch.to_ascii_lowercase());
        } else {
            out.push(ch);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::RecordKind;
    use chrono::NaiveDate;

    fn candidate() -> MedicineCandidate {
        MedicineCandidate {
            id: "m1".into(),
            name: "Amoxicillin 250".into(),
            manufacturer: None,
            category: "Antibiotic".into(),
            composition: None,
        }
    }

    #[test]
    fn bill_results_are_split_per_record() {
        let body = json!({ "results": [{ "bill_id": "b1" }, { "bill_id": "b2" }] });
        let payloads = extraction_payloads(&ExtractionTarget::Bill, body).unwrap();
        assert_eq!(payloads.len(), 2);
        assert_eq!(payloads[1]["bill_id"], "b2");
    }

    #[test]
    fn empty_bill_results_yield_no_payloads() {
        let body = json!({ "results": [] });
        assert!(extraction_payloads(&ExtractionTarget::Bill, body)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn error_body_with_success_status_is_service_error() {
        let body = json!({ "error": "No text detected" });
        let err = extraction_payloads(&ExtractionTarget::Bill, body).unwrap_err();
        assert_eq!(err, NetworkError::Service("No text detected".into()));
    }

    #[test]
    fn prescription_data_is_unwrapped() {
        let body = json!({ "prescription_data": { "data": { "_id": "p1" } } });
        let payloads = extraction_payloads(&ExtractionTarget::Prescription, body).unwrap();
        assert_eq!(payloads, vec![json!({ "_id": "p1" })]);
    }

    #[test]
    fn missing_prescription_data_is_malformed() {
        let err = extraction_payloads(&ExtractionTarget::Prescription, json!({})).unwrap_err();
        assert!(matches!(err, NetworkError::Malformed(_)));
    }

    #[test]
    fn product_without_info_still_yields_one_payload() {
        let target = ExtractionTarget::Product { candidate: candidate() };
        let payloads = extraction_payloads(&target, json!({ "status": "ok" })).unwrap();
        assert_eq!(payloads, vec![json!({})]);
    }

    #[test]
    fn ids_accept_strings_numbers_and_oids() {
        assert_eq!(id_string(&json!("abc")), Some("abc".into()));
        assert_eq!(id_string(&json!(42)), Some("42".into()));
        assert_eq!(id_string(&json!({ "$oid": "65f0" })), Some("65f0".into()));
        assert_eq!(id_string(&json!("  ")), None);
        assert_eq!(
            saved_id(&json!({ "product_ids": ["p9", "p10"] }), &["bill_id", "product_ids"]),
            Some("p9".into())
        );
    }

    #[test]
    fn candidate_defaults_category() {
        let hit = json!({
            "_id": { "$oid": "65f0" },
            "product_name": "Dolo 650",
            "product_manufactured": "Micro Labs",
        });
        let candidate = candidate_from(&hit).unwrap();
        assert_eq!(candidate.id, "65f0");
        assert_eq!(candidate.manufacturer.as_deref(), Some("Micro Labs"));
        assert_eq!(candidate.category, "General");
        assert!(candidate_from(&json!({ "product_name": "no id" })).is_none());
    }

    #[test]
    fn bill_body_uses_service_keys_and_date_format() {
        let mut record = StructuredRecord::new(RecordKind::Bill);
        record.upstream_ref = Some("b1".into());
        record.fields.insert("vendor", "Apex Pharma");
        record.fields.insert("billNumber", "INV-7");
        record
            .fields
            .insert("billDate", NaiveDate::from_ymd_opt(2024, 3, 9).unwrap());
        record.fields.insert("totalAmount", 150.0);
        let mut item = LineItem::new("Dolo 650");
        item.quantity = 2.0;
        item.unit_price = 30.0;
        item.amount = 60.0;
        item.metadata.insert("batchNumber", "B12");
        item.metadata.insert("expiryDate", "08/26");
        record.line_items.push(item);

        let body = bill_save_body(&record, true);
        assert_eq!(body["bill_id"], "b1");
        assert_eq!(body["auto_enrich"], true);
        assert_eq!(body["bill_details"]["drawing_party"], "Apex Pharma");
        assert_eq!(body["bill_details"]["bill_number"], "INV-7");
        assert_eq!(body["bill_details"]["bill_date"], "09/03/2024");
        assert_eq!(body["products"][0]["rate"], 30.0);
        assert_eq!(body["products"][0]["batch_number"], "B12");
        assert_eq!(body["products"][0]["exp_date"], "08/26");
    }

    #[test]
    fn prescription_body_renames_groups() {
        let mut record = StructuredRecord::new(RecordKind::Prescription);
        let mut patient = FieldMap::new();
        patient.insert("name", "R. Sharma");
        record.fields.insert_group("patient", patient);
        let mut notes = FieldMap::new();
        notes.insert("followUpDate", "in 2 weeks");
        record.fields.insert_group("notes", notes);
        let mut med = LineItem::new("Amoxicillin");
        med.metadata.insert("dosage", "250mg");
        record.line_items.push(med);

        let body = prescription_body(&record);
        assert_eq!(body["patient_info"]["name"], "R. Sharma");
        assert_eq!(body["additional_notes"]["follow_up_date"], "in 2 weeks");
        assert_eq!(body["medications"][0]["dosage"], "250mg");
        assert!(body["medications"][0].get("quantity").is_none());
    }

    #[test]
    fn snake_case_conversion() {
        assert_eq!(to_snake_case("billNumber"), "bill_number");
        assert_eq!(to_snake_case("mrp"), "mrp");
        assert_eq!(to_snake_case("licenseNumber"), "license_number");
    }
}
