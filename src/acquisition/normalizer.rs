//! ResultNormalizer: raw service payloads to `StructuredRecord`s.
//!
//! Every payload produces a record: missing or malformed fields are replaced
//! with placeholders. Text falls back to "Unknown" or "N/A", numbers to 0 and
//! absent dates to today. A date that is present but unparseable is kept
//! verbatim as text for the clerk to fix.

use chrono::{Local, NaiveDate};
use serde_json::Value;

use crate::record::{parse_amount, FieldMap, FieldValue, LineItem, RecordKind, StructuredRecord};
use crate::service::wire::id_string;
use crate::service::{ExtractionTarget, MedicineCandidate};

pub const UNKNOWN: &str = "Unknown";
pub const NOT_AVAILABLE: &str = "N/A";
pub const DEFAULT_DESCRIPTION: &str = "No description available";
pub const DEFAULT_STORAGE: &str = "Store in a cool, dry place";

const DATE_FORMATS: &[&str] = &["%d/%m/%Y", "%Y-%m-%d", "%d-%m-%Y"];

#[derive(Debug, Clone, Default)]
pub struct ResultNormalizer {
    today: Option<NaiveDate>,
}

impl ResultNormalizer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pin "today" for defaulted dates.
    pub fn with_today(today: NaiveDate) -> Self {
        Self { today: Some(today) }
    }

    fn today(&self) -> NaiveDate {
        self.today.unwrap_or_else(|| Local::now().date_naive())
    }

    /// Normalize every payload of one capture. `filename` fills in
    /// `original_filename` when the service did not echo it back.
    pub fn normalize_all(
        &self,
        target: &ExtractionTarget,
        filename: &str,
        payloads: Vec<Value>,
    ) -> Vec<StructuredRecord> {
        payloads
            .iter()
            .map(|payload| {
                let mut record = self.normalize(target, payload);
                if record.original_filename.is_none() {
                    record.original_filename = Some(filename.to_string());
                }
                record
            })
            .collect()
    }

    pub fn normalize(&self, target: &ExtractionTarget, payload: &Value) -> StructuredRecord {
        let payload = Payload(payload);
        match target {
            ExtractionTarget::Bill => self.bill(payload),
            ExtractionTarget::Prescription => self.prescription(payload),
            ExtractionTarget::Product { candidate } => self.product(candidate, payload),
        }
    }

    fn bill(&self, payload: Payload<'_>) -> StructuredRecord {
        let mut record = StructuredRecord::new(RecordKind::Bill);
        record.source_image_ref = payload.opt_text("image_url");
        record.original_filename = payload.opt_text("original_filename");
        record.extracted_text = payload.opt_text("extracted_text");
        record.upstream_ref = payload.id("bill_id");

        let details = payload.child("bill_details");
        let vendor = details
            .opt_text("drawing_party")
            .or_else(|| details.opt_text("vendor_name"))
            .unwrap_or_else(|| UNKNOWN.to_string());
        record.fields.insert("vendor", vendor);
        record.fields.insert("billNumber", details.text_or("bill_number", NOT_AVAILABLE));
        record.fields.insert("billDate", self.date_or_today(details, "bill_date"));
        record.fields.insert("totalAmount", details.number("total_amount"));

        record.line_items = payload
            .items("products")
            .map(|product| {
                let mut item = LineItem::new(product.text_or("product_name", UNKNOWN));
                item.quantity = product.number("quantity");
                item.unit_price = product.number("rate");
                item.amount = product.number("amount");
                item.metadata
                    .insert("batchNumber", product.text_or("batch_number", NOT_AVAILABLE));
                item.metadata.insert("mrp", product.number("mrp"));
                item.metadata
                    .insert("expiryDate", product.text_or("exp_date", NOT_AVAILABLE));
                item
            })
            .collect();

        record
    }

    fn prescription(&self, payload: Payload<'_>) -> StructuredRecord {
        let mut record = StructuredRecord::new(RecordKind::Prescription);
        record.upstream_ref = payload.id("_id");
        record.source_image_ref = payload.child("image_data").opt_text("url");
        record.extracted_text = payload.opt_text("extracted_text");

        let patient = payload.child("patient_info");
        record.fields.insert_group(
            "patient",
            group(&[
                ("name", patient.text_or("name", UNKNOWN)),
                ("age", patient.text_or("age", NOT_AVAILABLE)),
                ("gender", patient.text_or("gender", NOT_AVAILABLE)),
            ]),
        );

        let doctor = payload.child("doctor_info");
        record.fields.insert_group(
            "doctor",
            group(&[
                ("name", doctor.text_or("name", UNKNOWN)),
                ("specialization", doctor.text_or("specialization", NOT_AVAILABLE)),
                ("licenseNumber", doctor.text_or("license_number", NOT_AVAILABLE)),
                ("contact", doctor.text_or("contact", NOT_AVAILABLE)),
            ]),
        );

        let hospital = payload.child("hospital_info");
        record.fields.insert_group(
            "hospital",
            group(&[
                ("name", hospital.text_or("name", UNKNOWN)),
                ("address", hospital.text_or("address", NOT_AVAILABLE)),
                ("contact", hospital.text_or("contact", NOT_AVAILABLE)),
            ]),
        );

        let mut details = FieldMap::new();
        details.insert(
            "date",
            self.date_or_today(payload.child("prescription_details"), "date"),
        );
        record.fields.insert_group("details", details);

        let notes = payload.child("additional_notes");
        record.fields.insert_group(
            "notes",
            group(&[
                ("followUpDate", notes.text_or("follow_up_date", NOT_AVAILABLE)),
                ("reviewInstructions", notes.text_or("review_instructions", NOT_AVAILABLE)),
                ("specialInstructions", notes.text_or("special_instructions", NOT_AVAILABLE)),
            ]),
        );

        record.line_items = payload
            .items("medications")
            .map(|medication| {
                let mut item = LineItem::new(medication.text_or("name", UNKNOWN));
                item.quantity = medication.number("quantity");
                for key in ["dosage", "frequency", "duration", "instructions"] {
                    item.metadata.insert(key, medication.text_or(key, NOT_AVAILABLE));
                }
                item
            })
            .collect();

        record
    }

    fn product(&self, candidate: &MedicineCandidate, info: Payload<'_>) -> StructuredRecord {
        let mut record = StructuredRecord::new(RecordKind::Product);
        record.upstream_ref = Some(candidate.id.clone());
        record.source_image_ref = info.opt_text("image_url");
        record.extracted_text = info.opt_text("extracted_text");

        let fields = &mut record.fields;
        fields.insert("productId", candidate.id.as_str());
        fields.insert("productName", candidate.name.as_str());
        fields.insert(
            "manufacturer",
            info.opt_text("manufacturer")
                .or_else(|| candidate.manufacturer.clone())
                .unwrap_or_else(|| UNKNOWN.to_string()),
        );
        fields.insert("category", candidate.category.as_str());
        fields.insert("batchNumber", info.text_or("batch_no", NOT_AVAILABLE));
        fields.insert("expiryDate", self.date_or_today(info, "exp_date"));
        fields.insert("mfgDate", self.date_or_today(info, "mfg_date"));
        fields.insert("price", info.number("price"));
        fields.insert("quantity", info.number("quantity"));
        fields.insert(
            "composition",
            info.opt_text("composition")
                .or_else(|| candidate.composition.clone())
                .unwrap_or_else(|| NOT_AVAILABLE.to_string()),
        );
        fields.insert("description", info.text_or("description", DEFAULT_DESCRIPTION));
        fields.insert("storage", info.text_or("storage", DEFAULT_STORAGE));

        record
    }

    fn date_or_today(&self, payload: Payload<'_>, key: &str) -> FieldValue {
        match payload.opt_text(key) {
            None => FieldValue::Date(self.today()),
            Some(raw) => match parse_date(&raw) {
                Some(date) => FieldValue::Date(date),
                None => FieldValue::Text(raw),
            },
        }
    }
}

/// Parse the date formats the OCR service emits.
pub fn parse_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    DATE_FORMATS
        .iter()
        .find_map(|format| NaiveDate::parse_from_str(raw, format).ok())
}

fn group(entries: &[(&str, String)]) -> FieldMap {
    let mut map = FieldMap::new();
    for (key, value) in entries {
        map.insert(*key, value.as_str());
    }
    map
}

/// Borrowed view over an untrusted JSON object.
#[derive(Clone, Copy)]
struct Payload<'a>(&'a Value);

impl<'a> Payload<'a> {
    fn child(self, key: &str) -> Payload<'a> {
        static NULL: Value = Value::Null;
        Payload(self.0.get(key).unwrap_or(&NULL))
    }

    fn items(self, key: &str) -> impl Iterator<Item = Payload<'a>> {
        self.0
            .get(key)
            .and_then(Value::as_array)
            .map(|items| items.as_slice())
            .unwrap_or_default()
            .iter()
            .filter(|item| item.is_object())
            .map(Payload)
    }

    /// Non-blank text. Numbers are rendered, since OCR output is loosely typed.
    fn opt_text(self, key: &str) -> Option<String> {
        match self.0.get(key)? {
            Value::String(s) => Some(s.trim())
                .filter(|s| !s.is_empty())
                .map(str::to_string),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }

    fn text_or(self, key: &str, placeholder: &str) -> String {
        self.opt_text(key).unwrap_or_else(|| placeholder.to_string())
    }

    fn number(self, key: &str) -> f64 {
        match self.0.get(key) {
            Some(Value::Number(n)) => n.as_f64().unwrap_or(0.0),
            Some(Value::String(s)) => parse_amount(s).unwrap_or(0.0),
            _ => 0.0,
        }
    }

    fn id(self, key: &str) -> Option<String> {
        self.0.get(key).and_then(id_string)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 6, 1).unwrap()
    }

    fn normalizer() -> ResultNormalizer {
        ResultNormalizer::with_today(today())
    }

    fn candidate() -> MedicineCandidate {
        MedicineCandidate {
            id: "m-42".into(),
            name: "Dolo 650".into(),
            manufacturer: Some("Micro Labs".into()),
            category: "Analgesic".into(),
            composition: None,
        }
    }

    #[test]
    fn bill_maps_details_and_products() {
        let payload = json!({
            "bill_id": "b-1",
            "image_url": "https://cdn/b-1.jpg",
            "original_filename": "scan.jpg",
            "bill_details": {
                "drawing_party": "Apex Pharma",
                "bill_number": "INV-22",
                "bill_date": "15/03/2024",
                "total_amount": "₹1,250.50",
            },
            "products": [{
                "product_name": "Dolo 650",
                "quantity": 10,
                "rate": "12.5",
                "amount": 125,
                "batch_number": "DL123",
                "mrp": 15,
                "exp_date": "08/26",
            }],
        });

        let record = normalizer().normalize(&ExtractionTarget::Bill, &payload);
        assert_eq!(record.kind, RecordKind::Bill);
        assert!(record.id().is_temporary());
        assert_eq!(record.upstream_ref.as_deref(), Some("b-1"));
        assert_eq!(record.fields.lookup("vendor"), Some(&"Apex Pharma".into()));
        assert_eq!(
            record.fields.lookup("billDate"),
            Some(&FieldValue::Date(NaiveDate::from_ymd_opt(2024, 3, 15).unwrap()))
        );
        assert_eq!(record.fields.lookup("totalAmount"), Some(&1250.5.into()));

        let item = &record.line_items[0];
        assert_eq!(item.name, "Dolo 650");
        assert_eq!(item.quantity, 10.0);
        assert_eq!(item.unit_price, 12.5);
        assert_eq!(item.metadata.value("expiryDate"), Some(&"08/26".into()));
    }

    #[test]
    fn empty_bill_payload_gets_placeholders() {
        let record = normalizer().normalize(&ExtractionTarget::Bill, &json!({}));
        assert_eq!(record.fields.lookup("vendor"), Some(&"Unknown".into()));
        assert_eq!(record.fields.lookup("billNumber"), Some(&"N/A".into()));
        assert_eq!(record.fields.lookup("billDate"), Some(&today().into()));
        assert_eq!(record.fields.lookup("totalAmount"), Some(&0.0.into()));
        assert!(record.line_items.is_empty());
    }

    #[test]
    fn malformed_values_are_defaulted() {
        let payload = json!({
            "bill_details": { "drawing_party": "   ", "total_amount": ["oops"] },
            "products": [{ "quantity": "lots", "product_name": null }, "not an object"],
        });
        let record = normalizer().normalize(&ExtractionTarget::Bill, &payload);
        assert_eq!(record.fields.lookup("vendor"), Some(&"Unknown".into()));
        assert_eq!(record.fields.lookup("totalAmount"), Some(&0.0.into()));
        assert_eq!(record.line_items.len(), 1);
        assert_eq!(record.line_items[0].name, "Unknown");
        assert_eq!(record.line_items[0].quantity, 0.0);
    }

    #[test]
    fn rupee_notations_keep_their_value() {
        for (raw, expected) in [
            ("Rs.500", 500.0),
            ("Rs. 1,250.00", 1250.0),
            ("500/-", 500.0),
            ("₹ 1,250.00/-", 1250.0),
        ] {
            let payload = json!({ "bill_details": { "total_amount": raw } });
            let record = normalizer().normalize(&ExtractionTarget::Bill, &payload);
            assert_eq!(
                record.fields.lookup("totalAmount"),
                Some(&expected.into()),
                "{raw}"
            );
        }
    }

    #[test]
    fn unparseable_date_is_kept_as_text() {
        let payload = json!({ "bill_details": { "bill_date": "March-ish" } });
        let record = normalizer().normalize(&ExtractionTarget::Bill, &payload);
        assert_eq!(record.fields.lookup("billDate"), Some(&"March-ish".into()));
    }

    #[test]
    fn prescription_groups_and_medications() {
        let payload = json!({
            "_id": { "$oid": "rx-7" },
            "image_data": { "url": "https://cdn/rx-7.png" },
            "patient_info": { "name": "R. Sharma", "age": 54 },
            "doctor_info": { "name": "Dr. Iyer", "license_number": "KMC-991" },
            "prescription_details": { "date": "2024-05-20" },
            "medications": [{ "name": "Amoxicillin", "dosage": "250mg", "frequency": "TID" }],
        });

        let record = normalizer().normalize(&ExtractionTarget::Prescription, &payload);
        assert_eq!(record.upstream_ref.as_deref(), Some("rx-7"));
        assert_eq!(record.source_image_ref.as_deref(), Some("https://cdn/rx-7.png"));
        assert_eq!(record.fields.lookup("patient.name"), Some(&"R. Sharma".into()));
        assert_eq!(record.fields.lookup("patient.age"), Some(&"54".into()));
        assert_eq!(record.fields.lookup("patient.gender"), Some(&"N/A".into()));
        assert_eq!(record.fields.lookup("doctor.licenseNumber"), Some(&"KMC-991".into()));
        assert_eq!(record.fields.lookup("hospital.name"), Some(&"Unknown".into()));
        assert_eq!(
            record.fields.lookup("details.date"),
            Some(&FieldValue::Date(NaiveDate::from_ymd_opt(2024, 5, 20).unwrap()))
        );
        assert_eq!(record.fields.lookup("notes.followUpDate"), Some(&"N/A".into()));

        let med = &record.line_items[0];
        assert_eq!(med.metadata.value("dosage"), Some(&"250mg".into()));
        assert_eq!(med.metadata.value("duration"), Some(&"N/A".into()));
    }

    #[test]
    fn product_is_seeded_from_candidate() {
        let target = ExtractionTarget::Product { candidate: candidate() };
        let info = json!({ "batch_no": "DL9", "exp_date": "31-12-2026", "price": "32.00" });

        let record = normalizer().normalize(&target, &info);
        assert_eq!(record.kind, RecordKind::Product);
        assert_eq!(record.fields.lookup("productId"), Some(&"m-42".into()));
        assert_eq!(record.fields.lookup("productName"), Some(&"Dolo 650".into()));
        assert_eq!(record.fields.lookup("manufacturer"), Some(&"Micro Labs".into()));
        assert_eq!(record.fields.lookup("batchNumber"), Some(&"DL9".into()));
        assert_eq!(
            record.fields.lookup("expiryDate"),
            Some(&FieldValue::Date(NaiveDate::from_ymd_opt(2026, 12, 31).unwrap()))
        );
        assert_eq!(record.fields.lookup("mfgDate"), Some(&today().into()));
        assert_eq!(record.fields.lookup("price"), Some(&32.0.into()));
        assert_eq!(record.fields.lookup("quantity"), Some(&0.0.into()));
        assert_eq!(record.fields.lookup("description"), Some(&DEFAULT_DESCRIPTION.into()));
        assert_eq!(record.fields.lookup("storage"), Some(&DEFAULT_STORAGE.into()));
    }

    #[test]
    fn filename_is_filled_when_service_omits_it() {
        let records = normalizer().normalize_all(
            &ExtractionTarget::Bill,
            "IMG_0042.jpg",
            vec![json!({}), json!({ "original_filename": "server.jpg" })],
        );
        assert_eq!(records[0].original_filename.as_deref(), Some("IMG_0042.jpg"));
        assert_eq!(records[1].original_filename.as_deref(), Some("server.jpg"));
        assert_ne!(records[0].id(), records[1].id());
    }

    #[test]
    fn supported_date_formats() {
        let expected = NaiveDate::from_ymd_opt(2024, 1, 5);
        assert_eq!(parse_date("05/01/2024"), expected);
        assert_eq!(parse_date("2024-01-05"), expected);
        assert_eq!(parse_date("05-01-2024"), expected);
        assert_eq!(parse_date("Jan 5"), None);
    }
}
