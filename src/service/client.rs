use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, COOKIE};
use reqwest::multipart::{Form, Part};
use reqwest::StatusCode;
use serde_json::Value;

use super::{
    wire, ExtractionService, ExtractionTarget, MedicineCandidate, MedicineSearch, NetworkError,
    PersistenceService, ServiceContext,
};
use crate::capture::RawCapture;
use crate::config::ServiceConfig;
use crate::persistence::PersistenceError;
use crate::record::{RecordKind, StructuredRecord};

/// Async HTTP client for the pharmacy extraction/persistence service.
pub struct HttpServiceClient {
    config: ServiceConfig,
    context: ServiceContext,
    client: reqwest::Client,
}

impl HttpServiceClient {
    pub fn new(config: ServiceConfig, context: ServiceContext) -> Result<Self, NetworkError> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        if let Some(cookie) = &context.session_cookie {
            let value = HeaderValue::from_str(cookie)
                .map_err(|_| NetworkError::Transport("session cookie is not a valid header".into()))?;
            headers.insert(COOKIE, value);
        }

        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .connect_timeout(config.connect_timeout)
            .cookie_store(true)
            .default_headers(headers)
            .build()
            .map_err(|e| NetworkError::Transport(e.to_string()))?;

        tracing::debug!(base_url = %config.base_url, "Service client ready");
        Ok(Self {
            config,
            context,
            client,
        })
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    fn transport_error(&self, e: reqwest::Error) -> NetworkError {
        if e.is_connect() {
            NetworkError::Connection(self.config.base_url.clone())
        } else if e.is_timeout() {
            NetworkError::Timeout(self.config.request_timeout)
        } else {
            NetworkError::Transport(e.to_string())
        }
    }

    /// Check the status and decode a JSON body.
    async fn read_json(&self, response: reqwest::Response) -> Result<Value, NetworkError> {
        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(NetworkError::Unauthorized(status.as_u16()));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(NetworkError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let text = response
            .text()
            .await
            .map_err(|e| self.transport_error(e))?;
        if text.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&text).map_err(|e| NetworkError::Malformed(e.to_string()))
    }

    async fn send_json(
        &self,
        request: reqwest::RequestBuilder,
    ) -> Result<Value, NetworkError> {
        let response = request.send().await.map_err(|e| self.transport_error(e))?;
        self.read_json(response).await
    }

    async fn save_bill(&self, record: &StructuredRecord) -> Result<String, PersistenceError> {
        let url = self.config.url(&self.config.endpoints.bill_save);
        let body = wire::bill_save_body(record, self.context.auto_enrich);
        let response = self.send_json(self.client.post(url).json(&body)).await?;
        reject_on_error(&response)?;

        wire::saved_id(&response, &["bill_id", "product_ids"])
            .or_else(|| record.upstream_ref.clone())
            .ok_or_else(|| PersistenceError::Rejected("response carried no bill id".into()))
    }

    async fn save_prescription(&self, record: &StructuredRecord) -> Result<String, PersistenceError> {
        let upstream = record
            .upstream_ref
            .clone()
            .ok_or_else(|| PersistenceError::MissingUpstreamId(record.id().to_string()))?;
        let url = format!(
            "{}/{}",
            self.config.url(&self.config.endpoints.prescription_update),
            upstream
        );
        let body = wire::prescription_body(record);
        let response = self.send_json(self.client.put(url).json(&body)).await?;
        reject_on_error(&response)?;
        Ok(upstream)
    }

    async fn save_product(&self, record: &StructuredRecord) -> Result<String, PersistenceError> {
        let url = self.config.url(&self.config.endpoints.product_save);
        let body = wire::product_body(record);
        let response = self.send_json(self.client.post(url).json(&body)).await?;
        reject_on_error(&response)?;

        wire::saved_id(&response, &["product_id", "id", "_id"])
            .ok_or_else(|| PersistenceError::Rejected("response carried no product id".into()))
    }
}

fn reject_on_error(body: &Value) -> Result<(), PersistenceError> {
    match wire::service_error(body) {
        Some(message) => Err(PersistenceError::Rejected(message)),
        None => Ok(()),
    }
}

#[async_trait]
impl ExtractionService for HttpServiceClient {
    async fn extract(
        &self,
        target: &ExtractionTarget,
        capture: RawCapture,
    ) -> Result<Vec<Value>, NetworkError> {
        let (bytes, mime_type, filename) = capture.into_parts();
        let endpoints = &self.config.endpoints;
        let (path, field) = match target {
            ExtractionTarget::Bill => (&endpoints.bill_upload, "bill"),
            ExtractionTarget::Prescription => (&endpoints.prescription_process, "image"),
            ExtractionTarget::Product { .. } => (&endpoints.product_process, "image"),
        };

        let size = bytes.len();
        let part = Part::bytes(bytes)
            .file_name(filename.clone())
            .mime_str(&mime_type)
            .map_err(|e| NetworkError::Transport(e.to_string()))?;
        let mut form = Form::new().part(field, part).text("file_type", mime_type);
        if let ExtractionTarget::Product { candidate } = target {
            form = form.text("medicine_id", candidate.id.clone());
        }

        tracing::info!(
            kind = %target.kind(),
            size,
            "Submitting capture for extraction"
        );
        let url = self.config.url(path);
        let body = self.send_json(self.client.post(url).multipart(form)).await?;
        let payloads = wire::extraction_payloads(target, body)?;
        tracing::info!(
            kind = %target.kind(),
            results = payloads.len(),
            "Extraction response received"
        );
        Ok(payloads)
    }
}

#[async_trait]
impl PersistenceService for HttpServiceClient {
    async fn save(&self, record: &StructuredRecord) -> Result<String, PersistenceError> {
        match record.kind {
            RecordKind::Bill => self.save_bill(record).await,
            RecordKind::Prescription => self.save_prescription(record).await,
            RecordKind::Product => self.save_product(record).await,
        }
    }
}

#[async_trait]
impl MedicineSearch for HttpServiceClient {
    async fn search(&self, term: &str) -> Result<Vec<MedicineCandidate>, NetworkError> {
        let term = term.trim();
        if term.is_empty() {
            return Ok(Vec::new());
        }

        let url = self.config.url(&self.config.endpoints.medicine_search);
        let request = self
            .client
            .get(url)
            .query(&[("term", term), ("auto_enrich", "true")]);
        let body = self.send_json(request).await?;
        if let Some(message) = wire::service_error(&body) {
            return Err(NetworkError::Service(message));
        }

        let hits = match body {
            Value::Array(hits) => hits,
            Value::Object(mut map) => match map.remove("results") {
                Some(Value::Array(hits)) => hits,
                _ => Vec::new(),
            },
            _ => Vec::new(),
        };
        Ok(hits.iter().filter_map(wire::candidate_from).collect())
    }
}
