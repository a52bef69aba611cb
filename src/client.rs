//! HTTP client for the remote analysis service.
//!
//! Two endpoints: `POST /predict` (multipart upload, returns a diagnosis) and
//! `GET /history` (every past scan). Each call is a single attempt; failures
//! come back as `TransportError` and retrying is the caller's decision.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use serde::de::DeserializeOwned;
use url::Url;

use crate::config::ServiceConfig;
use crate::errors::TransportError;
use crate::models::{AnalysisResult, ImageRef, ScanRecord};

/// Filename the scan is uploaded under, whatever the local name is.
pub const UPLOAD_FILENAME: &str = "mri_scan.jpg";
pub const UPLOAD_CONTENT_TYPE: &str = "image/jpeg";

/// Remote analysis service abstraction (allows mocking)
#[async_trait]
pub trait AnalysisService: Send + Sync {
    /// Upload a scan for one patient and wait for the diagnosis.
    async fn submit(
        &self,
        patient_name: &str,
        image: &ImageRef,
    ) -> Result<AnalysisResult, TransportError>;

    /// Every stored scan, in service order.
    async fn fetch_history(&self) -> Result<Vec<ScanRecord>, TransportError>;

    /// Raw bytes of a heatmap image at an absolute URL.
    async fn fetch_heatmap(&self, url: &str) -> Result<Vec<u8>, TransportError>;

    /// Origin relative heatmap references resolve against.
    fn base_url(&self) -> &Url;
}

// ═══════════════════════════════════════════════════════════
// AnalysisClient — reqwest implementation
// ═══════════════════════════════════════════════════════════

pub struct AnalysisClient {
    config: ServiceConfig,
    client: reqwest::Client,
}

impl AnalysisClient {
    pub fn new(config: ServiceConfig) -> Result<Self, TransportError> {
        let mut builder = reqwest::Client::builder();
        if let Some(timeout) = config.timeout {
            builder = builder.timeout(timeout);
        }
        let client = builder
            .build()
            .map_err(|e| TransportError::Http(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self { config, client })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.as_str().trim_end_matches('/'), path)
    }

    async fn read_json<T: DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, TransportError> {
        let response = ensure_success(response).await?;
        let body = response.bytes().await?;
        serde_json::from_slice(&body).map_err(|e| TransportError::MalformedBody(e.to_string()))
    }
}

async fn ensure_success(response: reqwest::Response) -> Result<reqwest::Response, TransportError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(TransportError::Status {
        status: status.as_u16(),
        body,
    })
}

#[async_trait]
impl AnalysisService for AnalysisClient {
    async fn submit(
        &self,
        patient_name: &str,
        image: &ImageRef,
    ) -> Result<AnalysisResult, TransportError> {
        let bytes = tokio::fs::read(image.path())
            .await
            .map_err(|source| TransportError::ImageUnreadable {
                path: image.path().to_path_buf(),
                source,
            })?;

        let file = Part::bytes(bytes)
            .file_name(UPLOAD_FILENAME)
            .mime_str(UPLOAD_CONTENT_TYPE)?;
        let form = Form::new()
            .text("user_name", patient_name.to_string())
            .part("file", file);

        tracing::debug!(patient = patient_name, "Uploading scan for analysis");
        let response = self
            .client
            .post(self.endpoint("/predict"))
            .multipart(form)
            .send()
            .await?;

        let result: AnalysisResult = Self::read_json(response).await?;
        tracing::info!(prediction = %result.prediction, "Analysis received");
        Ok(result)
    }

    async fn fetch_history(&self) -> Result<Vec<ScanRecord>, TransportError> {
        let response = self.client.get(self.endpoint("/history")).send().await?;
        let records: Vec<ScanRecord> = Self::read_json(response).await?;

        let mut seen = HashSet::with_capacity(records.len());
        if let Some(dup) = records.iter().find(|r| !seen.insert(r.id)) {
            return Err(TransportError::MalformedBody(format!(
                "duplicate record id {}",
                dup.id
            )));
        }

        tracing::info!(count = records.len(), "History fetched");
        Ok(records)
    }

    async fn fetch_heatmap(&self, url: &str) -> Result<Vec<u8>, TransportError> {
        let response = ensure_success(self.client.get(url).send().await?).await?;
        Ok(response.bytes().await?.to_vec())
    }

    fn base_url(&self) -> &Url {
        &self.config.base_url
    }
}

// ═══════════════════════════════════════════════════════════
// MockAnalysisService
// ═══════════════════════════════════════════════════════════

/// Mock service for testing — programmable outcomes, counted calls.
///
/// Every call yields to the scheduler once before answering, so concurrent
/// callers interleave the way they would against a real network.
pub struct MockAnalysisService {
    base_url: Url,
    prediction: Mutex<Option<AnalysisResult>>,
    history: Mutex<Option<Vec<ScanRecord>>>,
    heatmap: Mutex<Option<Vec<u8>>>,
    heatmap_requests: Mutex<Vec<String>>,
    submit_calls: AtomicUsize,
    history_calls: AtomicUsize,
}

impl MockAnalysisService {
    /// All calls fail until outcomes are configured.
    pub fn new() -> Self {
        Self {
            base_url: ServiceConfig::default().base_url,
            prediction: Mutex::new(None),
            history: Mutex::new(None),
            heatmap: Mutex::new(None),
            heatmap_requests: Mutex::new(Vec::new()),
            submit_calls: AtomicUsize::new(0),
            history_calls: AtomicUsize::new(0),
        }
    }

    pub fn with_prediction(self, result: AnalysisResult) -> Self {
        self.set_prediction(Some(result));
        self
    }

    pub fn with_history(self, records: Vec<ScanRecord>) -> Self {
        self.set_history(Some(records));
        self
    }

    pub fn with_heatmap(self, bytes: Vec<u8>) -> Self {
        *lock(&self.heatmap) = Some(bytes);
        self
    }

    /// `None` makes subsequent submits fail.
    pub fn set_prediction(&self, result: Option<AnalysisResult>) {
        *lock(&self.prediction) = result;
    }

    /// `None` makes subsequent history fetches fail.
    pub fn set_history(&self, records: Option<Vec<ScanRecord>>) {
        *lock(&self.history) = records;
    }

    pub fn submit_calls(&self) -> usize {
        self.submit_calls.load(Ordering::SeqCst)
    }

    pub fn history_calls(&self) -> usize {
        self.history_calls.load(Ordering::SeqCst)
    }

    /// URLs passed to `fetch_heatmap`, in call order.
    pub fn heatmap_requests(&self) -> Vec<String> {
        lock(&self.heatmap_requests).clone()
    }
}

impl Default for MockAnalysisService {
    fn default() -> Self {
        Self::new()
    }
}

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn unavailable() -> TransportError {
    TransportError::Status {
        status: 503,
        body: "mock service unavailable".into(),
    }
}

#[async_trait]
impl AnalysisService for MockAnalysisService {
    async fn submit(
        &self,
        _patient_name: &str,
        _image: &ImageRef,
    ) -> Result<AnalysisResult, TransportError> {
        self.submit_calls.fetch_add(1, Ordering::SeqCst);
        tokio::task::yield_now().await;
        lock(&self.prediction).clone().ok_or_else(unavailable)
    }

    async fn fetch_history(&self) -> Result<Vec<ScanRecord>, TransportError> {
        self.history_calls.fetch_add(1, Ordering::SeqCst);
        tokio::task::yield_now().await;
        lock(&self.history).clone().ok_or_else(unavailable)
    }

    async fn fetch_heatmap(&self, url: &str) -> Result<Vec<u8>, TransportError> {
        lock(&self.heatmap_requests).push(url.to_string());
        tokio::task::yield_now().await;
        lock(&self.heatmap).clone().ok_or_else(unavailable)
    }

    fn base_url(&self) -> &Url {
        &self.base_url
    }
}

// ═══════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════
