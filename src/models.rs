//! Fixed-shape records exchanged with the analysis service.
//!
//! Every field is required: a response missing one, or carrying the wrong
//! type, fails deserialization and is reported as a transport failure by the
//! client instead of leaking half-filled values into the session or history.

use std::path::{Path, PathBuf};

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer};

/// Label the service uses when no tumor is detected.
pub const NO_TUMOR_LABEL: &str = "notumor";

// ─── Types ────────────────────────────────────────────────────────────────────

/// Local reference to a picked image. Never empty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageRef(PathBuf);

impl ImageRef {
    /// `None` for an empty reference, which the picker can yield on some platforms.
    pub fn new(path: impl Into<PathBuf>) -> Option<Self> {
        let path = path.into();
        if path.as_os_str().is_empty() {
            None
        } else {
            Some(Self(path))
        }
    }

    pub fn path(&self) -> &Path {
        &self.0
    }
}

/// Diagnosis returned by `POST /predict`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct AnalysisResult {
    pub prediction: String,
    /// Pre-formatted by the service, e.g. `"92.41%"`.
    pub confidence: String,
    /// Absolute, or relative to the service origin.
    pub heatmap_url: String,
}

/// One past scan returned by `GET /history`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ScanRecord {
    pub id: i64,
    #[serde(rename = "user_name")]
    pub patient_name: String,
    pub filename: String,
    pub prediction: String,
    pub confidence: String,
    pub heatmap_url: String,
    #[serde(deserialize_with = "deserialize_timestamp")]
    pub created_at: DateTime<Utc>,
}

/// Coarse reading of a prediction label, used for badges.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Finding {
    Clear,
    Abnormal,
}

impl Finding {
    pub fn from_label(label: &str) -> Self {
        let normalized: String = label
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .map(|c| c.to_ascii_lowercase())
            .collect();
        if normalized == NO_TUMOR_LABEL {
            Finding::Clear
        } else {
            Finding::Abnormal
        }
    }
}

impl AnalysisResult {
    pub fn finding(&self) -> Finding {
        Finding::from_label(&self.prediction)
    }
}

impl ScanRecord {
    pub fn finding(&self) -> Finding {
        Finding::from_label(&self.prediction)
    }

    /// `GLIOMA • 92%` style line shown on history cards.
    pub fn summary_line(&self) -> String {
        format!("{} • {}", self.prediction.to_uppercase(), self.confidence)
    }
}

// ─── Timestamps ───────────────────────────────────────────────────────────────

/// Parse an ISO-8601 timestamp. Values without an offset are taken as UTC.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .map(|naive| naive.and_utc())
}

fn deserialize_timestamp<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    parse_timestamp(&raw)
        .ok_or_else(|| serde::de::Error::custom(format!("invalid created_at timestamp: {raw:?}")))
}

// ─── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, Timelike};

    #[test]
    fn image_ref_rejects_empty_path() {
        assert!(ImageRef::new("").is_none());
        let image = ImageRef::new("/tmp/scan.jpg").unwrap();
        assert_eq!(image.path(), Path::new("/tmp/scan.jpg"));
    }

    #[test]
    fn parses_analysis_result() {
        let json = r#"{"prediction":"glioma","confidence":"92%","heatmap_url":"/static/h1.png"}"#;
        let result: AnalysisResult = serde_json::from_str(json).unwrap();
        assert_eq!(result.prediction, "glioma");
        assert_eq!(result.confidence, "92%");
        assert_eq!(result.heatmap_url, "/static/h1.png");
        assert_eq!(result.finding(), Finding::Abnormal);
    }

    #[test]
    fn analysis_result_missing_field_is_rejected() {
        let json = r#"{"prediction":"glioma","confidence":"92%"}"#;
        assert!(serde_json::from_str::<AnalysisResult>(json).is_err());
    }

    #[test]
    fn analysis_result_wrong_type_is_rejected() {
        let json = r#"{"prediction":"glioma","confidence":0.92,"heatmap_url":"/h.png"}"#;
        assert!(serde_json::from_str::<AnalysisResult>(json).is_err());
    }

    #[test]
    fn parses_scan_record_with_naive_timestamp() {
        let json = r#"{
            "id": 7,
            "user_name": "Anna Smith",
            "filename": "mri_scan.jpg",
            "prediction": "meningioma",
            "confidence": "88.10%",
            "heatmap_url": "/static/heatmaps/7.png",
            "created_at": "2026-02-18T09:30:15.123456"
        }"#;
        let record: ScanRecord = serde_json::from_str(json).unwrap();
        assert_eq!(record.id, 7);
        assert_eq!(record.patient_name, "Anna Smith");
        assert_eq!(record.created_at.year(), 2026);
        assert_eq!(record.created_at.hour(), 9);
    }

    #[test]
    fn scan_record_with_bad_timestamp_is_rejected() {
        let json = r#"{"id":1,"user_name":"A","filename":"f","prediction":"p",
            "confidence":"c","heatmap_url":"/h","created_at":"yesterday"}"#;
        assert!(serde_json::from_str::<ScanRecord>(json).is_err());
    }

    #[test]
    fn timestamp_with_offset_is_normalized_to_utc() {
        let ts = parse_timestamp("2026-02-18T10:00:00+02:00").unwrap();
        assert_eq!(ts.hour(), 8);
    }

    #[test]
    fn timestamp_with_space_separator() {
        assert!(parse_timestamp("2026-02-18 10:00:00").is_some());
        assert!(parse_timestamp("18/02/2026").is_none());
    }

    #[test]
    fn no_tumor_sentinel_is_clear() {
        assert_eq!(Finding::from_label("notumor"), Finding::Clear);
        assert_eq!(Finding::from_label("No Tumor"), Finding::Clear);
        assert_eq!(Finding::from_label("pituitary"), Finding::Abnormal);
    }

    #[test]
    fn summary_line_uppercases_prediction() {
        let record = ScanRecord {
            id: 1,
            patient_name: "Jane".into(),
            filename: "mri_scan.jpg".into(),
            prediction: "glioma".into(),
            confidence: "92%".into(),
            heatmap_url: "/h.png".into(),
            created_at: Utc::now(),
        };
        assert_eq!(record.summary_line(), "GLIOMA • 92%");
    }
}
