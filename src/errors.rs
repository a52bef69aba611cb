//! Failure kinds and the dismissible notice each one becomes.
//!
//! Nothing here is retried automatically: the notice is the only outcome of a
//! failure, and repeating the action is left to the operator.

use std::path::PathBuf;

use thiserror::Error;

/// Submit preconditions that block the action locally, before any request.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Patient name is required")]
    MissingPatientName,

    #[error("An MRI image must be selected")]
    MissingImage,

    #[error("Analysis already complete; clear the session to start a new scan")]
    AlreadyCompleted,
}

/// Any network or non-success outcome from the analysis service.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Analysis service unreachable at {0}")]
    Connection(String),

    #[error("Request timed out")]
    Timeout,

    #[error("Service returned error (status {status}): {body}")]
    Status { status: u16, body: String },

    #[error("Malformed service response: {0}")]
    MalformedBody(String),

    #[error("Cannot read image {path}: {source}")]
    ImageUnreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("HTTP client error: {0}")]
    Http(String),
}

impl From<reqwest::Error> for TransportError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            TransportError::Timeout
        } else if e.is_connect() {
            let target = e
                .url()
                .map(|u| u.origin().ascii_serialization())
                .unwrap_or_else(|| "unknown host".into());
            TransportError::Connection(target)
        } else if e.is_decode() {
            TransportError::MalformedBody(e.to_string())
        } else {
            TransportError::Http(e.to_string())
        }
    }
}

/// Document generation or hand-off failure. Never touches session or history state.
#[derive(Error, Debug)]
pub enum ReportExportError {
    #[error("PDF generation failed: {0}")]
    Pdf(String),

    #[error("Report font unusable: {0}")]
    Font(String),

    #[error("Report font cannot draw {missing:?} in {text:?}; set NEUROSCAN_REPORT_FONT to a TrueType font that covers it")]
    UnsupportedText { text: String, missing: String },

    #[error("Export destination unavailable: {0}")]
    Sink(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

// ─── Notices ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeKind {
    Validation,
    Permission,
    Transport,
    Export,
}

/// A dismissible message for the operator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub kind: NoticeKind,
    pub title: String,
    pub message: String,
}

impl Notice {
    pub fn new(kind: NoticeKind, title: &str, message: impl Into<String>) -> Self {
        Self {
            kind,
            title: title.to_string(),
            message: message.into(),
        }
    }

    pub fn permission_denied() -> Self {
        Self::new(
            NoticeKind::Permission,
            "Permission Denied",
            "Gallery access is needed to upload scans.",
        )
    }
}

impl From<&ValidationError> for Notice {
    fn from(e: &ValidationError) -> Self {
        Notice::new(NoticeKind::Validation, "Required", e.to_string())
    }
}

impl From<&TransportError> for Notice {
    fn from(e: &TransportError) -> Self {
        Notice::new(NoticeKind::Transport, "Connection Error", e.to_string())
    }
}

impl From<&ReportExportError> for Notice {
    fn from(e: &ReportExportError) -> Self {
        Notice::new(NoticeKind::Export, "Report Error", e.to_string())
    }
}

impl std::fmt::Display for Notice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.title, self.message)
    }
}
