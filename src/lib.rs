pub mod analytics;
pub mod client;
pub mod config;
pub mod errors;
pub mod history;
pub mod models;
pub mod report;
pub mod session;

use tracing_subscriber::EnvFilter;

pub use client::{AnalysisClient, AnalysisService};
pub use errors::{Notice, NoticeKind, ReportExportError, TransportError, ValidationError};
pub use history::HistoryStore;
pub use models::{AnalysisResult, ImageRef, ScanRecord};
pub use report::{ReportDocument, ReportExporter, ReportSource};
pub use session::{PatientSession, SessionAction, SessionController, SessionStatus};

/// Initialize tracing from `RUST_LOG`, falling back to the app default.
/// Logs go to stderr so command output stays clean.
pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config::default_log_filter())),
        )
        .with_writer(std::io::stderr)
        .init();

    tracing::info!("{} console starting v{}", config::APP_NAME, config::APP_VERSION);
}
