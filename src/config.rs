use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;
use url::Url;

/// Application-level constants
pub const APP_NAME: &str = "NeuroScan";
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Origin of the hosted analysis service.
pub const DEFAULT_SERVICE_URL: &str = "https://arsusan-neuroscan.hf.space";

pub const ENV_SERVICE_URL: &str = "NEUROSCAN_SERVICE_URL";
pub const ENV_TIMEOUT_SECS: &str = "NEUROSCAN_TIMEOUT_SECS";
pub const ENV_EXPORT_DIR: &str = "NEUROSCAN_EXPORT_DIR";
pub const ENV_REPORT_FONT: &str = "NEUROSCAN_REPORT_FONT";

/// Unicode TrueType faces tried in order when no report font is configured.
pub const SYSTEM_REPORT_FONTS: &[&str] = &[
    "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf",
    "/usr/share/fonts/TTF/DejaVuSans.ttf",
    "/usr/share/fonts/dejavu/DejaVuSans.ttf",
    "/usr/share/fonts/truetype/noto/NotoSans-Regular.ttf",
    "/System/Library/Fonts/Supplemental/Arial Unicode.ttf",
    "/Library/Fonts/Arial Unicode.ttf",
    "C:\\Windows\\Fonts\\arial.ttf",
];

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid service URL {value:?}: {reason}")]
    InvalidServiceUrl { value: String, reason: String },

    #[error("Invalid timeout {0:?}: expected whole seconds")]
    InvalidTimeout(String),

    #[error("Cannot determine home directory")]
    NoHomeDir,
}

/// Default tracing filter when `RUST_LOG` is unset.
pub fn default_log_filter() -> &'static str {
    "info,neuroscan_console=debug,reqwest=warn,hyper=warn"
}

/// Get the application data directory
/// ~/NeuroScan/ on all platforms
pub fn app_data_dir() -> Result<PathBuf, ConfigError> {
    let home = dirs::home_dir().ok_or(ConfigError::NoHomeDir)?;
    Ok(home.join(APP_NAME))
}

/// Directory exported reports are written to.
pub fn exports_dir() -> Result<PathBuf, ConfigError> {
    match std::env::var_os(ENV_EXPORT_DIR) {
        Some(dir) if !dir.is_empty() => Ok(PathBuf::from(dir)),
        _ => Ok(app_data_dir()?.join("exports")),
    }
}

/// TrueType font for report text. `None` leaves reports on built-in Helvetica,
/// which only covers WinAnsi.
pub fn report_font_path() -> Option<PathBuf> {
    report_font_from(std::env::var(ENV_REPORT_FONT).ok(), |p| p.is_file())
}

/// A configured path wins even if missing, so a typo surfaces as a load error
/// instead of silently switching fonts.
pub fn report_font_from<F>(configured: Option<String>, installed: F) -> Option<PathBuf>
where
    F: Fn(&Path) -> bool,
{
    if let Some(path) = configured.filter(|v| !v.trim().is_empty()) {
        return Some(PathBuf::from(path.trim()));
    }
    SYSTEM_REPORT_FONTS
        .iter()
        .map(Path::new)
        .find(|p| installed(p))
        .map(Path::to_path_buf)
}

/// Where the remote analysis service lives and how long to wait for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceConfig {
    /// Origin every relative `heatmap_url` is resolved against.
    pub base_url: Url,
    /// `None` waits for the service indefinitely.
    pub timeout: Option<Duration>,
}

impl ServiceConfig {
    pub fn new(base_url: &str) -> Result<Self, ConfigError> {
        Ok(Self {
            base_url: parse_base_url(base_url)?,
            timeout: None,
        })
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Read overrides from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup; unset or blank keys fall back to defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let value = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let mut config = match value(ENV_SERVICE_URL) {
            Some(url) => Self::new(url.trim())?,
            None => Self::default(),
        };

        if let Some(raw) = value(ENV_TIMEOUT_SECS) {
            let secs: u64 = raw
                .trim()
                .parse()
                .map_err(|_| ConfigError::InvalidTimeout(raw.clone()))?;
            config.timeout = Some(Duration::from_secs(secs));
        }

        Ok(config)
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            base_url: Url::parse(DEFAULT_SERVICE_URL).expect("default service URL is valid"),
            timeout: None,
        }
    }
}

fn parse_base_url(value: &str) -> Result<Url, ConfigError> {
    let url = Url::parse(value).map_err(|e| ConfigError::InvalidServiceUrl {
        value: value.to_string(),
        reason: e.to_string(),
    })?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(ConfigError::InvalidServiceUrl {
            value: value.to_string(),
            reason: format!("unsupported scheme {}", url.scheme()),
        });
    }
    if url.cannot_be_a_base() || url.host().is_none() {
        return Err(ConfigError::InvalidServiceUrl {
            value: value.to_string(),
            reason: "not a base origin".into(),
        });
    }
    Ok(url)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_to_hosted_service_without_timeout() {
        let config = ServiceConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.base_url.as_str(), "https://arsusan-neuroscan.hf.space/");
        assert!(config.timeout.is_none());
    }

    #[test]
    fn env_overrides_base_url_and_timeout() {
        let config = ServiceConfig::from_lookup(lookup(&[
            (ENV_SERVICE_URL, "http://127.0.0.1:8000"),
            (ENV_TIMEOUT_SECS, "45"),
        ]))
        .unwrap();
        assert_eq!(config.base_url.as_str(), "http://127.0.0.1:8000/");
        assert_eq!(config.timeout, Some(Duration::from_secs(45)));
    }

    #[test]
    fn blank_values_fall_back_to_defaults() {
        let config = ServiceConfig::from_lookup(lookup(&[
            (ENV_SERVICE_URL, "   "),
            (ENV_TIMEOUT_SECS, ""),
        ]))
        .unwrap();
        assert_eq!(config, ServiceConfig::default());
    }

    #[test]
    fn rejects_non_http_scheme() {
        let err = ServiceConfig::new("ftp://example.org").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidServiceUrl { .. }));
    }

    #[test]
    fn rejects_garbage_url() {
        assert!(ServiceConfig::new("not a url").is_err());
    }

    #[test]
    fn rejects_non_numeric_timeout() {
        let err = ServiceConfig::from_lookup(lookup(&[(ENV_TIMEOUT_SECS, "soon")])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidTimeout(_)));
    }

    #[test]
    fn configured_report_font_wins() {
        let path = report_font_from(Some(" /opt/fonts/Noto.ttf ".into()), |_| true);
        assert_eq!(path, Some(PathBuf::from("/opt/fonts/Noto.ttf")));
    }

    #[test]
    fn report_font_falls_back_to_first_installed() {
        let path = report_font_from(None, |p| p.ends_with("NotoSans-Regular.ttf"));
        assert_eq!(
            path,
            Some(PathBuf::from("/usr/share/fonts/truetype/noto/NotoSans-Regular.ttf"))
        );
        assert_eq!(report_font_from(Some("  ".into()), |_| false), None);
    }

    #[test]
    fn app_data_dir_under_home() {
        let dir = app_data_dir().unwrap();
        let home = dirs::home_dir().unwrap();
        assert!(dir.starts_with(home));
        assert!(dir.ends_with("NeuroScan"));
    }

    #[test]
    fn app_version_matches_cargo() {
        assert_eq!(APP_VERSION, "0.1.0");
    }
}
