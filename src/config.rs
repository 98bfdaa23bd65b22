use std::time::Duration;

/// Application-level constants
pub const APP_NAME: &str = "PharmaScan";
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default extraction/persistence service (the pharmacy backend).
pub const DEFAULT_SERVICE_URL: &str = "http://localhost:5000";

/// Whole-request timeout. OCR on a multi-page bill can take a while.
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 120;
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;

/// Debounce between releasing a camera and requesting it again.
pub const CAMERA_RETRY_DELAY: Duration = Duration::from_millis(500);

/// Pause between sequential saves in a save-all run.
pub const SAVE_ALL_DELAY: Duration = Duration::from_millis(500);

/// Largest capture accepted for upload (20MB).
pub const MAX_CAPTURE_BYTES: u64 = 20 * 1024 * 1024;

/// Maximum captures submitted in one picker action.
pub const MAX_CAPTURES_PER_BATCH: usize = 20;

const ENV_SERVICE_URL: &str = "PHARMASCAN_SERVICE_URL";
const ENV_TIMEOUT_SECS: &str = "PHARMASCAN_TIMEOUT_SECS";
const ENV_SESSION_COOKIE: &str = "PHARMASCAN_SESSION_COOKIE";

/// Default `EnvFilter` directive when `RUST_LOG` is unset.
pub fn default_log_filter() -> &'static str {
    "pharmascan=info,warn"
}

// ═══════════════════════════════════════════════════════════
// Endpoints
// ═══════════════════════════════════════════════════════════

/// Paths of every service route the core calls.
///
/// Defaults match the pharmacy backend; override for other deployments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoints {
    pub bill_upload: String,
    pub bill_save: String,
    pub prescription_process: String,
    /// Prefix; the upstream id is appended as the last path segment.
    pub prescription_update: String,
    pub product_process: String,
    pub product_save: String,
    pub medicine_search: String,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            bill_upload: "/bill-scanner/upload".into(),
            bill_save: "/bill-scanner/save-products".into(),
            prescription_process: "/prescription/process".into(),
            prescription_update: "/prescription".into(),
            product_process: "/process_image".into(),
            product_save: "/save_product".into(),
            medicine_search: "/medicine/search".into(),
        }
    }
}

// ═══════════════════════════════════════════════════════════
// ServiceConfig
// ═══════════════════════════════════════════════════════════

/// Connection settings for the extraction/persistence service.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub base_url: String,
    pub request_timeout: Duration,
    pub connect_timeout: Duration,
    pub endpoints: Endpoints,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_SERVICE_URL.into(),
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            connect_timeout: Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS),
            endpoints: Endpoints::default(),
        }
    }
}

impl ServiceConfig {
    /// Create a config pointing at `base_url` with default timeouts.
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            ..Self::default()
        }
    }

    /// Build from `PHARMASCAN_*` environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = match lookup(ENV_SERVICE_URL) {
            Some(url) if !url.trim().is_empty() => Self::new(url.trim()),
            _ => Self::default(),
        };

        if let Some(raw) = lookup(ENV_TIMEOUT_SECS) {
            match raw.trim().parse::<u64>() {
                Ok(secs) if secs > 0 => config.request_timeout = Duration::from_secs(secs),
                _ => tracing::warn!(
                    var = ENV_TIMEOUT_SECS,
                    value = %raw,
                    "Ignoring invalid timeout, using default"
                ),
            }
        }

        config
    }

    /// Absolute URL for a path from [`Endpoints`].
    pub fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }
}

/// Session cookie from the environment (`PHARMASCAN_SESSION_COOKIE`), if set.
pub fn session_cookie_from_env() -> Option<String> {
    session_cookie_from_lookup(|key| std::env::var(key).ok())
}

fn session_cookie_from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Option<String> {
    lookup(ENV_SESSION_COOKIE).filter(|c| !c.trim().is_empty())
}
