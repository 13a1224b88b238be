//! Server configuration, loaded from environment variables at startup.

use std::path::PathBuf;
use std::time::Duration;

use docgrab_core::CoordinatorConfig;

/// Runtime configuration for docgrab-server.
///
/// Every field has a sensible default so the server works out-of-the-box
/// next to a `./scribd-dl` checkout without any environment variables set.
#[derive(Debug, Clone)]
pub struct Config {
    /// TCP address to bind (default: `"0.0.0.0:5000"`).
    pub bind_address: String,

    /// Installation directory of the extractor; the command runs here and
    /// its `Generated:` paths are resolved against it.
    pub work_dir: PathBuf,

    /// Extractor program (default: `"npm"`).
    pub command: String,

    /// Arguments placed before the URL (default: `["start"]`).
    pub command_args: Vec<String>,

    /// Page title shown by the HTML form.
    pub title: String,

    /// Extractions allowed to run at once.
    pub max_concurrent: usize,

    /// Accepted tasks allowed to wait for a free extractor slot.
    pub queue_capacity: usize,

    /// Maximum number of task records held in memory.
    pub store_capacity: usize,

    /// Seconds a finished task stays downloadable.
    pub task_ttl_secs: u64,

    /// Per-task timeout in seconds; `0` disables it.
    pub task_timeout_secs: u64,

    /// Seconds between background sweeps of expired tasks.
    pub sweep_interval_secs: u64,

    /// Largest accepted request body in bytes; bigger bodies get 413.
    pub max_body_bytes: usize,

    /// `tracing` filter string, e.g. `"info"` or `"debug,tower_http=warn"`.
    pub log_level: String,

    /// When `true`, emit log records as newline-delimited JSON.
    pub log_json: bool,

    /// Comma-separated CORS allow-list; `None` allows any origin.
    pub cors_allowed_origins: Option<String>,

    /// Serve Swagger UI and the OpenAPI document.
    pub enable_swagger: bool,

    /// Bearer token required by `/admin` routes; `None` leaves them open.
    pub admin_token: Option<String>,
}

impl Config {
    /// Build [`Config`] from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        let work_dir = PathBuf::from(env_or("DOCGRAB_WORK_DIR", "./scribd-dl"));
        Self {
            bind_address: env_or("DOCGRAB_BIND", "0.0.0.0:5000"),
            work_dir: std::path::absolute(&work_dir).unwrap_or(work_dir),
            command: env_or("DOCGRAB_COMMAND", "npm"),
            command_args: env_or("DOCGRAB_COMMAND_ARGS", "start")
                .split_whitespace()
                .map(str::to_owned)
                .collect(),
            title: env_or("DOCGRAB_TITLE", "SCRIBD PDF Download"),
            max_concurrent: parse_env("DOCGRAB_MAX_CONCURRENT", 4),
            queue_capacity: parse_env("DOCGRAB_QUEUE_CAPACITY", 16),
            store_capacity: parse_env("DOCGRAB_STORE_CAPACITY", 256),
            task_ttl_secs: parse_env("DOCGRAB_TASK_TTL_SECS", 3600),
            task_timeout_secs: parse_env("DOCGRAB_TASK_TIMEOUT_SECS", 0),
            sweep_interval_secs: parse_env("DOCGRAB_SWEEP_INTERVAL_SECS", 60),
            max_body_bytes: parse_env("DOCGRAB_MAX_BODY_BYTES", 64 * 1024),
            log_level: env_or("DOCGRAB_LOG", "info"),
            log_json: env_flag("DOCGRAB_LOG_JSON", false),
            cors_allowed_origins: std::env::var("DOCGRAB_CORS_ORIGINS").ok(),
            enable_swagger: env_flag("DOCGRAB_ENABLE_SWAGGER", true),
            admin_token: std::env::var("DOCGRAB_ADMIN_TOKEN")
                .ok()
                .filter(|t| !t.is_empty()),
        }
    }

    /// Limits handed to the task coordinator.
    pub fn coordinator(&self) -> CoordinatorConfig {
        CoordinatorConfig {
            max_concurrent: self.max_concurrent,
            queue_capacity: self.queue_capacity,
            store_capacity: self.store_capacity,
            ttl: Duration::from_secs(self.task_ttl_secs),
            timeout: (self.task_timeout_secs > 0)
                .then(|| Duration::from_secs(self.task_timeout_secs)),
        }
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:5000".to_owned(),
            work_dir: PathBuf::from("./scribd-dl"),
            command: "npm".to_owned(),
            command_args: vec!["start".to_owned()],
            title: "SCRIBD PDF Download".to_owned(),
            max_concurrent: 4,
            queue_capacity: 16,
            store_capacity: 256,
            task_ttl_secs: 3600,
            task_timeout_secs: 0,
            sweep_interval_secs: 60,
            max_body_bytes: 64 * 1024,
            log_level: "info".to_owned(),
            log_json: false,
            cors_allowed_origins: None,
            enable_swagger: true,
            admin_token: None,
        }
    }
}

// ── private helpers ──────────────────────────────────────────────────────────

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_owned())
}

fn parse_env<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_flag(key: &str, default: bool) -> bool {
    std::env::var(key)
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(default)
}
