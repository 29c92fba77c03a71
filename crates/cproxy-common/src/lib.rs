use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 3000;
pub const DEFAULT_MODEL: &str = "claude-3.7-sonnet";
pub const DEFAULT_TEMPERATURE: f64 = 0.3;
pub const DEFAULT_TOP_P: f64 = 0.9;
pub const DEFAULT_N: i64 = 1;
pub const DEFAULT_REFRESH_INTERVAL_SECS: u64 = 25 * 60;
pub const DEFAULT_CORS_ORIGINS: &str = "http://localhost:5173";
pub const DEFAULT_CORS_METHODS: &str = "GET,POST,PUT,DELETE,OPTIONS";
pub const DEFAULT_CORS_HEADERS: &str =
    "Accept,Authorization,Content-Type,Content-Length,Accept-Encoding";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value for {field}: {message}")]
    Invalid {
        field: &'static str,
        message: String,
    },
    #[error("read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("parse config file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

/// What the session refresher does when re-deriving the session token fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefreshFailurePolicy {
    /// Keep serving the current credential and retry with exponential backoff.
    #[default]
    Retry,
    /// Log the failure and end the refresher task.
    Stop,
}

impl FromStr for RefreshFailurePolicy {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "retry" => Ok(RefreshFailurePolicy::Retry),
            "stop" => Ok(RefreshFailurePolicy::Stop),
            other => Err(ConfigError::Invalid {
                field: "refresh_failure",
                message: format!("expected `retry` or `stop`, got `{other}`"),
            }),
        }
    }
}

impl fmt::Display for RefreshFailurePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RefreshFailurePolicy::Retry => f.write_str("retry"),
            RefreshFailurePolicy::Stop => f.write_str("stop"),
        }
    }
}

/// Values applied to any optional field the caller leaves out of a chat request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionDefaults {
    pub model: String,
    pub temperature: f64,
    pub top_p: f64,
    pub n: i64,
    pub stream: bool,
}

impl Default for CompletionDefaults {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            temperature: DEFAULT_TEMPERATURE,
            top_p: DEFAULT_TOP_P,
            n: DEFAULT_N,
            stream: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CorsConfig {
    pub origins: Vec<String>,
    pub methods: Vec<String>,
    pub headers: Vec<String>,
    pub allow_credentials: bool,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            origins: split_list(DEFAULT_CORS_ORIGINS),
            methods: split_list(DEFAULT_CORS_METHODS),
            headers: split_list(DEFAULT_CORS_HEADERS),
            allow_credentials: true,
        }
    }
}

/// Deadlines applied to every upstream call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeoutConfig {
    pub connect_secs: u64,
    /// Total deadline per upstream request, streaming included.
    pub request_secs: u64,
    /// Longest silence tolerated between two reads of a response body.
    pub idle_secs: u64,
}

impl TimeoutConfig {
    pub fn connect(&self) -> Duration {
        Duration::from_secs(self.connect_secs)
    }

    pub fn request(&self) -> Duration {
        Duration::from_secs(self.request_secs)
    }

    pub fn idle(&self) -> Duration {
        Duration::from_secs(self.idle_secs)
    }
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connect_secs: 10,
            request_secs: 600,
            idle_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefreshConfig {
    pub interval_secs: u64,
    pub failure: RefreshFailurePolicy,
}

impl RefreshConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            interval_secs: DEFAULT_REFRESH_INTERVAL_SECS,
            failure: RefreshFailurePolicy::default(),
        }
    }
}

/// Final, merged configuration used by the running process.
///
/// Merge order: CLI/ENV > config file > built-in defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GlobalConfig {
    pub host: String,
    pub port: u16,
    /// Directory holding the access-token file.
    pub data_dir: String,
    /// Optional outbound proxy (for upstream egress).
    pub proxy: Option<String>,
    pub completion: CompletionDefaults,
    pub cors: CorsConfig,
    pub timeouts: TimeoutConfig,
    pub refresh: RefreshConfig,
}

impl GlobalConfig {
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            data_dir: ".".to_string(),
            proxy: None,
            completion: CompletionDefaults::default(),
            cors: CorsConfig::default(),
            timeouts: TimeoutConfig::default(),
            refresh: RefreshConfig::default(),
        }
    }
}

/// Optional layer used for merging global config.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GlobalConfigPatch {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub data_dir: Option<String>,
    pub proxy: Option<String>,
    pub model: Option<String>,
    pub temperature: Option<f64>,
    pub top_p: Option<f64>,
    pub n: Option<i64>,
    pub stream: Option<bool>,
    pub refresh_interval_secs: Option<u64>,
    pub refresh_failure: Option<RefreshFailurePolicy>,
    pub connect_timeout_secs: Option<u64>,
    pub request_timeout_secs: Option<u64>,
    pub idle_timeout_secs: Option<u64>,
    pub cors_origins: Option<Vec<String>>,
    pub cors_methods: Option<Vec<String>>,
    pub cors_headers: Option<Vec<String>>,
    pub cors_allow_credentials: Option<bool>,
}

macro_rules! overlay_fields {
    ($dst:ident, $src:ident, $($field:ident),+ $(,)?) => {
        $(
            if $src.$field.is_some() {
                $dst.$field = $src.$field;
            }
        )+
    };
}

impl GlobalConfigPatch {
    /// Reads a JSON patch from disk.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })
    }

    /// Fields set on `other` win.
    pub fn overlay(&mut self, other: GlobalConfigPatch) {
        overlay_fields!(
            self,
            other,
            host,
            port,
            data_dir,
            proxy,
            model,
            temperature,
            top_p,
            n,
            stream,
            refresh_interval_secs,
            refresh_failure,
            connect_timeout_secs,
            request_timeout_secs,
            idle_timeout_secs,
            cors_origins,
            cors_methods,
            cors_headers,
            cors_allow_credentials,
        );
    }

    pub fn into_config(self) -> Result<GlobalConfig, ConfigError> {
        let defaults = GlobalConfig::default();
        let completion = CompletionDefaults {
            model: self
                .model
                .map(|model| model.trim().to_string())
                .filter(|model| !model.is_empty())
                .unwrap_or(defaults.completion.model),
            temperature: self.temperature.unwrap_or(defaults.completion.temperature),
            top_p: self.top_p.unwrap_or(defaults.completion.top_p),
            n: self.n.unwrap_or(defaults.completion.n),
            stream: self.stream.unwrap_or(defaults.completion.stream),
        };
        if !(0.0..=2.0).contains(&completion.temperature) {
            return Err(invalid("temperature", "must be within 0.0..=2.0"));
        }
        if !(0.0..=1.0).contains(&completion.top_p) {
            return Err(invalid("top_p", "must be within 0.0..=1.0"));
        }
        if completion.n < 1 {
            return Err(invalid("n", "must be at least 1"));
        }

        let refresh = RefreshConfig {
            interval_secs: self
                .refresh_interval_secs
                .unwrap_or(defaults.refresh.interval_secs),
            failure: self.refresh_failure.unwrap_or(defaults.refresh.failure),
        };
        if refresh.interval_secs == 0 {
            return Err(invalid("refresh_interval_secs", "must be greater than 0"));
        }

        let timeouts = TimeoutConfig {
            connect_secs: self
                .connect_timeout_secs
                .unwrap_or(defaults.timeouts.connect_secs),
            request_secs: self
                .request_timeout_secs
                .unwrap_or(defaults.timeouts.request_secs),
            idle_secs: self.idle_timeout_secs.unwrap_or(defaults.timeouts.idle_secs),
        };

        let cors = CorsConfig {
            origins: self.cors_origins.unwrap_or(defaults.cors.origins),
            methods: self.cors_methods.unwrap_or(defaults.cors.methods),
            headers: self.cors_headers.unwrap_or(defaults.cors.headers),
            allow_credentials: self
                .cors_allow_credentials
                .unwrap_or(defaults.cors.allow_credentials),
        };

        Ok(GlobalConfig {
            host: self.host.unwrap_or(defaults.host),
            port: self.port.unwrap_or(defaults.port),
            data_dir: self
                .data_dir
                .filter(|dir| !dir.trim().is_empty())
                .unwrap_or(defaults.data_dir),
            proxy: self
                .proxy
                .map(|proxy| proxy.trim().to_string())
                .filter(|proxy| !proxy.is_empty()),
            completion,
            cors,
            timeouts,
            refresh,
        })
    }
}

fn invalid(field: &'static str, message: &str) -> ConfigError {
    ConfigError::Invalid {
        field,
        message: message.to_string(),
    }
}

/// Splits a comma-separated list, dropping blanks.
pub fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect()
}
