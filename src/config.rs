use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::batch::{DEFAULT_MAX_CHUNK_SIZE, MAX_CHUNK_CEILING};
use crate::error::Error;

// ---------------------------------------------------------------------------
// Environment override tracking
// ---------------------------------------------------------------------------

/// Tracks which configuration settings are overridden by environment variables.
#[derive(Debug, Clone, Default)]
pub struct EnvOverrides {
    overrides: HashMap<String, String>,
}

impl EnvOverrides {
    /// Check whether a setting key (e.g. "endpoint.url") is overridden by an env var.
    pub fn is_overridden(&self, key: &str) -> bool {
        self.overrides.contains_key(key)
    }

    /// Get the env var name that overrides the given setting key.
    pub fn env_var_for(&self, key: &str) -> Option<&str> {
        self.overrides.get(key).map(String::as_str)
    }

    /// Get all overrides as a map of setting key -> env var name.
    pub fn all(&self) -> &HashMap<String, String> {
        &self.overrides
    }

    fn record(&mut self, key: &str, env_var: &str) {
        self.overrides.insert(key.to_string(), env_var.to_string());
    }
}

// ---------------------------------------------------------------------------
// Configuration sections
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub endpoint: EndpointConfig,
    #[serde(default)]
    pub batch: BatchConfig,
    #[serde(default)]
    pub pagination: PaginationConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub protocol: ProtocolConfig,
    #[serde(default)]
    pub credentials: CredentialsConfig,
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Settings replaced by `BATCHRPC_*` environment variables (not serialized).
    #[serde(skip)]
    pub env_overrides: EnvOverrides,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EndpointConfig {
    /// JSON-RPC endpoint URL. Required.
    #[serde(default)]
    pub url: String,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    #[serde(default)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            request_timeout_secs: default_request_timeout_secs(),
            connect_timeout_secs: default_connect_timeout_secs(),
            user_agent: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BatchConfig {
    #[serde(default = "default_max_chunk_size")]
    pub max_chunk_size: usize,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            max_chunk_size: default_max_chunk_size(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PaginationConfig {
    #[serde(default = "default_page_size")]
    pub page_size: u64,
    #[serde(default = "default_offset_param")]
    pub offset_param: String,
    #[serde(default = "default_limit_param")]
    pub limit_param: String,
}

impl Default for PaginationConfig {
    fn default() -> Self {
        Self {
            page_size: default_page_size(),
            offset_param: default_offset_param(),
            limit_param: default_limit_param(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,
    #[serde(default = "default_rate_limit_attempts")]
    pub rate_limit_attempts: u32,
    #[serde(default = "default_rate_limit_backoff_ms")]
    pub rate_limit_backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            backoff_multiplier: default_backoff_multiplier(),
            rate_limit_attempts: default_rate_limit_attempts(),
            rate_limit_backoff_ms: default_rate_limit_backoff_ms(),
        }
    }
}

/// JSON-RPC error codes the service uses for conditions below the method layer.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProtocolConfig {
    #[serde(default = "default_auth_expired_codes")]
    pub auth_expired_codes: Vec<i64>,
    #[serde(default = "default_rate_limited_codes")]
    pub rate_limited_codes: Vec<i64>,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            auth_expired_codes: default_auth_expired_codes(),
            rate_limited_codes: default_rate_limited_codes(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CredentialsConfig {
    /// OAuth token endpoint used for refresh exchanges.
    #[serde(default)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_url: Option<String>,
    #[serde(default)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    #[serde(default)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_secret: Option<String>,
    #[serde(default = "default_storage_backend")]
    pub storage_backend: StorageBackend,
    #[serde(default = "default_token_storage_dir")]
    pub token_storage_dir: PathBuf,
    #[serde(default = "default_profile")]
    pub profile: String,
}

impl Default for CredentialsConfig {
    fn default() -> Self {
        Self {
            token_url: None,
            client_id: None,
            client_secret: None,
            storage_backend: default_storage_backend(),
            token_storage_dir: default_token_storage_dir(),
            profile: default_profile(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum StorageBackend {
    #[default]
    File,
    Memory,
}

impl std::fmt::Display for StorageBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::File => write!(f, "file"),
            Self::Memory => write!(f, "memory"),
        }
    }
}

impl FromStr for StorageBackend {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "file" => Ok(Self::File),
            "memory" => Ok(Self::Memory),
            _ => Err(format!("Unknown storage backend: {s}")),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

// ---------------------------------------------------------------------------
// Default value functions
// ---------------------------------------------------------------------------

const fn default_request_timeout_secs() -> u64 {
    30
}
const fn default_connect_timeout_secs() -> u64 {
    10
}
const fn default_max_chunk_size() -> usize {
    DEFAULT_MAX_CHUNK_SIZE
}
const fn default_page_size() -> u64 {
    crate::pagination::DEFAULT_PAGE_SIZE
}
fn default_offset_param() -> String {
    "offset".to_string()
}
fn default_limit_param() -> String {
    "limit".to_string()
}
const fn default_max_attempts() -> u32 {
    3
}
const fn default_initial_backoff_ms() -> u64 {
    500
}
const fn default_max_backoff_ms() -> u64 {
    30_000
}
const fn default_backoff_multiplier() -> f64 {
    2.0
}
const fn default_rate_limit_attempts() -> u32 {
    5
}
const fn default_rate_limit_backoff_ms() -> u64 {
    1000
}
fn default_auth_expired_codes() -> Vec<i64> {
    vec![-32001]
}
fn default_rate_limited_codes() -> Vec<i64> {
    vec![-32029]
}
fn default_storage_backend() -> StorageBackend {
    StorageBackend::File
}
fn default_token_storage_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("batchrpc")
        .join("tokens")
}
fn default_profile() -> String {
    crate::oauth::DEFAULT_PROFILE.to_string()
}
fn default_log_level() -> String {
    "info".to_string()
}

// ---------------------------------------------------------------------------
// Loading, saving, validation
// ---------------------------------------------------------------------------

impl Config {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: Config = toml::from_str(&content)?;
            config
        } else {
            tracing::warn!("Config file not found at {}, using defaults", path.display());
            Self::default()
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// Save the current (file-level) configuration to a TOML file.
    /// This serializes the config without env overrides applied.
    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| anyhow::anyhow!("Failed to serialize config: {e}"))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Check cross-field constraints that serde cannot express.
    pub fn validate(&self) -> crate::error::Result<()> {
        validate_http_url("endpoint.url", &self.endpoint.url)?;
        if let Some(token_url) = &self.credentials.token_url {
            validate_http_url("credentials.token_url", token_url)?;
        }
        if self.endpoint.request_timeout_secs == 0 {
            return Err(Error::Config("endpoint.request_timeout_secs must be at least 1".into()));
        }
        if self.batch.max_chunk_size == 0 || self.batch.max_chunk_size > MAX_CHUNK_CEILING {
            return Err(Error::Config(format!(
                "batch.max_chunk_size must be between 1 and {MAX_CHUNK_CEILING}, got {}",
                self.batch.max_chunk_size
            )));
        }
        if self.pagination.page_size == 0 {
            return Err(Error::Config("pagination.page_size must be at least 1".into()));
        }
        if self.pagination.offset_param.is_empty()
            || self.pagination.limit_param.is_empty()
            || self.pagination.offset_param == self.pagination.limit_param
        {
            return Err(Error::Config(
                "pagination.offset_param and pagination.limit_param must be distinct, non-empty names".into(),
            ));
        }
        if self.retry.max_attempts == 0 || self.retry.rate_limit_attempts == 0 {
            return Err(Error::Config("retry attempt limits must be at least 1".into()));
        }
        if !(self.retry.backoff_multiplier.is_finite() && self.retry.backoff_multiplier >= 1.0) {
            return Err(Error::Config(format!(
                "retry.backoff_multiplier must be >= 1.0, got {}",
                self.retry.backoff_multiplier
            )));
        }
        if self.credentials.profile.is_empty() {
            return Err(Error::Config("credentials.profile must not be empty".into()));
        }
        Ok(())
    }

    /// Apply environment variable overrides to the configuration.
    ///
    /// Every supported setting has a corresponding `BATCHRPC_*` env var. When
    /// set, the env var value replaces the file/default value and the setting
    /// key is recorded in `env_overrides`.
    fn apply_env_overrides(&mut self) {
        let mut ov = EnvOverrides::default();

        // -- Helpers (macros for concise per-field overrides) --

        macro_rules! env_str {
            ($key:expr, $env:expr, $field:expr) => {
                if let Ok(val) = std::env::var($env) {
                    $field = val;
                    ov.record($key, $env);
                }
            };
        }
        macro_rules! env_bool {
            ($key:expr, $env:expr, $field:expr) => {
                if let Ok(val) = std::env::var($env) {
                    $field = matches!(val.to_lowercase().as_str(), "1" | "true" | "yes" | "on");
                    ov.record($key, $env);
                }
            };
        }
        macro_rules! env_parse {
            ($key:expr, $env:expr, $field:expr) => {
                if let Ok(val) = std::env::var($env) {
                    if let Ok(parsed) = val.parse() {
                        $field = parsed;
                        ov.record($key, $env);
                    }
                }
            };
        }
        macro_rules! env_path {
            ($key:expr, $env:expr, $field:expr) => {
                if let Ok(val) = std::env::var($env) {
                    $field = PathBuf::from(val);
                    ov.record($key, $env);
                }
            };
        }
        macro_rules! env_opt_str {
            ($key:expr, $env:expr, $field:expr) => {
                if let Ok(val) = std::env::var($env) {
                    $field = if val.is_empty() { None } else { Some(val) };
                    ov.record($key, $env);
                }
            };
        }
        macro_rules! env_codes {
            ($key:expr, $env:expr, $field:expr) => {
                if let Ok(val) = std::env::var($env) {
                    if let Some(codes) = parse_codes(&val) {
                        $field = codes;
                        ov.record($key, $env);
                    }
                }
            };
        }

        // -- Endpoint --
        env_str!("endpoint.url", "BATCHRPC_ENDPOINT_URL", self.endpoint.url);
        env_parse!(
            "endpoint.request_timeout_secs",
            "BATCHRPC_REQUEST_TIMEOUT_SECS",
            self.endpoint.request_timeout_secs
        );
        env_parse!(
            "endpoint.connect_timeout_secs",
            "BATCHRPC_CONNECT_TIMEOUT_SECS",
            self.endpoint.connect_timeout_secs
        );
        env_opt_str!("endpoint.user_agent", "BATCHRPC_USER_AGENT", self.endpoint.user_agent);

        // -- Batch / pagination --
        env_parse!("batch.max_chunk_size", "BATCHRPC_MAX_CHUNK_SIZE", self.batch.max_chunk_size);
        env_parse!("pagination.page_size", "BATCHRPC_PAGE_SIZE", self.pagination.page_size);
        env_str!("pagination.offset_param", "BATCHRPC_OFFSET_PARAM", self.pagination.offset_param);
        env_str!("pagination.limit_param", "BATCHRPC_LIMIT_PARAM", self.pagination.limit_param);

        // -- Retry --
        env_parse!("retry.max_attempts", "BATCHRPC_RETRY_MAX_ATTEMPTS", self.retry.max_attempts);
        env_parse!(
            "retry.initial_backoff_ms",
            "BATCHRPC_RETRY_INITIAL_BACKOFF_MS",
            self.retry.initial_backoff_ms
        );
        env_parse!(
            "retry.max_backoff_ms",
            "BATCHRPC_RETRY_MAX_BACKOFF_MS",
            self.retry.max_backoff_ms
        );
        env_parse!(
            "retry.backoff_multiplier",
            "BATCHRPC_RETRY_BACKOFF_MULTIPLIER",
            self.retry.backoff_multiplier
        );
        env_parse!(
            "retry.rate_limit_attempts",
            "BATCHRPC_RATE_LIMIT_ATTEMPTS",
            self.retry.rate_limit_attempts
        );
        env_parse!(
            "retry.rate_limit_backoff_ms",
            "BATCHRPC_RATE_LIMIT_BACKOFF_MS",
            self.retry.rate_limit_backoff_ms
        );

        // -- Protocol --
        env_codes!(
            "protocol.auth_expired_codes",
            "BATCHRPC_AUTH_EXPIRED_CODES",
            self.protocol.auth_expired_codes
        );
        env_codes!(
            "protocol.rate_limited_codes",
            "BATCHRPC_RATE_LIMITED_CODES",
            self.protocol.rate_limited_codes
        );

        // -- Credentials --
        env_opt_str!("credentials.token_url", "BATCHRPC_TOKEN_URL", self.credentials.token_url);
        env_opt_str!("credentials.client_id", "BATCHRPC_CLIENT_ID", self.credentials.client_id);
        env_opt_str!(
            "credentials.client_secret",
            "BATCHRPC_CLIENT_SECRET",
            self.credentials.client_secret
        );
        env_parse!(
            "credentials.storage_backend",
            "BATCHRPC_TOKEN_STORAGE",
            self.credentials.storage_backend
        );
        env_path!(
            "credentials.token_storage_dir",
            "BATCHRPC_TOKEN_STORAGE_DIR",
            self.credentials.token_storage_dir
        );
        env_str!("credentials.profile", "BATCHRPC_PROFILE", self.credentials.profile);

        // -- Logging --
        env_str!("logging.level", "BATCHRPC_LOG_LEVEL", self.logging.level);
        env_bool!("logging.json", "BATCHRPC_LOG_JSON", self.logging.json);

        self.env_overrides = ov;
    }
}

fn validate_http_url(key: &str, raw: &str) -> crate::error::Result<()> {
    if raw.is_empty() {
        return Err(Error::Config(format!("{key} must be set")));
    }
    let parsed = url::Url::parse(raw)
        .map_err(|e| Error::Config(format!("{key} '{raw}' is not a valid URL: {e}")))?;
    match parsed.scheme() {
        "http" | "https" => Ok(()),
        other => Err(Error::Config(format!(
            "{key} must use http or https, got '{other}'"
        ))),
    }
}

/// Comma-separated integer list; `None` if any element fails to parse.
fn parse_codes(raw: &str) -> Option<Vec<i64>> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| s.parse().ok())
        .collect()
}
