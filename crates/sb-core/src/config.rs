use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Top-level configuration loaded from `~/.switchboard/config.toml`.
///
/// Only the listening port and the session cap are required to run; every
/// other section falls back to defaults. Environment overrides are applied
/// on top with [`Config::apply_env`].
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub sessions: SessionsConfig,
    #[serde(default)]
    pub agents: AgentsConfig,
    /// Named project directories, used to resolve `project` on terminal creation.
    #[serde(default)]
    pub projects: BTreeMap<String, String>,
}

impl Config {
    /// Load config from `$SWITCHBOARD_CONFIG` or `~/.switchboard/config.toml`,
    /// falling back to defaults when the file does not exist.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::default_path();
        if path.exists() {
            Self::load_from(path)
        } else {
            let cfg = Config::default();
            cfg.validate()?;
            Ok(cfg)
        }
    }

    /// Load from a specific path.
    pub fn load_from(path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let path = path.into();
        let text = std::fs::read_to_string(&path).map_err(|e| ConfigError::Io(e.to_string()))?;
        let cfg: Config = toml::from_str(&text).map_err(|e| ConfigError::Parse(e.to_string()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Serialize config to TOML string.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        self.validate()?;
        toml::to_string_pretty(self).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Apply `SWITCHBOARD_*` environment overrides, then re-validate.
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        self.apply_vars(|key| std::env::var(key).ok())
    }

    /// Same as [`Config::apply_env`] but reading from an arbitrary lookup,
    /// which keeps tests away from the process environment.
    pub fn apply_vars(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        if let Some(port) = lookup("SWITCHBOARD_PORT") {
            self.gateway.port = port.trim().parse().map_err(|_| {
                ConfigError::Validation(format!("SWITCHBOARD_PORT is not a port: {port}"))
            })?;
        }
        if let Some(max) = lookup("SWITCHBOARD_MAX_SESSIONS") {
            self.sessions.max_sessions = max.trim().parse().map_err(|_| {
                ConfigError::Validation(format!("SWITCHBOARD_MAX_SESSIONS is not a number: {max}"))
            })?;
        }
        if let Some(host) = lookup("SWITCHBOARD_HOST") {
            self.gateway.host = host;
        }
        if let Some(format) = lookup("SWITCHBOARD_LOG_FORMAT") {
            self.general.log_format = format;
        }
        self.validate()
    }

    /// Semantic validation for settings that are not fully expressible via type checks.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.gateway.port == 0 {
            return Err(ConfigError::Validation("gateway.port must be non-zero".into()));
        }
        if self.gateway.heartbeat_secs == 0 {
            return Err(ConfigError::Validation(
                "gateway.heartbeat_secs must be at least 1".into(),
            ));
        }
        if self.sessions.max_sessions == 0 {
            return Err(ConfigError::Validation(
                "sessions.max_sessions must be at least 1".into(),
            ));
        }
        if self.sessions.idle_timeout_secs == 0 {
            return Err(ConfigError::Validation(
                "sessions.idle_timeout_secs must be at least 1".into(),
            ));
        }
        if self.sessions.output_log_capacity == 0 {
            return Err(ConfigError::Validation(
                "sessions.output_log_capacity must be at least 1".into(),
            ));
        }
        if self.sessions.default_cols == 0 || self.sessions.default_rows == 0 {
            return Err(ConfigError::Validation(
                "sessions.default_cols and sessions.default_rows must be non-zero".into(),
            ));
        }
        match self.general.log_format.as_str() {
            "pretty" | "json" => Ok(()),
            other => Err(ConfigError::Validation(format!(
                "general.log_format must be \"pretty\" or \"json\", got {other:?}"
            ))),
        }
    }

    fn default_path() -> PathBuf {
        if let Ok(path) = std::env::var("SWITCHBOARD_CONFIG") {
            return PathBuf::from(path);
        }
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".switchboard")
            .join("config.toml")
    }
}

// ---------------------------------------------------------------------------
// Error
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("io: {0}")]
    Io(String),
    #[error("parse: {0}")]
    Parse(String),
    #[error("validation: {0}")]
    Validation(String),
}

// ---------------------------------------------------------------------------
// Section structs
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// `"pretty"` or `"json"`.
    #[serde(default = "default_log_format")]
    pub log_format: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format: default_log_format(),
        }
    }
}

fn default_log_level() -> String {
    "info".into()
}
fn default_log_format() -> String {
    "pretty".into()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_gateway_host")]
    pub host: String,
    #[serde(default = "default_gateway_port")]
    pub port: u16,
    /// Interval between WebSocket ping frames.
    #[serde(default = "default_heartbeat_secs")]
    pub heartbeat_secs: u64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: default_gateway_host(),
            port: default_gateway_port(),
            heartbeat_secs: default_heartbeat_secs(),
        }
    }
}

impl GatewayConfig {
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn default_gateway_host() -> String {
    "127.0.0.1".into()
}
fn default_gateway_port() -> u16 {
    8080
}
fn default_heartbeat_secs() -> u64 {
    30
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionsConfig {
    #[serde(default = "default_max_sessions")]
    pub max_sessions: usize,
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,
    #[serde(default = "default_output_log_capacity")]
    pub output_log_capacity: usize,
    #[serde(default = "default_cols")]
    pub default_cols: u16,
    #[serde(default = "default_rows")]
    pub default_rows: u16,
    /// Whether session output is scanned for `handoff-to:` requests unless
    /// a session opts out.
    #[serde(default = "default_true")]
    pub scan_handoffs: bool,
    /// Working directory for sessions with neither a directory nor a project.
    #[serde(default)]
    pub scratch_dir: Option<String>,
}

impl Default for SessionsConfig {
    fn default() -> Self {
        Self {
            max_sessions: default_max_sessions(),
            idle_timeout_secs: default_idle_timeout_secs(),
            output_log_capacity: default_output_log_capacity(),
            default_cols: default_cols(),
            default_rows: default_rows(),
            scan_handoffs: true,
            scratch_dir: None,
        }
    }
}

impl SessionsConfig {
    /// The per-instance scratch directory. Not created here; the process
    /// adapter creates it on first use.
    pub fn scratch_path(&self) -> PathBuf {
        match &self.scratch_dir {
            Some(dir) => PathBuf::from(dir),
            None => dirs::data_local_dir()
                .unwrap_or_else(std::env::temp_dir)
                .join("switchboard")
                .join("scratch")
                .join(std::process::id().to_string()),
        }
    }
}

fn default_max_sessions() -> usize {
    10
}
fn default_idle_timeout_secs() -> u64 {
    30 * 60
}
fn default_output_log_capacity() -> usize {
    1000
}
fn default_cols() -> u16 {
    80
}
fn default_rows() -> u16 {
    24
}
fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentsConfig {
    /// Shell override; `$SHELL` and then a platform default are used otherwise.
    #[serde(default)]
    pub shell: Option<String>,
    #[serde(default = "default_claude_binary")]
    pub claude_binary: String,
    #[serde(default)]
    pub claude_args: Vec<String>,
    #[serde(default = "default_gordon_binary")]
    pub gordon_binary: String,
    #[serde(default = "default_gordon_args")]
    pub gordon_args: Vec<String>,
}

impl Default for AgentsConfig {
    fn default() -> Self {
        Self {
            shell: None,
            claude_binary: default_claude_binary(),
            claude_args: Vec::new(),
            gordon_binary: default_gordon_binary(),
            gordon_args: default_gordon_args(),
        }
    }
}

fn default_claude_binary() -> String {
    "claude".into()
}
fn default_gordon_binary() -> String {
    "docker".into()
}
fn default_gordon_args() -> Vec<String> {
    vec!["ai".into()]
}
