//! Coordinator settings
//!
//! Built-in defaults, then the TOML file, then `FEDAVG_*` environment
//! variables, then command-line flags. Later sources win.

use std::fmt;
use std::fs;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::coordinator::SessionConfig;
use crate::error::{Error, Result};

/// Everything `run` needs, as read from `coordinator.toml`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    /// Listener settings
    pub server: ServerSettings,

    /// Quorum, rounds and timing of training sessions
    pub session: SessionSettings,

    /// Console and file log output
    pub logging: LoggingSettings,
}

/// WebSocket listener settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    /// Address the WebSocket listener binds to
    pub listen_addr: String,

    /// Per-connection queue capacity (frames) in each direction
    pub message_queue_size: usize,
}

/// Training session settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionSettings {
    /// Workers that must be connected before a session starts
    pub min_workers: usize,

    /// Rounds per session
    pub total_rounds: u32,

    /// Local epochs each worker trains per round
    pub local_epochs: u32,

    /// Delay between quorum checks in milliseconds
    pub poll_interval_ms: u64,

    /// Grace delay between reaching quorum and the first broadcast
    pub start_delay_ms: u64,

    /// Pause after each round in milliseconds
    pub round_interval_ms: u64,

    /// Pause after closing all connections at session end
    pub cooldown_ms: u64,

    /// Deadline for all responses of one round, in milliseconds
    pub response_timeout_ms: u64,
}

/// `[logging]` table
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// One of trace, debug, info, warn, error
    pub level: String,

    /// Rolling log file; console only when unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,

    /// Size budget per file in MB; below 10 rotates hourly
    pub max_file_size_mb: u64,

    /// Rotated files kept on disk
    pub max_files: u32,

    /// One JSON object per line instead of compact text
    pub json_format: bool,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:8080".to_string(),
            message_queue_size: 16,
        }
    }
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            min_workers: 2,
            total_rounds: 5,
            local_epochs: 1,
            poll_interval_ms: 1000,
            start_delay_ms: 3000,
            round_interval_ms: 1000,
            cooldown_ms: 2000,
            response_timeout_ms: 60_000,
        }
    }
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: None,
            max_file_size_mb: 100,
            max_files: 5,
            json_format: false,
        }
    }
}

/// Values given on the command line, applied after env overrides
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub listen: Option<String>,
    pub min_workers: Option<usize>,
    pub rounds: Option<u32>,
}

impl CoordinatorConfig {
    /// File (if any) plus environment, validated
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        Self::load_with_overrides(config_path, &CliOverrides::default())
    }

    /// Load configuration and apply CLI overrides on top of file and env values
    pub fn load_with_overrides(config_path: Option<&str>, cli: &CliOverrides) -> Result<Self> {
        let mut config = Self::default();

        if let Some(path) = Self::find_config_file(config_path)? {
            debug!(path = %path.display(), "Loading configuration file");
            let content = fs::read_to_string(&path).map_err(|e| Error::IoRead {
                path: path.clone(),
                source: e,
            })?;
            config = toml::from_str(&content).map_err(|e| Error::ConfigParse {
                path: path.clone(),
                source: e,
            })?;
            info!(path = %path.display(), "Configuration loaded from file");
        }

        config.apply_env_overrides()?;
        config.apply_cli_overrides(cli);

        if let Some(ref file) = config.logging.file {
            config.logging.file = Some(expand_path(file));
        }

        config.validate()?;

        Ok(config)
    }

    /// Explicit path, else the first existing default location
    fn find_config_file(explicit_path: Option<&str>) -> Result<Option<PathBuf>> {
        if let Some(path) = explicit_path {
            let path = PathBuf::from(expand_path(path));
            if path.exists() {
                return Ok(Some(path));
            }
            return Err(Error::ConfigNotFound { path });
        }

        let search_paths = [
            PathBuf::from("fedavg-coordinator.toml"),
            PathBuf::from("config.toml"),
            dirs::config_dir()
                .map(|p| p.join("fedavg").join("coordinator.toml"))
                .unwrap_or_default(),
            dirs::home_dir()
                .map(|p| p.join(".fedavg").join("coordinator.toml"))
                .unwrap_or_default(),
            PathBuf::from("/etc/fedavg/coordinator.toml"),
        ];

        for path in &search_paths {
            if !path.as_os_str().is_empty() && path.exists() {
                debug!(path = %path.display(), "Found configuration file");
                return Ok(Some(path.clone()));
            }
        }

        debug!("No configuration file found, using defaults");
        Ok(None)
    }

    fn apply_env_overrides(&mut self) -> Result<()> {
        self.apply_overrides_from(|key| std::env::var(key).ok())
    }

    /// `FEDAVG_*` overrides read through `var`; a value that does not parse is an error
    fn apply_overrides_from(&mut self, var: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(val) = var("FEDAVG_LISTEN_ADDR") {
            self.server.listen_addr = val;
        }
        parse_var(&var, "FEDAVG_MESSAGE_QUEUE_SIZE", &mut self.server.message_queue_size)?;

        parse_var(&var, "FEDAVG_MIN_WORKERS", &mut self.session.min_workers)?;
        parse_var(&var, "FEDAVG_TOTAL_ROUNDS", &mut self.session.total_rounds)?;
        parse_var(&var, "FEDAVG_LOCAL_EPOCHS", &mut self.session.local_epochs)?;
        parse_var(&var, "FEDAVG_POLL_INTERVAL_MS", &mut self.session.poll_interval_ms)?;
        parse_var(&var, "FEDAVG_START_DELAY_MS", &mut self.session.start_delay_ms)?;
        parse_var(&var, "FEDAVG_ROUND_INTERVAL_MS", &mut self.session.round_interval_ms)?;
        parse_var(&var, "FEDAVG_COOLDOWN_MS", &mut self.session.cooldown_ms)?;
        parse_var(&var, "FEDAVG_RESPONSE_TIMEOUT_MS", &mut self.session.response_timeout_ms)?;

        if let Some(val) = var("FEDAVG_LOG_LEVEL") {
            self.logging.level = val;
        }
        if let Some(val) = var("FEDAVG_LOG_FILE") {
            self.logging.file = Some(val);
        }
        if let Some(val) = var("FEDAVG_LOG_JSON") {
            self.logging.json_format = val.to_lowercase() == "true" || val == "1";
        }

        Ok(())
    }

    fn apply_cli_overrides(&mut self, cli: &CliOverrides) {
        if let Some(ref listen) = cli.listen {
            self.server.listen_addr = listen.clone();
        }
        if let Some(min_workers) = cli.min_workers {
            self.session.min_workers = min_workers;
        }
        if let Some(rounds) = cli.rounds {
            self.session.total_rounds = rounds;
        }
    }

    /// Reject values the coordinator cannot run with
    fn validate(&self) -> Result<()> {
        self.listen_addr()?;

        if self.server.message_queue_size == 0 {
            return Err(Error::config_field_invalid(
                "server.message_queue_size",
                "must be at least 1",
            ));
        }
        if self.session.min_workers == 0 {
            return Err(Error::config_field_invalid(
                "session.min_workers",
                "must be at least 1",
            ));
        }
        if self.session.total_rounds == 0 {
            return Err(Error::config_field_invalid(
                "session.total_rounds",
                "must be at least 1",
            ));
        }
        if self.session.local_epochs == 0 {
            return Err(Error::config_field_invalid(
                "session.local_epochs",
                "must be at least 1",
            ));
        }
        if self.session.poll_interval_ms == 0 {
            return Err(Error::config_field_invalid(
                "session.poll_interval_ms",
                "must be greater than 0",
            ));
        }
        if self.session.response_timeout_ms == 0 {
            return Err(Error::config_field_invalid(
                "session.response_timeout_ms",
                "must be greater than 0",
            ));
        }

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.to_lowercase().as_str()) {
            return Err(Error::config_field_invalid(
                "logging.level",
                format!(
                    "invalid log level '{}', must be one of: {}",
                    self.logging.level,
                    valid_levels.join(", ")
                ),
            ));
        }

        Ok(())
    }

    /// Parsed listen address
    pub fn listen_addr(&self) -> Result<SocketAddr> {
        self.server.listen_addr.parse().map_err(|_| {
            Error::config_field_invalid(
                "server.listen_addr",
                format!("'{}' is not a valid socket address", self.server.listen_addr),
            )
        })
    }

    /// Runtime session parameters for the coordinator
    pub fn session_config(&self) -> SessionConfig {
        let s = &self.session;
        SessionConfig {
            min_workers: s.min_workers,
            total_rounds: s.total_rounds,
            local_epochs: s.local_epochs,
            poll_interval: Duration::from_millis(s.poll_interval_ms),
            start_delay: Duration::from_millis(s.start_delay_ms),
            round_interval: Duration::from_millis(s.round_interval_ms),
            cooldown: Duration::from_millis(s.cooldown_ms),
            response_timeout: Duration::from_millis(s.response_timeout_ms),
        }
    }
}

/// Overwrite `target` with the parsed value of `key`, if set
fn parse_var<T>(var: &impl Fn(&str) -> Option<String>, key: &str, target: &mut T) -> Result<()>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    if let Some(raw) = var(key) {
        *target = raw.trim().parse().map_err(|e| {
            Error::config_field_invalid(key, format!("'{}' is not a valid value: {}", raw, e))
        })?;
    }
    Ok(())
}

/// `~` and `$VAR` expansion; unexpandable paths are kept as written
fn expand_path(path: &str) -> String {
    shellexpand::full(path)
        .unwrap_or_else(|_| std::borrow::Cow::Borrowed(path))
        .into_owned()
}

/// Write the commented default file, refusing to clobber without `force`
pub fn init_config(path: Option<&str>, force: bool) -> Result<PathBuf> {
    let config_path = path
        .map(|p| PathBuf::from(expand_path(p)))
        .unwrap_or_else(|| {
            dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(".fedavg")
                .join("coordinator.toml")
        });

    if config_path.exists() && !force {
        return Err(Error::Config(format!(
            "Configuration file already exists: {}. Use --force to overwrite.",
            config_path.display()
        )));
    }

    if let Some(parent) = config_path.parent() {
        fs::create_dir_all(parent).map_err(|e| Error::IoWrite {
            path: parent.to_path_buf(),
            source: e,
        })?;
    }

    fs::write(&config_path, generate_default_config()).map_err(|e| Error::IoWrite {
        path: config_path.clone(),
        source: e,
    })?;

    Ok(config_path)
}

/// Commented TOML matching `CoordinatorConfig::default()`
fn generate_default_config() -> String {
    r#"# FedAvg Coordinator Configuration

[server]
# Address the WebSocket listener binds to
listen_addr = "0.0.0.0:8080"

# Per-connection queue capacity (frames) in each direction
message_queue_size = 16

[session]
# Workers that must be connected before a session starts
min_workers = 2

# Rounds per session
total_rounds = 5

# Local epochs each worker trains per round
local_epochs = 1

# Delay between quorum checks (milliseconds)
poll_interval_ms = 1000

# Grace delay between reaching quorum and the first broadcast (milliseconds)
start_delay_ms = 3000

# Pause after each round (milliseconds)
round_interval_ms = 1000

# Pause after closing all connections at session end (milliseconds)
cooldown_ms = 2000

# Deadline for all responses of one round (milliseconds)
response_timeout_ms = 60000

[logging]
# trace | debug | info | warn | error
level = "info"

# Uncomment to also write a rolling log file
# file = "~/.fedavg/logs/coordinator.log"

# Per-file size budget in MB (below 10 rotates hourly)
max_file_size_mb = 100

# Rotated files to keep
max_files = 5

# Emit one JSON object per line
json_format = false
"#
    .to_string()
}
