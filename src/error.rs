//! Coordinator error type, codes and exit statuses
//!
//! Codes are grouped by hundreds (1xx config, 2xx files, 3xx sockets,
//! 4xx wire format, 5xx averaging, 9xx internal) and each group maps to one
//! process exit status.
//!
//! Per-worker failures during a round (disconnects, malformed replies,
//! timeouts) are not errors at this level: the coordinator turns them into
//! discarded contributions. Only startup failures and aggregation guards
//! surface as [`Error`].

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Stable code printed as `E<n>` in terminal and log output
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum ErrorCode {
    ConfigNotFound = 100,
    ConfigParseError = 101,
    ConfigValidation = 102,

    IoRead = 200,
    IoWrite = 201,
    IoPermission = 202,
    IoNotFound = 203,

    BindFailed = 300,
    ConnectionClosed = 301,
    HandshakeFailed = 302,
    OutboundQueueFull = 303,

    ProtocolMalformed = 401,

    AggregationEmpty = 500,
    AggregationShape = 501,

    InternalError = 900,
}

impl ErrorCode {
    pub fn as_str(&self) -> String {
        format!("E{}", *self as u16)
    }

    /// Process exit status: ten times the code's hundreds digit
    pub fn exit_code(&self) -> i32 {
        match *self as u16 / 100 {
            group @ (1..=5 | 9) => i32::from(group) * 10,
            _ => 1,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.as_str())
    }
}

#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration file not found: {path}")]
    ConfigNotFound { path: PathBuf },

    #[error("Failed to parse configuration {path}: {source}")]
    ConfigParse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    /// A single setting holds an unusable value
    #[error("Configuration validation failed: {field}: {message}")]
    ConfigValidation { field: String, message: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Cannot read {path}")]
    IoRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Cannot write {path}")]
    IoWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O failure: {0}")]
    Io(#[from] std::io::Error),

    #[error("Cannot serialize configuration: {0}")]
    Toml(#[from] toml::ser::Error),

    /// Worker listener could not be bound
    #[error("Failed to listen on {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    /// The transport side of a worker connection is gone
    #[error("Connection {connection} is closed")]
    ConnectionClosed { connection: u64 },

    /// The worker is not draining its outbound queue
    #[error("Outbound queue of connection {connection} is full")]
    OutboundQueueFull { connection: u64 },

    /// Handshake or frame-level failure on a worker socket
    #[error("WebSocket failure: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("Malformed protocol message: {0}")]
    Protocol(#[from] serde_json::Error),

    /// Averaging was requested over zero parameter sets
    #[error("No data to aggregate")]
    EmptyAggregation,

    /// A parameter set does not match the shape of the first one
    #[error("Parameter set {index} does not match the shape of parameter set 0")]
    ShapeMismatch { index: usize },

    #[error("Internal failure: {0}")]
    Internal(String),
}

impl Error {
    pub fn code(&self) -> ErrorCode {
        match self {
            Error::ConfigNotFound { .. } => ErrorCode::ConfigNotFound,
            Error::ConfigParse { .. } => ErrorCode::ConfigParseError,
            Error::ConfigValidation { .. } => ErrorCode::ConfigValidation,
            Error::Config(_) => ErrorCode::ConfigValidation,

            Error::IoRead { .. } => ErrorCode::IoRead,
            Error::IoWrite { .. } => ErrorCode::IoWrite,
            Error::Io(e) => match e.kind() {
                std::io::ErrorKind::NotFound => ErrorCode::IoNotFound,
                std::io::ErrorKind::PermissionDenied => ErrorCode::IoPermission,
                _ => ErrorCode::IoRead,
            },
            Error::Toml(_) => ErrorCode::ConfigParseError,

            Error::Bind { .. } => ErrorCode::BindFailed,
            Error::ConnectionClosed { .. } => ErrorCode::ConnectionClosed,
            Error::OutboundQueueFull { .. } => ErrorCode::OutboundQueueFull,
            Error::WebSocket(_) => ErrorCode::HandshakeFailed,

            Error::Protocol(_) => ErrorCode::ProtocolMalformed,

            Error::EmptyAggregation => ErrorCode::AggregationEmpty,
            Error::ShapeMismatch { .. } => ErrorCode::AggregationShape,

            Error::Internal(_) => ErrorCode::InternalError,
        }
    }

    pub fn exit_code(&self) -> i32 {
        self.code().exit_code()
    }

    /// Operator hint printed under the terminal message
    pub fn suggestion(&self) -> Option<&'static str> {
        match self {
            Error::ConfigNotFound { .. } => Some(
                "Run 'fedavg-coordinator config init' to create a default configuration file."
            ),
            Error::ConfigParse { .. } => Some(
                "Check your configuration file syntax. Run 'fedavg-coordinator config validate' to see details."
            ),
            Error::ConfigValidation { .. } => Some(
                "Review the configuration file and fix the invalid values."
            ),
            Error::Bind { .. } => Some(
                "Another process may already use this address. Change [server].listen_addr or pass --listen."
            ),
            _ => None,
        }
    }

    /// Red code and message, then a yellow hint when one exists
    pub fn format_for_terminal(&self) -> String {
        let hint = self
            .suggestion()
            .map(|hint| format!("\n\x1b[33mHint\x1b[0m: {}\n", hint))
            .unwrap_or_default();

        format!("\x1b[31mError [{}]\x1b[0m: {}\n{}", self.code(), self, hint)
    }

    /// `[E<n>] message`, without ANSI colors
    pub fn format_for_log(&self) -> String {
        format!("[{}] {}", self.code(), self)
    }

    /// Validation failure for a dotted setting name such as `session.min_workers`
    pub fn config_field_invalid(field: impl Into<String>, message: impl Into<String>) -> Self {
        Error::ConfigValidation {
            field: field.into(),
            message: message.into(),
        }
    }
}
