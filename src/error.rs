use thiserror::Error;

/// Errors that can occur while authenticating against the management API
#[derive(Error, Debug)]
pub enum AuthError {
    #[error("Login rejected by {address}: {reason}")]
    Rejected { address: String, reason: String },

    #[error("Management API unreachable at {address}: {reason}")]
    Unreachable { address: String, reason: String },

    #[error("Failed to build HTTP client: {0}")]
    Client(String),
}

/// Errors raised by a single request against the management API
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TransportError {
    #[error("Request to {path} failed: {reason}")]
    Request { path: String, reason: String },

    #[error("Request to {path} returned HTTP {status}")]
    Status { path: String, status: u16 },
}

/// Errors raised while delivering data to a sink
#[derive(Error, Debug)]
pub enum SinkError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    HttpError(String),

    #[error("Sink returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Failed to encode payload: {0}")]
    Encode(String),
}

/// Errors that can end one pipeline run inside a tick
///
/// None of these are fatal; the scheduler reduces them to a log line.
#[derive(Error, Debug)]
pub enum PollError {
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Failed to parse {endpoint} payload: {reason}")]
    Parse { endpoint: String, reason: String },

    #[error("Sink error: {0}")]
    Sink(#[from] SinkError),
}

impl PollError {
    pub fn parse(endpoint: &str, reason: impl ToString) -> Self {
        PollError::Parse {
            endpoint: endpoint.to_string(),
            reason: reason.to_string(),
        }
    }
}

/// Errors that can occur during configuration loading
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(String),

    #[error("Invalid configuration value: {0}")]
    ValidationError(String),

    #[error("TOML parse error: {0}")]
    TomlError(#[from] toml::de::Error),
}
