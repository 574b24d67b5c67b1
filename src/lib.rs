/// Error types for the exporter
pub mod error;

/// Log events and metric points
pub mod events;

/// Authenticated session against the NAS management API
pub mod session;

/// Log and metrics collectors
pub mod collectors;

/// Graylog and InfluxDB sinks
pub mod sinks;

/// Polling loop
pub mod scheduler;

/// Configuration management
pub mod config;

// Re-export commonly used types
pub use error::{AuthError, ConfigError, PollError, SinkError, TransportError};
