/// Incremental reader of the NAS system log
pub mod log_poller;

/// Storage and resource usage metrics collector
pub mod metrics_collector;

/// Schemas of the management API replies
pub mod payloads;

pub use log_poller::{LogCursor, LogPoller};
pub use metrics_collector::MetricsCollector;
