use crate::error::SinkError;
use crate::events::{LogEvent, MetricPoint};
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};

/// Graylog sink speaking GELF over UDP
pub mod gelf;

/// InfluxDB 1.x sink speaking line protocol over HTTP
pub mod influx;

pub use gelf::GelfUdpSink;
pub use influx::InfluxSink;

/// Destination of log events, one call per event
pub trait LogSink: Send + Sync {
    fn send<'a>(
        &'a self,
        event: &'a LogEvent,
    ) -> Pin<Box<dyn Future<Output = Result<(), SinkError>> + Send + 'a>>;
}

/// Destination of metric points, one call per collection
pub trait MetricSink: Send + Sync {
    fn write_points<'a>(
        &'a self,
        points: &'a [MetricPoint],
    ) -> Pin<Box<dyn Future<Output = Result<(), SinkError>> + Send + 'a>>;
}

/// In-memory log sink for tests
///
/// Records every event it accepts. A failing sink rejects every event.
#[derive(Clone, Default)]
pub struct MemoryLogSink {
    events: Arc<Mutex<Vec<LogEvent>>>,
    failing: bool,
}

impl MemoryLogSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self {
            failing: true,
            ..Self::default()
        }
    }

    pub fn events(&self) -> Vec<LogEvent> {
        self.events.lock().unwrap().clone()
    }
}

impl LogSink for MemoryLogSink {
    fn send<'a>(
        &'a self,
        event: &'a LogEvent,
    ) -> Pin<Box<dyn Future<Output = Result<(), SinkError>> + Send + 'a>> {
        Box::pin(async move {
            if self.failing {
                return Err(SinkError::IoError(std::io::Error::new(
                    std::io::ErrorKind::ConnectionRefused,
                    "log sink unavailable",
                )));
            }
            self.events.lock().unwrap().push(event.clone());
            Ok(())
        })
    }
}

/// In-memory metric sink for tests
///
/// Records each accepted batch separately.
#[derive(Clone, Default)]
pub struct MemoryMetricSink {
    batches: Arc<Mutex<Vec<Vec<MetricPoint>>>>,
    failing: bool,
}

impl MemoryMetricSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self {
            failing: true,
            ..Self::default()
        }
    }

    pub fn batches(&self) -> Vec<Vec<MetricPoint>> {
        self.batches.lock().unwrap().clone()
    }
}

impl MetricSink for MemoryMetricSink {
    fn write_points<'a>(
        &'a self,
        points: &'a [MetricPoint],
    ) -> Pin<Box<dyn Future<Output = Result<(), SinkError>> + Send + 'a>> {
        Box::pin(async move {
            if self.failing {
                return Err(SinkError::Status {
                    status: 500,
                    body: "metric sink unavailable".to_string(),
                });
            }
            self.batches.lock().unwrap().push(points.to_vec());
            Ok(())
        })
    }
}
