use crate::collectors::{LogPoller, MetricsCollector};
use crate::error::PollError;
use crate::session::ApiTransport;
use crate::sinks::{LogSink, MetricSink};
use log::{debug, error, info, warn};
use std::time::Duration;
use tokio::sync::watch;

/// Consecutive failed ticks after which a pipeline is reported as degraded
pub const DEGRADED_THRESHOLD: u32 = 5;

/// Log poller paired with the sink its events go to
pub struct LogPipeline {
    poller: LogPoller,
    sink: Box<dyn LogSink>,
}

impl LogPipeline {
    pub fn new(poller: LogPoller, sink: Box<dyn LogSink>) -> Self {
        Self { poller, sink }
    }

    /// Poll and forward every new event, returning how many were delivered
    ///
    /// Every event is attempted even after a failed send; the first send
    /// error is reported once all have been tried.
    async fn run(&mut self, api: &dyn ApiTransport) -> Result<usize, PollError> {
        let events = self.poller.poll(api).await?;

        let mut delivered = 0;
        let mut first_error = None;
        for event in &events {
            match self.sink.send(event).await {
                Ok(()) => delivered += 1,
                Err(e) => {
                    debug!("Failed to send log event '{}': {}", event.message, e);
                    if first_error.is_none() {
                        first_error = Some(e);
                    }
                }
            }
        }

        match first_error {
            None => Ok(delivered),
            Some(e) => {
                warn!(
                    "{} of {} log events were not delivered",
                    events.len() - delivered,
                    events.len()
                );
                Err(PollError::Sink(e))
            }
        }
    }
}

/// Metrics collector paired with the sink its points go to
pub struct MetricsPipeline {
    collector: MetricsCollector,
    sink: Box<dyn MetricSink>,
}

impl MetricsPipeline {
    pub fn new(collector: MetricsCollector, sink: Box<dyn MetricSink>) -> Self {
        Self { collector, sink }
    }

    /// Collect one batch and write it in a single call
    async fn run(&self, api: &dyn ApiTransport) -> Result<usize, PollError> {
        let points = self.collector.collect(api).await?;
        self.sink.write_points(&points).await?;
        Ok(points.len())
    }
}

/// Result of one pipeline within a tick
#[derive(Debug)]
pub enum PipelineOutcome {
    /// The pipeline is not configured
    Disabled,
    /// Number of events or points handed to the sink
    Delivered(usize),
    Failed(PollError),
}

impl PipelineOutcome {
    pub fn is_failure(&self) -> bool {
        matches!(self, PipelineOutcome::Failed(_))
    }
}

/// Outcome of both pipelines for one tick
#[derive(Debug)]
pub struct TickReport {
    pub logs: PipelineOutcome,
    pub metrics: PipelineOutcome,
}

/// Count of consecutive failed ticks of one pipeline
#[derive(Debug)]
struct FailureStreak {
    pipeline: &'static str,
    count: u32,
}

impl FailureStreak {
    fn new(pipeline: &'static str) -> Self {
        Self { pipeline, count: 0 }
    }

    fn record(&mut self, outcome: &PipelineOutcome) {
        match outcome {
            PipelineOutcome::Failed(_) => {
                self.count += 1;
                if self.count == DEGRADED_THRESHOLD {
                    warn!(
                        "{} pipeline failed {} consecutive ticks, entering degraded mode",
                        self.pipeline, self.count
                    );
                }
            }
            PipelineOutcome::Delivered(_) => {
                if self.is_degraded() {
                    info!(
                        "{} pipeline recovered after {} failed ticks",
                        self.pipeline, self.count
                    );
                }
                self.count = 0;
            }
            PipelineOutcome::Disabled => {}
        }
    }

    fn is_degraded(&self) -> bool {
        self.count >= DEGRADED_THRESHOLD
    }
}

/// The polling loop
///
/// Owns the authenticated API access and both pipelines. Each tick runs the
/// log pipeline, then the metrics pipeline; a failure in one is logged and
/// neither stops the other nor the loop.
pub struct Exporter {
    api: Box<dyn ApiTransport>,
    interval: Duration,
    logs: Option<LogPipeline>,
    metrics: Option<MetricsPipeline>,
    log_failures: FailureStreak,
    metric_failures: FailureStreak,
}

impl Exporter {
    /// Create an exporter with no pipeline enabled
    pub fn new(api: Box<dyn ApiTransport>, interval: Duration) -> Self {
        Self {
            api,
            interval,
            logs: None,
            metrics: None,
            log_failures: FailureStreak::new("Log"),
            metric_failures: FailureStreak::new("Metrics"),
        }
    }

    pub fn with_log_pipeline(mut self, pipeline: LogPipeline) -> Self {
        self.logs = Some(pipeline);
        self
    }

    pub fn with_metrics_pipeline(mut self, pipeline: MetricsPipeline) -> Self {
        self.metrics = Some(pipeline);
        self
    }

    /// Run both pipelines once
    ///
    /// Never fails: each pipeline's error is logged and reported in the
    /// returned [`TickReport`].
    pub async fn tick(&mut self) -> TickReport {
        let logs = match self.logs.as_mut() {
            None => PipelineOutcome::Disabled,
            Some(pipeline) => match pipeline.run(self.api.as_ref()).await {
                Ok(count) => PipelineOutcome::Delivered(count),
                Err(e) => {
                    error!("Log pipeline failed: {}", e);
                    PipelineOutcome::Failed(e)
                }
            },
        };
        self.log_failures.record(&logs);

        let metrics = match self.metrics.as_ref() {
            None => PipelineOutcome::Disabled,
            Some(pipeline) => match pipeline.run(self.api.as_ref()).await {
                Ok(count) => PipelineOutcome::Delivered(count),
                Err(e) => {
                    error!("Metrics pipeline failed: {}", e);
                    PipelineOutcome::Failed(e)
                }
            },
        };
        self.metric_failures.record(&metrics);

        TickReport { logs, metrics }
    }

    /// Tick until `shutdown` turns true
    ///
    /// The interval is measured from the end of one tick to the start of the
    /// next. Shutdown is only observed between ticks. Once the sender is
    /// dropped no shutdown can be requested any more, and the loop keeps
    /// ticking for the rest of the process lifetime.
    pub async fn run(&mut self, mut shutdown: watch::Receiver<bool>) {
        info!("Polling every {:?}", self.interval);

        let mut shutdown_open = true;
        while !*shutdown.borrow() {
            let report = self.tick().await;
            debug!("Tick finished: {:?}", report);

            if !shutdown_open {
                tokio::time::sleep(self.interval).await;
                continue;
            }

            let closed = tokio::select! {
                _ = tokio::time::sleep(self.interval) => false,
                changed = shutdown.changed() => changed.is_err(),
            };
            if closed {
                warn!("Shutdown channel closed, polling continues until the process exits");
                shutdown_open = false;
                tokio::time::sleep(self.interval).await;
            }
        }

        info!("Polling loop stopped");
    }
}
