use anyhow::Context;
use clap::Parser;
use log::{error, info, warn};
use std::path::PathBuf;
use syno_exporter::collectors::{LogPoller, MetricsCollector};
use syno_exporter::config::Config;
use syno_exporter::scheduler::{Exporter, LogPipeline, MetricsPipeline};
use syno_exporter::session::{ClientOptions, Session};
use syno_exporter::sinks::{GelfUdpSink, InfluxSink};
use tokio::sync::watch;

/// Command-line arguments for the Synology telemetry exporter
#[derive(Parser)]
#[command(
    name = "syno-exporter",
    about = "Synology NAS exporter - forwards system logs to Graylog and storage metrics to InfluxDB",
    long_about = "Polls the DSM management API on a fixed interval. New system log records are \
                  sent to Graylog as GELF messages; disk, pool, volume, CPU and memory figures \
                  are written to InfluxDB as tagged points."
)]
struct Cli {
    /// Path to configuration file
    #[arg(
        short,
        long,
        value_name = "FILE",
        default_value = "config.toml",
        help = "Configuration file path (TOML format)"
    )]
    config: PathBuf,

    /// Enable verbose logging
    #[arg(
        short,
        long,
        help = "Enable verbose logging output (sets RUST_LOG=debug)"
    )]
    verbose: bool,

    /// Run a single tick and exit
    #[arg(
        long,
        help = "Poll once, report the outcome through the exit status and exit"
    )]
    once: bool,
}

impl Cli {
    /// Validate the CLI arguments
    ///
    /// # Returns
    ///
    /// `Ok(())` if all arguments are valid, `Err(String)` with error message otherwise
    fn validate(&self) -> Result<(), String> {
        if !self.config.exists() {
            return Err(format!(
                "Configuration file not found: {}",
                self.config.display()
            ));
        }

        if !self.config.is_file() {
            return Err(format!(
                "Configuration path is not a file: {}",
                self.config.display()
            ));
        }

        if let Some(extension) = self.config.extension() {
            if extension != "toml" {
                warn!(
                    "Configuration file does not have .toml extension: {}",
                    self.config.display()
                );
            }
        }

        Ok(())
    }
}

/// Log in and assemble the pipelines enabled in `config`
async fn build_exporter(config: &Config) -> anyhow::Result<Exporter> {
    let options = ClientOptions {
        timeout: config.request_timeout(),
        accept_invalid_certs: config.synology.accept_invalid_certs,
    };

    let session = Session::login(
        &config.synology.address,
        &config.synology.username,
        &config.synology.password,
        &options,
    )
    .await
    .context("Failed to log in to the management API")?;

    let mut exporter = Exporter::new(Box::new(session), config.interval());

    if config.graylog.enabled {
        let sink = GelfUdpSink::connect(
            &config.graylog.address,
            config.graylog.port,
            &config.graylog.source,
            config.graylog.chunk_size,
        )
        .await
        .context("Failed to initialize Graylog sink")?;
        info!("Graylog sink initialized ({})", sink.target());

        exporter = exporter.with_log_pipeline(LogPipeline::new(
            LogPoller::new(config.synology.log_window),
            Box::new(sink),
        ));
    }

    if config.influxdb.enabled {
        let influx = &config.influxdb;
        let sink = InfluxSink::new(
            &influx.address,
            influx.port,
            &influx.database,
            Some((influx.user.clone(), influx.password.clone())),
            config.request_timeout(),
        )
        .context("Failed to initialize InfluxDB sink")?;
        info!(
            "InfluxDB sink initialized ({}:{}, database {})",
            influx.address, influx.port, influx.database
        );

        exporter = exporter.with_metrics_pipeline(MetricsPipeline::new(
            MetricsCollector::new(),
            Box::new(sink),
        ));
    }

    if !config.graylog.enabled && !config.influxdb.enabled {
        warn!("Neither Graylog nor InfluxDB is enabled, nothing will be collected");
    }

    Ok(exporter)
}

#[tokio::main]
async fn main() {
    // Parse command-line arguments
    let cli = Cli::parse();

    // Initialize logging based on verbosity
    if cli.verbose {
        std::env::set_var("RUST_LOG", "debug");
    }
    env_logger::init();

    info!("Starting Synology exporter");

    if let Err(e) = cli.validate() {
        error!("Invalid arguments: {}", e);
        std::process::exit(1);
    }

    info!("Loading configuration from: {}", cli.config.display());
    let config = match Config::from_file(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };

    let mut exporter = match build_exporter(&config).await {
        Ok(exporter) => exporter,
        Err(e) => {
            error!("Failed to start exporter: {:#}", e);
            std::process::exit(1);
        }
    };

    if cli.once {
        let report = exporter.tick().await;
        info!("Single tick finished: {:?}", report);
        let failed = report.logs.is_failure() || report.metrics.is_failure();
        std::process::exit(if failed { 1 } else { 0 });
    }

    // Stop between ticks on SIGINT
    let (shutdown_sender, shutdown_receiver) = watch::channel(false);
    if let Err(e) = ctrlc::set_handler(move || {
        info!("Received interrupt signal (SIGINT), shutting down gracefully...");
        if let Err(e) = shutdown_sender.send(true) {
            error!("Failed to send shutdown signal: {}", e);
        }
    }) {
        warn!("Failed to install SIGINT handler, graceful shutdown unavailable: {}", e);
    }

    info!("Exporter is running. Press Ctrl+C to stop.");
    exporter.run(shutdown_receiver).await;

    info!("Exporter shutdown complete");
}
