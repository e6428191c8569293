use clap::Parser;
use enclosure_monitor::config::{self, Config, LoggingConfig};
use enclosure_monitor::control::FanActuator;
use enclosure_monitor::hardware::{
    ClimateSensor, FanOutput, GpioFan, Offloaded, Sht3x, SimulatedClimate, SimulatedFan,
};
use enclosure_monitor::monitor::{self, Monitor, StopReason};
use enclosure_monitor::mqtt::{Gateway, MqttClient, Topics};
use enclosure_monitor::sensor::SensorReader;
use enclosure_monitor::{MonitorError, Result};
use log::{error, info, warn};
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use tokio::signal::unix::{SignalKind, signal};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// How long to wait for the MQTT event loop to finish after disconnecting.
const MQTT_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Parser)]
#[command(
    name = "enclosure-monitor",
    version,
    about = "Enclosure climate monitor and fan controller"
)]
struct Cli {
    /// Use simulated fan and sensor instead of GPIO/I2C
    #[arg(long, env = "SIMULATE")]
    simulate: bool,

    /// Log level filter (overridden by RUST_LOG)
    #[arg(long, env = "LOG_LEVEL")]
    log_level: Option<String>,

    /// Also write log records to this file
    #[arg(long, env = "LOG_FILE")]
    log_file: Option<PathBuf>,

    /// Skip the configured startup delay
    #[arg(long)]
    no_startup_delay: bool,
}

/// Writes every log record to stderr and a log file.
struct Tee {
    file: File,
}

impl Write for Tee {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        io::stderr().write_all(buf)?;
        self.file.write_all(buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        io::stderr().flush()?;
        self.file.flush()
    }
}

fn init_logger(logging: &LoggingConfig) {
    let env = env_logger::Env::default().default_filter_or(logging.level.as_str());
    let mut builder = env_logger::Builder::from_env(env);
    builder.format_timestamp_millis();

    let mut file_error = None;
    if let Some(path) = &logging.file {
        match OpenOptions::new().create(true).append(true).open(path) {
            Ok(file) => {
                builder.target(env_logger::Target::Pipe(Box::new(Tee { file })));
            }
            Err(e) => file_error = Some(format!("{}: {}", path.display(), e)),
        }
    }

    builder.init();
    if let Some(e) = file_error {
        warn!("Could not open log file {}, logging to stderr only", e);
    }
}

fn open_hardware(
    config: &Config,
    simulate: bool,
) -> Result<(Box<dyn FanOutput>, Box<dyn ClimateSensor>)> {
    if simulate {
        info!("Using simulated hardware");
        let fan = SimulatedFan::new();
        let climate = SimulatedClimate::new(24.0, 45.0).with_fan(fan.probe());
        return Ok((Box::new(fan), Box::new(climate)));
    }

    let fan = GpioFan::open(&config.hardware)?;
    let sensor = Sht3x::open(&config.hardware)?;
    Ok((Box::new(fan), Box::new(Offloaded::new(sensor))))
}

/// Cancel `token` on Ctrl+C or SIGTERM.
fn spawn_signal_handler(token: CancellationToken) -> Result<()> {
    let mut terminate = signal(SignalKind::terminate())?;
    tokio::spawn(async move {
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                if let Err(e) = result {
                    error!("Failed to listen for shutdown signal: {}", e);
                }
            }
            _ = terminate.recv() => {}
        }
        info!("Received shutdown signal");
        token.cancel();
    });
    Ok(())
}

async fn run(config: Config, simulate: bool, cancel: CancellationToken) -> Result<StopReason> {
    let (fan_output, sensor) = open_hardware(&config, simulate)?;
    let mut fan = FanActuator::new(fan_output, config.thresholds.max_fan_runtime);

    let topics = Topics::new(&config.mqtt.topic_prefix);
    info!(
        "Connecting to MQTT broker at {}:{}",
        config.mqtt.broker_host, config.mqtt.broker_port
    );
    let client = match MqttClient::new(&config.mqtt, &topics.availability)
        .connect(config.monitor.connect_timeout)
        .await
    {
        Ok(client) => client,
        Err(e) => {
            fan.release();
            return Err(e);
        }
    };
    let publisher = client.publisher(config.monitor.publish_timeout);

    let (event_tx, event_rx) = mpsc::channel(100);
    let mut mqtt_handle = tokio::spawn(client.run(event_tx));

    let reader = SensorReader::new(
        sensor,
        config.monitor.temperature_unit,
        config.monitor.sensor_timeout,
    );
    let gateway = Gateway::new(
        publisher,
        topics,
        config.discovery.clone(),
        config.monitor.temperature_unit,
        config.mqtt.retain,
    );

    let mut monitor = Monitor::new(&config, reader, fan, gateway);
    let reason = monitor.run(event_rx, cancel).await;

    if tokio::time::timeout(MQTT_DRAIN_TIMEOUT, &mut mqtt_handle)
        .await
        .is_err()
    {
        warn!("MQTT event loop did not stop in time");
        mqtt_handle.abort();
    }

    Ok(reason)
}

fn main() -> ExitCode {
    // The environment must be complete before any runtime thread exists
    config::load_dotenv();
    let cli = Cli::parse();

    match tokio::runtime::Runtime::new() {
        Ok(runtime) => runtime.block_on(async_main(cli)),
        Err(e) => {
            eprintln!("Failed to start async runtime: {}", e);
            ExitCode::FAILURE
        }
    }
}

async fn async_main(cli: Cli) -> ExitCode {
    let mut config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Invalid configuration: {}", e);
            return ExitCode::FAILURE;
        }
    };
    if let Some(level) = cli.log_level {
        config.logging.level = level;
    }
    if cli.log_file.is_some() {
        config.logging.file = cli.log_file;
    }
    if cli.no_startup_delay {
        config.monitor.startup_delay = Duration::ZERO;
    }

    init_logger(&config.logging);
    info!("Starting enclosure monitor v{}", env!("CARGO_PKG_VERSION"));
    info!("Configuration loaded:");
    info!(
        "  Thresholds: on {}{unit}, off {}{unit}, critical {}{unit}",
        config.thresholds.on,
        config.thresholds.off,
        config.thresholds.critical,
        unit = config.monitor.temperature_unit.symbol()
    );
    info!("  Max fan runtime: {}s", config.thresholds.max_fan_runtime.as_secs());
    info!(
        "  Update interval: {}s, publish interval: {}s",
        config.monitor.update_interval.as_secs(),
        config.monitor.publish_interval.as_secs()
    );

    let cancel = CancellationToken::new();
    if let Err(e) = spawn_signal_handler(cancel.clone()) {
        error!("Failed to install signal handlers: {}", e);
        return ExitCode::FAILURE;
    }

    if !monitor::startup_delay(config.monitor.startup_delay, &cancel).await {
        info!("Shutdown requested during startup delay");
        return ExitCode::SUCCESS;
    }

    match run(config, cli.simulate, cancel).await {
        Ok(StopReason::Cancelled) => {
            info!("Enclosure monitor stopped");
            ExitCode::SUCCESS
        }
        Ok(StopReason::EventStreamClosed) => {
            error!("Enclosure monitor stopped after losing the MQTT event loop");
            ExitCode::FAILURE
        }
        Err(e @ MonitorError::Hardware(_)) => {
            error!("Failed to initialize hardware: {}", e);
            ExitCode::FAILURE
        }
        Err(e) => {
            error!("Fatal error: {}", e);
            ExitCode::FAILURE
        }
    }
}
