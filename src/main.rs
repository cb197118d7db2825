//! resilient-mqtt command line client

use bytes::Bytes;
use clap::{Parser, Subcommand};
use resilient_mqtt::config::ClientConfig;
use resilient_mqtt::factory;
use resilient_mqtt::observability::{init_default_logging, init_logging, LogFormat};
use resilient_mqtt::router::{handler_fn, RawDecoder, TopicRouter};
use resilient_mqtt::supervisor::{ConnectionSupervisor, NoopObserver, SupervisorState};
use resilient_mqtt::transport::mqtt::{qos_from_u8, MqttTransport};
use resilient_mqtt::HandlerError;
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info, warn, Level};

/// Resilient MQTT client
#[derive(Parser)]
#[command(name = "resilient-mqtt")]
#[command(about = "MQTT client with automatic reconnection and topic routing")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE", env = "RESILIENT_MQTT_CONFIG")]
    config: Option<PathBuf>,

    /// Verbose logging (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect, subscribe to the configured topics and log every message
    Run,
    /// Publish one message and exit
    Publish {
        #[arg(short, long)]
        topic: String,
        #[arg(short, long)]
        message: String,
        #[arg(long, default_value_t = 1, value_parser = clap::value_parser!(u8).range(0..=2))]
        qos: u8,
        #[arg(long)]
        retain: bool,
    },
    /// Validate configuration
    Config {
        /// Show effective configuration
        #[arg(long)]
        show: bool,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    match cli.verbose {
        0 => init_default_logging(),
        1 => init_logging(Level::DEBUG, LogFormat::Pretty, false),
        _ => init_logging(Level::TRACE, LogFormat::Pretty, true),
    }

    info!("Starting resilient-mqtt v{}", env!("CARGO_PKG_VERSION"));

    let config = match load_configuration(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            process::exit(1);
        }
    };

    let result = match cli.command {
        Commands::Run => run_client(config).await,
        Commands::Publish {
            topic,
            message,
            qos,
            retain,
        } => publish_once(config, topic, message, qos, retain).await,
        Commands::Config { show } => handle_config_command(&config, show),
    };

    if let Err(e) = result {
        error!("Command failed: {}", e);
        process::exit(1);
    }

    info!("Application shutdown complete");
}

fn load_configuration(
    config_path: &Option<PathBuf>,
) -> Result<ClientConfig, Box<dyn std::error::Error>> {
    match config_path {
        Some(path) => {
            info!("Loading configuration from: {}", path.display());
            Ok(ClientConfig::load_from_file(path)?)
        }
        None => {
            let default_paths = ["resilient-mqtt.toml", "config/resilient-mqtt.toml"];

            for path_str in default_paths {
                let path = PathBuf::from(path_str);
                if path.exists() {
                    info!("Loading configuration from: {}", path.display());
                    return Ok(ClientConfig::load_from_file(&path)?);
                }
            }

            warn!("No configuration file found, using defaults");
            Ok(ClientConfig::default())
        }
    }
}

async fn run_client(config: ClientConfig) -> Result<(), Box<dyn std::error::Error>> {
    if config.mqtt.topics.is_empty() {
        warn!("No topics configured, nothing will be received");
    }

    let router = Arc::new(TopicRouter::new());
    for topic in &config.mqtt.topics {
        router.register(
            topic,
            RawDecoder,
            handler_fn(|topic: String, payload: Bytes| async move {
                info!(
                    topic = %topic,
                    bytes = payload.len(),
                    payload = %String::from_utf8_lossy(&payload),
                    "Message received"
                );
                Ok::<(), HandlerError>(())
            }),
            resilient_mqtt::supervisor::DEFAULT_QOS,
        )?;
    }

    let supervisor = factory::build(&config, router.clone(), Arc::new(NoopObserver))?;
    if let Err(e) = factory::bootstrap(&supervisor, &router, &config).await {
        if !config.reconnect.auto_retry_initial_connect {
            supervisor.shutdown().await;
            return Err(e.into());
        }
        warn!("Initial connection failed, retrying in the background: {}", e);
    }

    let mut sigint = signal::unix::signal(signal::unix::SignalKind::interrupt())?;
    let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())?;

    info!("Client is running, waiting for messages");

    let exhausted = tokio::select! {
        _ = sigint.recv() => {
            info!("Received SIGINT, shutting down gracefully...");
            false
        }
        _ = sigterm.recv() => {
            info!("Received SIGTERM, shutting down gracefully...");
            false
        }
        _ = wait_for_exhaustion(supervisor.state_changes()) => {
            error!("Reconnect attempts exhausted, shutting down...");
            true
        }
    };

    log_stats(&supervisor);
    supervisor.shutdown().await;

    if exhausted {
        return Err("connection to broker permanently lost".into());
    }
    Ok(())
}

async fn publish_once(
    config: ClientConfig,
    topic: String,
    message: String,
    qos: u8,
    retain: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let qos = qos_from_u8(qos).ok_or_else(|| format!("Invalid QoS level: {qos}"))?;

    let mut config = config;
    config.reconnect.auto_retry_initial_connect = false;
    let supervisor = factory::build(&config, Arc::new(TopicRouter::new()), Arc::new(NoopObserver))?;

    let result = async {
        supervisor.connect().await?;
        supervisor.publish(&topic, message, qos, retain).await?;
        info!(topic = %topic, qos = ?qos, retain = retain, "Message published");
        Ok::<(), Box<dyn std::error::Error>>(())
    }
    .await;

    supervisor.shutdown().await;
    result
}

fn handle_config_command(
    config: &ClientConfig,
    show: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    if show {
        println!("Current configuration:");
        println!("{}", config.to_toml_string()?);
    }

    info!("Configuration validation complete");
    Ok(())
}

/// Resolve once the supervisor gave up reconnecting
async fn wait_for_exhaustion(mut states: watch::Receiver<SupervisorState>) {
    loop {
        if matches!(*states.borrow_and_update(), SupervisorState::Exhausted { .. }) {
            return;
        }
        if states.changed().await.is_err() {
            // Supervisor dropped; never resolve
            std::future::pending::<()>().await;
        }
    }
}

fn log_stats(supervisor: &ConnectionSupervisor<MqttTransport>) {
    match serde_json::to_string(&supervisor.stats()) {
        Ok(stats) => info!(stats = %stats, "Connection statistics"),
        Err(e) => warn!("Failed to serialize statistics: {}", e),
    }
}
