//! LoRa Bridge - Main Entry Point
//!
//! Wires the input client, the processor and the output client together and
//! runs until a shutdown signal or a permanent broker disconnection.

use clap::{Parser, Subcommand};
use lora_bridge::bridge::Bridge;
use lora_bridge::config::{BridgeConfig, SensorDirectory};
use lora_bridge::decoder;
use lora_bridge::observability::{init_default_logging, init_from_config};
use lora_bridge::processing::{PathResolver, Processor, PropertyMapping};
use lora_bridge::transport::mqtt::{
    qos_from_u8, ConnectionState, MqttClient, OperationTimeouts, ReconnectConfig,
};
use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;
use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info, warn};

/// LNS uplink to normalized MQTT readings bridge
#[derive(Parser)]
#[command(name = "lora-bridge")]
#[command(about = "Decode LoRaWAN uplinks and republish normalized sensor readings")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE", env = "LORA_BRIDGE_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the bridge
    Run,
    /// Validate configuration
    Config {
        /// Show the effective configuration
        #[arg(long)]
        show: bool,
    },
    /// Run one uplink envelope through the processor without a broker
    Process {
        /// JSON file holding one LNS uplink envelope
        #[arg(long, value_name = "FILE")]
        file: PathBuf,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let config = match load_configuration(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            let _ = init_default_logging();
            error!("Failed to load configuration: {}", e);
            process::exit(1);
        }
    };

    if let Err(e) = init_from_config(&config.logging) {
        eprintln!("Failed to initialize logging: {e}");
    }
    info!("Starting lora-bridge v{}", env!("CARGO_PKG_VERSION"));

    let result = match cli.command {
        Commands::Run => run_bridge(config).await,
        Commands::Config { show } => handle_config_command(&config, show),
        Commands::Process { file } => process_file(&config, &file).await,
    };

    if let Err(e) = result {
        error!("Command failed: {}", e);
        process::exit(1);
    }

    info!("Application shutdown complete");
}

fn load_configuration(
    config_path: Option<&Path>,
) -> Result<BridgeConfig, Box<dyn std::error::Error>> {
    if let Some(path) = config_path {
        return Ok(BridgeConfig::load_from_file(path)?);
    }

    for candidate in ["lora-bridge.toml", "config/lora-bridge.toml"] {
        let path = Path::new(candidate);
        if path.exists() {
            return Ok(BridgeConfig::load_from_file(path)?);
        }
    }

    Err("no configuration file found; pass -c/--config or create lora-bridge.toml".into())
}

/// Build the processor with its decoder, alias table and write tags
fn build_processor(config: &BridgeConfig) -> Result<Processor, Box<dyn std::error::Error>> {
    let decoder = decoder::from_config(&config.decoder)?;

    let directory = match &config.sensors.map_file {
        Some(path) => SensorDirectory::load_from_file(Path::new(path))?,
        None => SensorDirectory::default(),
    };
    info!(
        devices = directory.names_by_dev_eui.len(),
        tags = directory.tag_ids.len(),
        "Sensor directory loaded"
    );

    let mut processor = Processor::new(decoder, PropertyMapping::from_config(config))
        .with_resolver(PathResolver::with_aliases(&config.field_aliases));
    if config.write_output.is_some() {
        if directory.tag_ids.is_empty() {
            warn!("Write output configured but the sensor directory has no tag_map");
        }
        processor = processor.with_write_tags(directory.tag_ids);
    }
    info!(
        properties = processor.mapping().property_map.len(),
        per_sensor_timestamps = processor.mapping().timestamp.len(),
        per_sensor_status = processor.mapping().status.len(),
        "Property mapping loaded"
    );
    Ok(processor)
}

async fn run_bridge(config: BridgeConfig) -> Result<(), Box<dyn std::error::Error>> {
    let processor = Arc::new(build_processor(&config)?);
    let reconnect = ReconnectConfig::from(&config.reconnect);
    let timeouts = OperationTimeouts::from(&config.timeouts);

    let output = Arc::new(MqttClient::new(
        "output",
        &config.mqtt_output.connection,
        reconnect.clone(),
        timeouts,
    )?);
    let input = MqttClient::new(
        "input",
        &config.mqtt_input.connection,
        reconnect,
        timeouts,
    )?;

    output.connect().await?;
    if let Err(e) = start_input(&config, &input, processor, Arc::clone(&output)).await {
        shutdown_clients(&input, &output).await;
        return Err(e);
    }

    let mut sigint = signal::unix::signal(signal::unix::SignalKind::interrupt())?;
    let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())?;

    info!(topic = %config.mqtt_input.topic, "Bridge is running and listening for uplinks");

    tokio::select! {
        _ = sigint.recv() => {
            info!("Received SIGINT, shutting down gracefully...");
        }
        _ = sigterm.recv() => {
            info!("Received SIGTERM, shutting down gracefully...");
        }
        _ = wait_for_permanent_disconnect(input.state_receiver()) => {
            error!("Input MQTT connection permanently lost, shutting down");
        }
        _ = wait_for_permanent_disconnect(output.state_receiver()) => {
            error!("Output MQTT connection permanently lost, shutting down");
        }
    }

    info!("Application shutdown initiated");
    shutdown_clients(&input, &output).await;
    Ok(())
}

/// Connect the input client and subscribe the bridge; a failure here is fatal
async fn start_input(
    config: &BridgeConfig,
    input: &MqttClient,
    processor: Arc<Processor>,
    output: Arc<MqttClient>,
) -> Result<(), Box<dyn std::error::Error>> {
    input.connect().await?;

    let bridge = Arc::new(Bridge::from_config(config, processor, output)?);
    input
        .subscribe(
            &config.mqtt_input.topic,
            qos_from_u8(config.mqtt_input.qos)?,
            bridge,
        )
        .await?;
    Ok(())
}

async fn shutdown_clients(input: &MqttClient, output: &MqttClient) {
    if let Err(e) = input.disconnect().await {
        error!("Error disconnecting input client: {}", e);
    }
    if let Err(e) = output.disconnect().await {
        error!("Error disconnecting output client: {}", e);
    }
}

/// Resolves once the client gives up reconnecting
async fn wait_for_permanent_disconnect(mut state_rx: watch::Receiver<ConnectionState>) {
    loop {
        if matches!(
            *state_rx.borrow_and_update(),
            ConnectionState::PermanentlyDisconnected(_)
        ) {
            return;
        }
        if state_rx.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

fn handle_config_command(
    config: &BridgeConfig,
    show: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    if show {
        println!("Effective configuration:");
        println!("{}", toml::to_string_pretty(config)?);
    }

    info!("Configuration validation complete");
    Ok(())
}

async fn process_file(
    config: &BridgeConfig,
    file: &Path,
) -> Result<(), Box<dyn std::error::Error>> {
    let processor = build_processor(config)?;
    let raw = std::fs::read(file)?;

    let processed = processor.handle_message(&raw).await?;
    let report = serde_json::json!({
        "base_name": processed.base_name,
        "dev_eui": processed.dev_eui,
        "outputs": processed.outputs,
        "write_payload": processed.write_payload,
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
