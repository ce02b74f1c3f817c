use clap::Parser;
use color_eyre::{eyre::eyre, Result};
use sensortwin::config::AgentConfig;
use sensortwin::device_api::HttpDeviceApi;
use sensortwin::mqtt::mqtt_handler::MqttHandler;
use sensortwin::orchestrator::{AgentSettings, SyncAgent};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// Device shadow sync agent
#[derive(Parser, Debug)]
#[command(name = "sensortwin", version, about)]
struct Cli {
    /// Path to agent.toml; defaults to the user config directory
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    setup()?;

    let config = AgentConfig::load(cli.config.as_deref()).await?;
    info!(
        "Starting agent for device {} (broker {}:{}, API {})",
        config.device.name, config.mqtt.host, config.mqtt.port, config.device.endpoint
    );

    let transport = Arc::new(MqttHandler::new(&config.mqtt, &config.client_id())?);
    let mut fatal_events = transport.fatal_events();
    let api = Arc::new(HttpDeviceApi::new(
        &config.device.endpoint,
        config.http_timeout(),
    )?);

    let agent = SyncAgent::create(AgentSettings::from(&config), transport.clone(), api)
        .start()
        .await?;

    tokio::select! {
        _ = shutdown_signal() => {
            info!("Termination signal received");
            agent.shutdown().await;
            let status = transport.status().await;
            info!(
                "Shutdown complete ({} messages sent, {} received)",
                status.messages_sent, status.messages_received
            );
            Ok(())
        }
        reason = fatal_event(&mut fatal_events) => {
            error!("Fatal transport error: {}", reason);
            Err(eyre!("Fatal transport error: {}", reason))
        }
    }
}

fn setup() -> Result<()> {
    if std::env::var("RUST_LIB_BACKTRACE").is_err() {
        std::env::set_var("RUST_LIB_BACKTRACE", "0")
    }
    color_eyre::install()?;
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "info")
    }
    setup_logging_env();
    Ok(())
}

fn setup_logging_env() {
    FmtSubscriber::builder()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .pretty()
        .init();
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for ctrl-c: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

/// Resolves with the reason of the first fatal transport event
async fn fatal_event(events: &mut watch::Receiver<Option<String>>) -> String {
    loop {
        if let Some(reason) = events.borrow_and_update().clone() {
            return reason;
        }
        if events.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}
