use color_eyre::Result;
use mqtt_gateway::config;
use mqtt_gateway::mqtt::MqttManager;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

const STATUS_INTERVAL: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() -> Result<()> {
    setup()?;

    let explicit = std::env::args_os().nth(1).map(PathBuf::from);
    let mqtt_config = config::load(explicit.as_deref())?;

    info!(
        "Starting MQTT gateway for {} with {} topic(s)",
        mqtt_config.broker_addr(),
        mqtt_config.subscription_set().len()
    );

    let manager = Arc::new(MqttManager::new(&mqtt_config));
    manager.start()?;
    info!("Client id: {}", manager.client_id());

    let reporter = Arc::clone(&manager);
    let status_handle = tokio::spawn(async move {
        let mut status_tick = tokio::time::interval(STATUS_INTERVAL);
        status_tick.tick().await;
        loop {
            status_tick.tick().await;
            let status = reporter.status();
            info!(
                "Status: {:?}, {} cached key(s), {} received, {} published",
                status.state,
                status.cached_keys,
                status.messages_received,
                status.messages_published
            );
        }
    });

    tokio::signal::ctrl_c().await?;
    info!("Ctrl-C received, shutting down");

    status_handle.abort();
    manager.stop().await;
    info!("MQTT gateway stopped");
    Ok(())
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
        .with_max_level(Level::INFO)
        .with_target(false)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .pretty()
        .init();
}
