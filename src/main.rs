use color_eyre::{eyre::eyre, Result};
use padnav::engine::{DeviceBackend, Engine, LoggingHost};
use padnav::PadnavConfig;
use std::path::PathBuf;
use tokio::sync::broadcast::error::RecvError;
use tracing::{error, info, warn, Level};
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() -> Result<()> {
    setup()?;

    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let config = PadnavConfig::load_or_default(config_path.as_deref())
        .await
        .map_err(|e| eyre!("Failed to load config: {}", e))?;

    let engine = Engine::spawn(config, Box::new(LoggingHost::default()), DeviceBackend::Gilrs)
        .map_err(|e| eyre!("Failed to spawn engine: {}", e))?;
    engine
        .initialize()
        .await
        .map_err(|e| eyre!("Failed to initialize engine: {}", e))?;

    let mut controls = engine.subscribe();
    let monitor = tokio::spawn(async move {
        loop {
            match controls.recv().await {
                Ok(event) => info!(
                    "{} {:?} {:?}{}",
                    event.device,
                    event.control,
                    event.value,
                    if event.repeat { " (repeat)" } else { "" }
                ),
                Err(RecvError::Lagged(skipped)) => warn!("Control monitor skipped {} events", skipped),
                Err(RecvError::Closed) => break,
            }
        }
    });

    info!("padnav running, press Ctrl-C to exit");
    tokio::signal::ctrl_c().await?;

    info!("Shutting down");
    if let Err(e) = engine.shutdown().await {
        error!("Engine did not shut down cleanly: {}", e);
    }
    monitor.abort();
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
    let level = std::env::var("RUST_LOG")
        .ok()
        .and_then(|value| value.parse::<Level>().ok())
        .unwrap_or(Level::INFO);

    FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .pretty()
        .init();
}
