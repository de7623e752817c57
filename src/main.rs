//! Vision gateway - operator console bridge to the line PLC

use clap::Parser;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use vision_gateway::{
    config::Args,
    plc::{CommandGate, S7Link, SimulatedLink, StopControl},
    server::{self, AppState},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file if present
    let _ = dotenvy::dotenv();

    let args = Args::parse();

    let log_level = args.log_level.clone();
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("vision_gateway={},info", log_level).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    if let Err(e) = args.validate() {
        error!("Configuration error: {}", e);
        std::process::exit(1);
    }

    let endpoint = args.endpoint();
    info!("======================================");
    info!("  Vision Gateway");
    info!("======================================");
    info!("Listen: {}", args.listen);
    info!("Mode: {}", if args.dev_mode { "DEVELOPMENT" } else { "PRODUCTION" });
    info!("PLC: {}", endpoint);
    info!(
        "Reconnect every {}s, I/O timeout {}ms",
        args.reconnect_delay_secs, args.plc_timeout_ms
    );
    info!("Audit logs: {}", args.log_dir.display());
    info!("Frontend: {}", args.frontend_dir.display());
    info!(
        "Camera: {}",
        args.camera_command.as_deref().unwrap_or("disabled")
    );
    info!("======================================");

    let gate: Arc<dyn StopControl> = if args.dev_mode {
        let (gate, _supervisor) = CommandGate::start(
            SimulatedLink::new(),
            endpoint,
            args.retry_policy(),
            args.plc_timeout(),
        );
        gate
    } else {
        let (gate, _supervisor) = CommandGate::start(
            S7Link::new(),
            endpoint,
            args.retry_policy(),
            args.plc_timeout(),
        );
        gate
    };

    let state = Arc::new(AppState::new(args, gate)?);

    if let Err(e) = server::run(state).await {
        error!("Server error: {:?}", e);
        std::process::exit(1);
    }

    Ok(())
}
