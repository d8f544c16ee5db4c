//! Visit counter server - Web Server Entry Point

use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;
use tally::{api::create_router, config::Config, logging, state::AppState, WiringStyle};

#[derive(Debug, Parser)]
#[clap(name = "tally-server", version, about = "Visit counter HTTP server")]
struct Args {
    /// Configuration file layered over the defaults and `tally.*`
    #[clap(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Listen port (overrides configuration)
    #[clap(long)]
    port: Option<u16>,

    /// Handler wiring: constructor, locator or manual
    #[clap(long, value_name = "STYLE")]
    wiring: Option<WiringStyle>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config =
        Config::load_from(args.config.as_deref()).context("Failed to load configuration")?;
    if let Some(port) = args.port {
        config.server.port = port;
    }
    if let Some(style) = args.wiring {
        config.wiring.style = style;
    }

    config
        .validate()
        .map_err(|e| anyhow::anyhow!("Invalid configuration: {e}"))?;

    let _logging_guard =
        logging::init_logging(&config.logging).context("Failed to initialize logging")?;

    let addr = config
        .socket_addr()
        .context("Failed to determine socket address")?;

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        wiring = %config.wiring.style,
        listen_addr = %addr,
        "Starting visit counter"
    );

    let state = AppState::new(config).context("Failed to initialize application state")?;
    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind TCP listener on {addr}"))?;

    tracing::info!("Listening on http://{}", addr);

    if let Err(e) = axum::serve(listener, app).await {
        tracing::error!(error = %e, "Server terminated unexpectedly");
        return Err(e.into());
    }

    Ok(())
}
