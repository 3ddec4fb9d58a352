use anyhow::Context;
use clap::Parser;
use relay_server::listener::DeviceListener;
use relay_server::{api, Hub, HubConfig};
use std::future::IntoFuture;
use std::path::PathBuf;
use tokio::net::TcpListener;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "relay-server", about = "Device relay hub with interactive USSD sessions")]
struct Cli {
    /// TOML configuration file
    #[arg(long, short)]
    config: Option<PathBuf>,

    /// Address devices connect to (overrides config)
    #[arg(long)]
    device_addr: Option<String>,

    /// Address for the operator HTTP/WebSocket API (overrides config)
    #[arg(long)]
    http_addr: Option<String>,

    /// Default log filter when RUST_LOG is unset
    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = HubConfig::load(cli.config.as_deref()).context("loading configuration")?;
    if let Some(addr) = cli.device_addr {
        config.device_addr = addr;
    }
    if let Some(addr) = cli.http_addr {
        config.http_addr = addr;
    }
    if let Some(level) = cli.log_level {
        config.log_level = level;
    }

    // Initialize tracing
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();

    info!("Relay hub starting");
    info!("  devices:   {}", config.device_addr);
    info!("  operators: {}", config.http_addr);

    let hub = Hub::new(&config);

    let sweeper = hub.sweeper(&config).spawn();

    let devices = DeviceListener::bind(&config.device_addr, hub.clone(), config.write_timeout())
        .await
        .with_context(|| format!("binding device listener on {}", config.device_addr))?
        .spawn();

    let http = TcpListener::bind(&config.http_addr)
        .await
        .with_context(|| format!("binding operator API on {}", config.http_addr))?;
    let app = api::router(hub.clone());

    tokio::select! {
        result = axum::serve(http, app).into_future() => {
            if let Err(e) = result {
                error!(error = %e, "operator API stopped");
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Shutting down");
        }
    }

    sweeper.abort();
    devices.abort();
    Ok(())
}
