//! HAProxy/Nomad bridge - keeps HAProxy routing reconciled with Nomad
//! service-lifecycle events.

use std::process::ExitCode;

use clap::Parser;
use tracing::{error, info};

use haproxy_nomad_bridge::{bridge::Bridge, cli::Cli, config::Config, setup_tracing};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = setup_tracing(&cli.log_level, cli.log_format.as_deref()) {
        eprintln!("Failed to setup tracing: {e}");
        return ExitCode::FAILURE;
    }

    let config = match Config::load(cli.config.as_deref()) {
        Ok(mut config) => {
            if let Some(port) = cli.admin_port {
                config.admin.port = port;
            }
            config
        }
        Err(e) => {
            error!("Failed to load configuration: {e}");
            return ExitCode::FAILURE;
        }
    };

    info!(
        version = env!("CARGO_PKG_VERSION"),
        nomad = %config.nomad.address,
        haproxy = %config.haproxy.address,
        frontend = %config.haproxy.frontend,
        "Starting haproxy-nomad-bridge"
    );

    // Fatal if the Data Plane API is unreachable
    let bridge = match Bridge::new(config).await {
        Ok(b) => b,
        Err(e) => {
            error!("Failed to start bridge: {e}");
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = bridge.run(!cli.no_initial_sync).await {
        error!("Bridge error: {e}");
        return ExitCode::FAILURE;
    }

    info!("Bridge shutdown complete");
    ExitCode::SUCCESS
}
