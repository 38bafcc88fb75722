//! Command-line interface

use std::path::PathBuf;

use clap::Parser;

/// HAProxy/Nomad bridge - reconciles HAProxy routing with Nomad service events
#[derive(Parser, Debug)]
#[command(name = "haproxy-nomad-bridge")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file (YAML)
    #[arg(short, long, env = "HNB_CONFIG")]
    pub config: Option<PathBuf>,

    /// Port for the admin endpoints (/health, /metrics, /sync)
    #[arg(long, env = "HNB_ADMIN_PORT")]
    pub admin_port: Option<u16>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", env = "HNB_LOG_LEVEL")]
    pub log_level: String,

    /// Log format (text, json)
    #[arg(long, env = "HNB_LOG_FORMAT")]
    pub log_format: Option<String>,

    /// Skip the initial sync and sweep at startup
    #[arg(long)]
    pub no_initial_sync: bool,
}
