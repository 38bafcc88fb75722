//! HAProxy/Nomad bridge library
//!
//! Keeps HAProxy's dynamic routing configuration (backends, servers,
//! host-header frontend rules, health checks) reconciled with the service
//! instances Nomad advertises.
//!
//! # Architecture
//!
//! - **Event path**: Nomad event stream → bounded channel → single-threaded
//!   dispatcher → tag/check resolution → backend/server/frontend reconcilers.
//! - **Deregistration**: runtime drain → scheduled deletion after the drain
//!   timeout → frontend-rule cleanup once a backend is empty.
//! - **Startup**: Data Plane probe, full-service replay, stale-server sweep.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod admin;
pub mod bridge;
pub mod cli;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod haproxy;
pub mod metrics;
pub mod nomad;
pub mod reconcile;
pub mod sync;

pub use error::{Error, Result};

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Setup tracing/logging
pub fn setup_tracing(level: &str, format: Option<&str>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = tracing_subscriber::registry().with(filter);

    match format {
        Some("json") => {
            subscriber.with(fmt::layer().json()).init();
        }
        _ => {
            subscriber.with(fmt::layer()).init();
        }
    }

    Ok(())
}
