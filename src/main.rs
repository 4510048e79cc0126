//! # relay
//!
//! Relay binary: parses the command line, installs logging and metrics, and
//! runs the hub until Ctrl-C.

#![deny(unsafe_code)]

use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use relay_server::{RelayServer, ServerConfig};
use relay_telemetry::TelemetryConfig;
use tracing::Level;

/// Real-time relay between devices and UI observers.
#[derive(Parser, Debug)]
#[command(name = "relay", version, about)]
struct Cli {
    /// Host to bind.
    #[arg(long, env = "RELAY_HOST", default_value = "0.0.0.0")]
    host: String,

    /// Port to bind (0 for auto-assign).
    #[arg(long, env = "RELAY_PORT", default_value_t = 8080)]
    port: u16,

    /// Default log level. `RUST_LOG` takes precedence.
    #[arg(long, default_value_t = Level::INFO)]
    log_level: Level,

    /// Emit logs as JSON lines.
    #[arg(long, env = "RELAY_LOG_JSON")]
    json_logs: bool,

    /// Outbound queue depth per connection.
    #[arg(long, default_value_t = 256)]
    send_queue: usize,

    /// Bound on a single socket write, in milliseconds.
    #[arg(long, default_value_t = 5_000)]
    write_timeout_ms: u64,

    /// Do not install the Prometheus recorder or serve `/metrics`.
    #[arg(long)]
    no_metrics: bool,
}

impl Cli {
    fn server_config(&self) -> ServerConfig {
        ServerConfig {
            host: self.host.clone(),
            port: self.port,
            send_queue_capacity: self.send_queue,
            write_timeout_ms: self.write_timeout_ms,
            ..ServerConfig::default()
        }
    }

    fn telemetry_config(&self) -> TelemetryConfig {
        TelemetryConfig {
            log_level: self.log_level,
            json: self.json_logs,
            ..TelemetryConfig::default()
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();

    relay_telemetry::init_telemetry(&args.telemetry_config())
        .context("Failed to initialize logging")?;

    let mut server = RelayServer::new(args.server_config());
    if !args.no_metrics {
        let handle = relay_server::metrics::install_recorder()
            .context("Failed to install metrics recorder")?;
        server = server.with_metrics(handle);
    }

    let (addr, handle) = server.listen().await.context("Failed to bind server")?;
    tracing::info!("relay listening on http://{addr} (devices: /ws/devices, ui: /ws/ui)");

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;

    tracing::info!("Shutting down...");
    let drained = server
        .shutdown()
        .graceful_shutdown(handle, Duration::from_secs(10))
        .await;
    if !drained {
        tracing::warn!("listener did not stop in time");
    }

    tracing::info!("Shutdown complete");
    Ok(())
}
