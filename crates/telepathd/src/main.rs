//! telepathd - serves one backend's resources to remote clients.
//!
//! Binds the handshake port and an RPC port, runs the event loop until Ctrl-C,
//! then closes every open session.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use telerun::config::DEFAULT_HANDSHAKE_PORT;
use telerun::config::DEFAULT_MAX_PENDING;
use telerun::config::ServerConfig;
use telerun::server::ProxyServer;
use telerun::sim;
use telerun::worker::DEFAULT_WORKERS;

#[derive(Parser, Debug)]
#[command(name = "telepathd")]
#[command(version = telerpc::VERSION)]
#[command(about = "Remote resource proxy server")]
struct Args {
    /// Well-known handshake port
    #[arg(short, long, default_value_t = DEFAULT_HANDSHAKE_PORT)]
    port: u16,

    /// Pin the RPC port instead of letting the OS choose
    #[arg(long)]
    rpc_port: Option<u16>,

    /// Interface to bind both channels to
    #[arg(long, default_value = "0.0.0.0")]
    host: String,

    /// Backend serving the resources
    #[arg(short, long, default_value = sim::SIM_BACKEND)]
    backend: String,

    /// Blocking target calls allowed at once
    #[arg(short, long, default_value_t = DEFAULT_WORKERS)]
    workers: usize,

    /// Requests one client may queue behind its running request
    #[arg(long, default_value_t = DEFAULT_MAX_PENDING)]
    max_pending: usize,

    /// Event loop poll interval in milliseconds
    #[arg(long, default_value_t = 100)]
    poll_ms: u64,

    /// Do not name the backend in handshake replies
    #[arg(long)]
    hide_backend: bool,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

impl Args {
    fn config(&self) -> ServerConfig {
        let config = ServerConfig::default()
            .host(self.host.as_str())
            .handshake_port(self.port)
            .poll_interval(Duration::from_millis(self.poll_ms))
            .workers(self.workers)
            .max_pending(self.max_pending)
            .advertise_backend(!self.hide_backend);
        match self.rpc_port {
            Some(port) => config.rpc_port(port),
            None => config,
        }
    }
}

fn init_logging(debug: bool) {
    let fallback = if debug { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(false).compact().init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.debug);

    let backend = sim::backend_by_name(&args.backend)
        .with_context(|| format!("unknown backend '{}'", args.backend))?;
    let server = Arc::new(ProxyServer::bind(args.config(), backend).await.context("failed to start server")?);

    tracing::info!(
        handshake = %server.handshake_addr(),
        rpc = %server.rpc_addr(),
        "telepathd {} ready",
        telerpc::VERSION
    );

    let runner = tokio::spawn({
        let server = server.clone();
        async move { server.run().await }
    });

    tokio::signal::ctrl_c().await.context("failed to listen for Ctrl-C")?;
    tracing::info!("shutdown signal received");
    server.stop();
    if let Err(e) = runner.await {
        tracing::error!(error = %e, "event loop ended abnormally");
    }
    server.close();
    Ok(())
}
