//! routekit server binary.
//!
//! ```text
//!   routekit.toml ──▶ config ──▶ Router (static files + proxies)
//!                                   │
//!   [[listeners]] ──▶ Listener ─┐   ▼
//!   [[listeners]] ──▶ Listener ─┼─▶ HttpServer ──▶ Worker per connection
//!                               │   (accept loop, interrupts, auto-restart)
//! ```

use std::collections::BTreeMap;
use std::path::PathBuf;

use clap::Parser;

use routekit::config::{load_config, ServeConfig};
use routekit::http::{Headers, HttpServer};
use routekit::lifecycle::Shutdown;
use routekit::net::Listener;
use routekit::observability::init_logging;
use routekit::routing::{HeaderOverrides, ProxyError, ProxyRouter, Router};

#[derive(Parser)]
#[command(name = "routekit")]
#[command(about = "Serve static files and reverse proxies from a routekit config", long_about = None)]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Include error details in 500 responses
    #[arg(long)]
    debug: bool,

    /// Directory served under the static prefix
    #[arg(long)]
    static_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => load_config(path)?,
        None => ServeConfig::default(),
    };
    if cli.debug {
        config.server.debug = true;
    }
    if let Some(dir) = cli.static_dir {
        config.static_files.dir = dir;
    }

    init_logging(&config.logging)?;
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "routekit starting");
    tracing::info!(
        config = ?cli.config,
        max_connections = config.server.max_connections,
        debug = config.server.debug,
        auto_reload = config.server.auto_reload.enabled,
        "Configuration loaded"
    );

    let router = build_router(&config)?;
    let listeners = config
        .effective_listeners()
        .into_iter()
        .map(Listener::new)
        .collect();

    let shutdown = Shutdown::new();
    let server = HttpServer::new(router, config.server.clone());
    server.run(listeners, shutdown.subscribe()).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}

fn build_router(config: &ServeConfig) -> Result<Router, ProxyError> {
    let mut router = Router::new().with_static(&config.static_files.dir, &config.static_files.prefix);
    for proxy in &config.proxies {
        let mounted = ProxyRouter::new(&proxy.name, &proxy.mount, &proxy.upstream)?
            .with_request_headers(overrides(&proxy.request_headers))
            .with_response_headers(overrides(&proxy.response_headers));
        router.add_proxy(mounted);
    }
    Ok(router)
}

fn overrides(table: &BTreeMap<String, BTreeMap<String, String>>) -> HeaderOverrides {
    table
        .iter()
        .map(|(path, headers)| (path.clone(), headers.iter().collect::<Headers>()))
        .collect()
}
