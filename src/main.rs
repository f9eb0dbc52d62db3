//! Rewriting reverse proxy.
//!
//! # Architecture Overview
//!
//! ```text
//!     Client ──▶ net (listener, TLS) ──▶ http::server (accept loop, sessions)
//!                                              │
//!                                              ▼
//!                                     http::dispatch (one task per exchange)
//!                                              │
//!                                              ▼
//!                 routing (subdomain / path rules) ──▶ proxy (forward, tee, filter)
//!                                                           │
//!     Client ◀── streamed or rewritten body ◀───────────────┴──── Upstream
//! ```

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::Parser;

use rewrite_proxy::config::validation::validate_config;
use rewrite_proxy::config::{load_config, ConfigWatcher, ProxyConfig};
use rewrite_proxy::http::{Server, ServerOptions};
use rewrite_proxy::lifecycle::{shutdown_signal, Shutdown};
use rewrite_proxy::observability::{logging, metrics};
use rewrite_proxy::proxy::{self, ReverseProxy};

#[derive(Parser, Debug)]
#[command(name = "rewrite-proxy", version, about = "Reverse proxy with response body rewriting")]
struct Cli {
    /// Configuration file (TOML, or JSON by extension). Defaults apply if omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the listener port.
    #[arg(short, long)]
    port: Option<u16>,

    /// Validate the configuration and exit.
    #[arg(long)]
    check: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let file_config = match &cli.config {
        Some(path) => match load_config(path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("{}: {e}", path.display());
                return ExitCode::FAILURE;
            }
        },
        None => ProxyConfig::default(),
    };
    let mut config = file_config.clone();
    if let Some(port) = cli.port {
        config.listener.port = port;
    }

    if cli.check {
        return match validate_config(&config) {
            Ok(()) => {
                println!("Configuration OK");
                ExitCode::SUCCESS
            }
            Err(errors) => {
                for e in errors {
                    eprintln!("{e}");
                }
                ExitCode::FAILURE
            }
        };
    }

    if let Err(e) = logging::init(&config.observability) {
        eprintln!("Failed to initialize logging: {e}");
        return ExitCode::FAILURE;
    }

    match run(cli, file_config, config).await {
        Ok(()) => {
            tracing::info!("Shutdown complete");
            ExitCode::SUCCESS
        }
        Err(e) => {
            tracing::error!(error = %e, "Proxy exited with error");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli, file_config: ProxyConfig, config: ProxyConfig) -> Result<(), Box<dyn std::error::Error>> {
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        upstream = %config.upstream.default_url,
        subdomain_rules = config.subdomains.len(),
        path_rules = config.paths.len(),
        rewrite_rules = config.rewrite.len(),
        "rewrite-proxy starting"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let proxy = ReverseProxy::new(config.clone())?;

    // Held for the lifetime of the server; dropping it stops the watch.
    let _watcher = match &cli.config {
        Some(path) => {
            let reload_target = proxy.clone();
            // Compared against the file itself so CLI overrides are not reported as changes.
            let watcher = ConfigWatcher::new(path, file_config, move |new_config| {
                reload_target.reload(new_config);
            });
            match watcher.run() {
                Ok(watcher) => Some(watcher),
                Err(e) => {
                    tracing::warn!(error = %e, "Config watcher unavailable, hot reload disabled");
                    None
                }
            }
        }
        None => None,
    };

    let options = ServerOptions::from_config(&config.listener, proxy).on_error(proxy::error_handler());
    let server = Server::new(options);

    let shutdown = Shutdown::new();
    let mut on_shutdown = shutdown.subscribe();
    server.close_on(async move {
        let _ = on_shutdown.recv().await;
    });
    tokio::spawn(async move {
        shutdown_signal().await;
        shutdown.trigger();
    });

    let result = match &config.listener.tls {
        Some(tls) => server.listen_and_serve_tls(Path::new(&tls.cert_path), Path::new(&tls.key_path)).await,
        None => server.listen_and_serve().await,
    };

    match result {
        Ok(()) => Ok(()),
        // Closed by the shutdown signal before or while serving.
        Err(rewrite_proxy::ServeError::Closed) if server.is_closed() => Ok(()),
        Err(e) => Err(e.into()),
    }
}
