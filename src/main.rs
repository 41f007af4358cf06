use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;

use tirev::http::enabled_stages;
use tirev::lifecycle::{wait_for_signal, Shutdown};
use tirev::net::bind;
use tirev::observability::{logging, metrics};
use tirev::{load_config, ProxyServer};

#[derive(Parser)]
#[command(name = "tirev")]
#[command(about = "Configuration-driven reverse proxy", long_about = None)]
#[command(version)]
struct Cli {
    /// TOML file with settings; environment variables take precedence
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Validate the configuration, print it with the enabled stages, and exit
    #[arg(long)]
    check: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    logging::init_tracing();

    let _ = rustls::crypto::ring::default_provider().install_default();

    let config = match load_config(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            tracing::error!(error = %e, "Invalid configuration");
            return ExitCode::FAILURE;
        }
    };

    if cli.check {
        match toml::to_string_pretty(&config) {
            Ok(rendered) => println!("{rendered}"),
            Err(e) => {
                tracing::error!(error = %e, "Failed to render configuration");
                return ExitCode::FAILURE;
            }
        }
        let stages: Vec<&str> = enabled_stages(&config).iter().map(|s| s.name()).collect();
        println!("# stages: {}", stages.join(" -> "));
        return ExitCode::SUCCESS;
    }

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        port = config.port,
        upstreams = config.upstream_addr.len(),
        proto = %config.upstream_proto,
        "tirev starting"
    );

    if !config.no_prom {
        let addr = SocketAddr::from(([0, 0, 0, 0], config.prom_port));
        if let Err(e) = metrics::init_metrics(addr) {
            tracing::error!(error = %e, "Failed to start metrics exporter");
        }
    }

    let port = config.port;
    let server = match ProxyServer::new(config) {
        Ok(server) => server,
        Err(e) => {
            tracing::error!(error = %e, "Failed to initialise proxy");
            return ExitCode::FAILURE;
        }
    };

    let listener = match bind(port) {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!(error = %e, "Failed to bind listener");
            return ExitCode::FAILURE;
        }
    };

    let shutdown = Shutdown::new();
    let receiver = shutdown.subscribe();
    tokio::spawn(async move {
        wait_for_signal().await;
        shutdown.trigger();
    });

    if let Err(e) = server.run(listener, receiver).await {
        tracing::error!(error = %e, "Proxy server failed");
        return ExitCode::FAILURE;
    }

    tracing::info!("Shutdown complete");
    ExitCode::SUCCESS
}
