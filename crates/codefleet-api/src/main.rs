//! codefleet server

use clap::Parser;
use codefleet_api::bootstrap::Node;
use codefleet_api::distributed::{HttpLivenessProbe, LivenessToken, NodeRouter};
use codefleet_api::{AppState, routes};
use codefleet_config::{ServerOptions, load_server_options};
use std::future::IntoFuture;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "codefleet-server")]
#[command(about = "Keeps a fleet of git repositories cloned, updated and indexed")]
struct Cli {
    /// KDL configuration file
    #[arg(long, env = "CODEFLEET_CONFIG")]
    config: Option<PathBuf>,

    /// Address to listen on, overriding the configuration file
    #[arg(long, env = "CODEFLEET_LISTEN")]
    listen: Option<SocketAddr>,

    /// Emit logs as JSON
    #[arg(long, env = "CODEFLEET_LOG_JSON")]
    log_json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if cli.log_json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    let mut options = match &cli.config {
        Some(path) => load_server_options(path)?,
        None => ServerOptions::default(),
    };
    if let Some(listen) = cli.listen {
        options.listen = listen;
    }

    let secret = options.shared_secret.clone().unwrap_or_default();
    let token = LivenessToken::generate(&secret);
    let state = AppState::new(token.clone(), secret);

    let app = routes::router(state.clone())
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        );

    // Serve before probing: the code node answers its own liveness check.
    info!("Starting server on {}", options.listen);
    let listener = TcpListener::bind(options.listen).await?;
    let shutdown = CancellationToken::new();
    let server = tokio::spawn({
        let shutdown = shutdown.clone();
        axum::serve(listener, app)
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .into_future()
    });

    let probe = Arc::new(HttpLivenessProbe::new(options.probe.interval));
    let role = NodeRouter::new(&options, token.clone(), probe).resolve().await;
    let node = Node::start(&options, role, token).await?;
    state.install(node.registry().clone());

    tokio::signal::ctrl_c().await?;
    info!("Shutting down");
    node.shutdown().await;
    shutdown.cancel();
    server.await??;

    Ok(())
}
