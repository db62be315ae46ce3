mod config;
mod detect;
mod network;

use config::ProxyConfig;
use crossgrade_pipeline::ProtocolRegistry;
use network::ProxyContext;
use std::path::Path;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    info!("Starting Crossgrade proxy...");

    let config = ProxyConfig::load(Path::new("config/proxy.toml"))?;
    config.backend_version()?;
    info!(
        "Config loaded: bind={}:{}, backend={}, backend_version={}",
        config.bind,
        config.port,
        config.backend,
        config.backend_version.as_deref().unwrap_or("detect")
    );

    let mut builder = ProtocolRegistry::builder();
    builder.max_path_len(config.max_path_length);
    crossgrade_protocols::register_all(&mut builder, &config.protocol_options())?;
    let registry = builder.build()?;

    let ctx = Arc::new(ProxyContext::new(config, registry));
    match ctx.backend_version().await {
        Ok(server) => {
            let clients = ctx.registry.supported_clients(server);
            let names: Vec<&str> = clients.iter().map(|v| v.name()).collect();
            info!("Backend speaks {}; clients accepted: {}", server, names.join(", "));
        }
        // Detection is retried when the first player connects.
        Err(e) => error!("Could not determine backend version: {:#}", e),
    }

    let addr = format!("{}:{}", ctx.config.bind, ctx.config.port);
    let listener = TcpListener::bind(&addr).await?;
    info!("Listening on {}", addr);

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
        }
        _ = accept_loop(listener, ctx) => {
            error!("Accept loop exited unexpectedly");
        }
    }

    Ok(())
}

async fn accept_loop(listener: TcpListener, ctx: Arc<ProxyContext>) {
    loop {
        match listener.accept().await {
            Ok((socket, peer)) => {
                info!("New connection from {}", peer);
                if let Err(e) = socket.set_nodelay(true) {
                    error!("Failed to set TCP_NODELAY for {}: {}", peer, e);
                }
                let ctx = ctx.clone();
                tokio::spawn(async move {
                    network::handle_connection(socket, ctx).await;
                });
            }
            Err(e) => {
                error!("Failed to accept connection: {}", e);
            }
        }
    }
}
