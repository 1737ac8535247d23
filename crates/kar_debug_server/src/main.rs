use std::sync::Arc;

use kar_debug_core::node_link::resynchronize;
use kar_debug_core::{
    server, DebugContext, DebuggerConfig, NodeLink, PendingRequestRegistry, StateStore,
};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = DebuggerConfig::from_env();
    let store = Arc::new(StateStore::new());
    let registry = Arc::new(PendingRequestRegistry::new());

    let (link, node) = NodeLink::connect(&config, store.clone(), registry.clone())
        .await
        .map_err(|e| {
            tracing::error!(addr = %config.node_addr, "Cannot attach to KAR node: {}", e);
            e
        })?;
    resynchronize(&node).await?;

    let listener = TcpListener::bind(&config.listen_addr).await?;
    tracing::info!(
        node = %config.node_addr,
        listen = %config.listen_addr,
        debugger_id = %config.debugger_id,
        "Starting KAR debug server..."
    );
    let ctx = DebugContext::new(store, registry, node, config);

    tokio::select! {
        err = link.run() => {
            tracing::error!("Lost the KAR node, shutting down");
            return Err(err.into());
        }
        served = server::serve(listener, ctx) => served?,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Interrupted, shutting down");
        }
    }

    Ok(())
}
