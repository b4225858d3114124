mod client;
mod config;
mod dns;
mod error;
mod identity;
mod model;
mod overlay;
mod reconciler;

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::sync::{watch, RwLock};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use config::AgentConfig;
use dns::RecordTable;
use overlay::{FileOverlayManager, OverlayManager};
use reconciler::Reconciler;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = AgentConfig::from_env()?;
    let node_id = identity::load_or_generate(&config.identity_path, config.node_name.as_deref())?;
    info!(%node_id, "mesh-agent starting");

    let overlay_config_path = std::env::var("MESH_OVERLAY_CONFIG_PATH")
        .map(std::path::PathBuf::from)
        .unwrap_or_else(|_| std::path::PathBuf::from(format!("/etc/wireguard/{}.conf", config.overlay_interface)));
    let overlay: Arc<dyn OverlayManager> = Arc::new(FileOverlayManager::new(
        config.overlay_interface.clone(),
        overlay_config_path,
        config.private_key_path.clone(),
    ));
    overlay.init().map_err(|e| anyhow::anyhow!("overlay init failed: {e}"))?;

    let dns_table = Arc::new(RwLock::new(RecordTable::default()));
    let dns_bind_addr: SocketAddr = std::env::var("MESH_DNS_BIND_ADDR")
        .unwrap_or_else(|_| "127.0.0.1:5353".to_string())
        .parse()?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    {
        let shutdown_tx = shutdown_tx.clone();
        ctrlc::set_handler(move || {
            let _ = shutdown_tx.send(true);
        })?;
    }

    let dns_table_for_server = dns_table.clone();
    let dns_shutdown_rx = shutdown_rx.clone();
    let dns_task = tokio::spawn(async move {
        if let Err(e) = dns::serve(dns_bind_addr, dns_table_for_server, dns_shutdown_rx).await {
            warn!(error = %e, "dns server exited with error");
        }
    });

    let reconciler = Arc::new(Reconciler::new(config.clone(), node_id, overlay, dns_table)?);

    // Immediate sync, then periodic sync on the ticker (spec.md §4.3
    // lifecycle: "Init overlay -> Start DNS -> immediate sync -> periodic
    // sync on ticker").
    reconciler.run_cycle().await;

    let mut ticker = tokio::time::interval(config.sync_interval);
    ticker.tick().await; // first tick fires immediately; already consumed above

    let mut shutdown_rx_loop = shutdown_rx.clone();
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                reconciler.run_cycle().await;
            }
            _ = shutdown_rx_loop.changed() => {
                if *shutdown_rx_loop.borrow() {
                    break;
                }
            }
        }
    }

    info!("mesh-agent shutting down");
    let _ = shutdown_tx.send(true);
    let _ = dns_task.await;

    Ok(())
}
