//! cairn-registryd — Cairn rendezvous registry daemon.

use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tokio::sync::broadcast;

use cairn_core::config::CairnConfig;
use cairn_services::{new_peer_table, rendezvous, RendezvousServer};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    // Load config
    if let Err(e) = CairnConfig::write_default_if_missing() {
        tracing::warn!(error = %e, "failed to write default config");
    }
    let config = CairnConfig::load().unwrap_or_else(|e| {
        tracing::warn!(error = %e, "failed to load config, using defaults");
        CairnConfig::default()
    });

    // Registry port: first argument overrides config.
    let port = std::env::args()
        .nth(1)
        .and_then(|arg| arg.parse().ok())
        .unwrap_or(config.registry.port);
    let bind = SocketAddr::new(config.registry.host, port);

    let listener = TcpListener::bind(bind)
        .await
        .with_context(|| format!("failed to bind registry listener on {bind}"))?;
    tracing::info!(addr = %listener.local_addr()?, "registry listening");

    let peers = new_peer_table();
    let (shutdown_tx, _) = broadcast::channel::<()>(1);

    let server_task = tokio::spawn(
        RendezvousServer::new(listener, peers.clone(), shutdown_tx.subscribe()).run(),
    );

    // Periodic member snapshot
    let member_printer = {
        let peers = peers.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(5));
            loop {
                interval.tick().await;
                tracing::info!(count = peers.len(), "peer table snapshot");
                for entry in peers.entries() {
                    tracing::info!(
                        peer = %entry.origin,
                        listener = %entry.listener,
                        age_secs = entry.registered_at.elapsed().as_secs(),
                        "  member"
                    );
                }
            }
        })
    };

    // ── Wait for exit ────────────────────────────────────────────────────────

    tokio::select! {
        _ = tokio::signal::ctrl_c() => tracing::info!("shutdown signal received"),
        r = server_task             => tracing::error!("rendezvous server exited: {:?}", r),
        r = member_printer          => tracing::error!("member printer exited: {:?}", r),
    }

    rendezvous::notify_shutdown(&peers).await;
    let _ = shutdown_tx.send(());
    Ok(())
}
