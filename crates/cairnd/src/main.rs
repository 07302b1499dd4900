//! cairnd — Cairn peer node daemon.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use anyhow::Result;

use cairn_core::config::CairnConfig;
use cairn_services::PeerNode;

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

    // Listener port: first argument overrides config; 0 = OS-assigned.
    let listen_port = std::env::args()
        .nth(1)
        .and_then(|arg| arg.parse().ok())
        .unwrap_or(config.network.listen_port);
    let listen = SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), listen_port);

    tracing::info!(registry = %config.registry_endpoint(), "cairnd starting");

    let node = PeerNode::start(
        config.registry_endpoint(),
        listen,
        config.network.redirect_hop_limit,
    )
    .await?;
    tracing::info!(
        listener = %node.local_endpoint(),
        "listening for peer connections"
    );

    // Periodic neighbor snapshot
    let neighbor_printer = {
        let neighbors = node.neighbors();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(5));
            loop {
                interval.tick().await;
                tracing::info!(count = neighbors.len(), "neighbor snapshot");
                for (endpoint, direction, age) in neighbors.snapshot() {
                    tracing::info!(
                        peer = %endpoint,
                        ?direction,
                        age_secs = age.as_secs(),
                        "  neighbor"
                    );
                }
            }
        })
    };

    // ── Wait for exit ────────────────────────────────────────────────────────

    tokio::select! {
        _ = tokio::signal::ctrl_c() => tracing::info!("shutdown signal received"),
        r = neighbor_printer        => tracing::error!("neighbor printer exited: {:?}", r),
    }

    node.quit().await;
    Ok(())
}
