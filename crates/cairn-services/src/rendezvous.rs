//! Rendezvous server — the registry's accept loop and per-peer handlers.
//!
//! Each bootstrap connection gets its own handler task: read the
//! registration, broker one target, then sit on the stream until `quit`,
//! EOF, or error. The peer is removed on every exit path.

use std::net::SocketAddr;

use anyhow::Result;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;

use cairn_core::wire::{is_quit, parse_listener_port, JoinReply, SHUTDOWN_NOTICE_LINE};

use crate::connection::write_line;
use crate::registry::SharedPeerTable;

pub struct RendezvousServer {
    listener: TcpListener,
    peers: SharedPeerTable,
    shutdown: broadcast::Receiver<()>,
}

impl RendezvousServer {
    pub fn new(
        listener: TcpListener,
        peers: SharedPeerTable,
        shutdown: broadcast::Receiver<()>,
    ) -> Self {
        Self {
            listener,
            peers,
            shutdown,
        }
    }

    pub async fn run(mut self) -> Result<()> {
        loop {
            tokio::select! {
                _ = self.shutdown.recv() => {
                    tracing::info!("rendezvous server shutting down");
                    return Ok(());
                }

                result = self.listener.accept() => {
                    let (stream, origin) = match result {
                        Ok(r) => r,
                        Err(e) => {
                            tracing::warn!(error = %e, "accept failed");
                            continue;
                        }
                    };
                    tracing::debug!(peer = %origin, "bootstrap connection");
                    let peers = self.peers.clone();
                    tokio::spawn(handle_peer(stream, origin, peers));
                }
            }
        }
    }
}

async fn handle_peer(stream: TcpStream, origin: SocketAddr, peers: SharedPeerTable) {
    let (read_half, write_half) = stream.into_split();
    let mut writer = write_half;
    let mut lines = BufReader::new(read_half).lines();

    // Registration: a single line carrying the peer's listener port.
    let registration = match lines.next_line().await {
        Ok(Some(line)) => line,
        Ok(None) | Err(_) => {
            tracing::debug!(peer = %origin, "closed before registering");
            return;
        }
    };
    let port = match parse_listener_port(&registration) {
        Ok(p) => p,
        Err(e) => {
            tracing::warn!(peer = %origin, error = %e, "malformed registration, dropping");
            return;
        }
    };

    let advertised = SocketAddr::new(origin.ip(), port);
    match peers.add(origin, advertised) {
        Some(old) => tracing::info!(
            peer = %origin,
            old = %old.listener,
            new = %advertised,
            "peer replaced"
        ),
        None => tracing::info!(peer = %origin, listener = %advertised, "peer added"),
    }

    // Broker one target: a uniform pick over everyone but the newcomer.
    let reply = match peers.pick_random_excluding(origin) {
        Some(target) => JoinReply::Target(target),
        None => JoinReply::First,
    };
    if let Err(e) = write_line(&mut writer, &reply.to_string()).await {
        tracing::warn!(peer = %origin, error = %e, "failed to send bootstrap reply");
        peers.remove(&origin);
        return;
    }
    tracing::info!(peer = %origin, reply = %reply, "bootstrap reply sent");

    // Command loop: only `quit` is meaningful; the stream otherwise idles
    // until the peer goes away.
    loop {
        match lines.next_line().await {
            Ok(Some(command)) => {
                if is_quit(&command) {
                    tracing::info!(peer = %origin, "peer deregistering");
                    break;
                }
                tracing::warn!(peer = %origin, command = %command.trim(), "unknown command");
            }
            Ok(None) => {
                tracing::info!(peer = %origin, "bootstrap stream closed");
                break;
            }
            Err(e) => {
                tracing::warn!(peer = %origin, error = %e, "bootstrap stream error");
                break;
            }
        }
    }

    if peers.remove(&origin) {
        tracing::info!(peer = %origin, remaining = peers.len(), "peer removed");
    }
}

/// Shutdown fan-out: dial every registered listener and leave a notice.
/// Best-effort; failures are logged per peer and never propagate.
pub async fn notify_shutdown(peers: &SharedPeerTable) {
    for entry in peers.entries() {
        match TcpStream::connect(entry.listener).await {
            Ok(mut stream) => {
                if let Err(e) = write_line(&mut stream, SHUTDOWN_NOTICE_LINE).await {
                    tracing::warn!(peer = %entry.listener, error = %e, "failed to notify peer");
                } else {
                    tracing::info!(peer = %entry.listener, "shutdown notice sent");
                }
            }
            Err(e) => {
                tracing::warn!(peer = %entry.listener, error = %e, "failed to reach peer");
            }
        }
    }
}
