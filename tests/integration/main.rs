//! Cairn integration test harness.
//!
//! Everything runs in-process over loopback TCP: a real rendezvous server,
//! real peer nodes, and raw scripted clients where a test needs to speak
//! the wire protocol directly. Listeners bind port 0, so tests do not
//! interfere with each other.

mod redirect;

use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, BufReader, Lines};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;

use cairn_services::{new_peer_table, RendezvousServer, SharedPeerTable};

/// How long polling assertions wait before giving up.
pub const DEADLINE: Duration = Duration::from_secs(5);

/// Start a rendezvous server on an ephemeral loopback port.
/// Returns its address, the live peer table, and the shutdown sender.
pub async fn spawn_registry() -> Result<(SocketAddr, SharedPeerTable, broadcast::Sender<()>)> {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .context("failed to bind registry listener")?;
    let addr = listener.local_addr()?;
    let peers = new_peer_table();
    let (shutdown_tx, _) = broadcast::channel(1);
    let server = RendezvousServer::new(listener, peers.clone(), shutdown_tx.subscribe());
    tokio::spawn(server.run());
    Ok((addr, peers, shutdown_tx))
}

/// A loopback address nothing is listening on (bind, read the port, drop).
pub async fn dead_endpoint() -> Result<SocketAddr> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    drop(listener);
    Ok(addr)
}

/// Poll `cond` until it holds or the deadline passes. Returns the final
/// evaluation so callers can `assert!` on it.
pub async fn wait_until<F: Fn() -> bool>(cond: F) -> bool {
    let start = tokio::time::Instant::now();
    while start.elapsed() < DEADLINE {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    cond()
}

/// A raw scripted peer: speaks protocol lines without any node logic.
pub struct TestClient {
    lines: Lines<BufReader<OwnedReadHalf>>,
    writer: OwnedWriteHalf,
    pub local: SocketAddr,
}

impl TestClient {
    pub async fn connect(addr: SocketAddr) -> Result<Self> {
        let stream = TcpStream::connect(addr)
            .await
            .with_context(|| format!("failed to connect to {addr}"))?;
        let local = stream.local_addr()?;
        let (read_half, write_half) = stream.into_split();
        Ok(Self {
            lines: BufReader::new(read_half).lines(),
            writer: write_half,
            local,
        })
    }

    pub async fn send(&mut self, line: &str) -> Result<()> {
        use tokio::io::AsyncWriteExt;
        self.writer.write_all(line.as_bytes()).await?;
        self.writer.write_all(b"\n").await?;
        self.writer.flush().await?;
        Ok(())
    }

    /// Next line, or `None` on EOF. Fails rather than hangs if nothing
    /// arrives within the deadline.
    pub async fn recv(&mut self) -> Result<Option<String>> {
        tokio::time::timeout(DEADLINE, self.lines.next_line())
            .await
            .context("timed out waiting for a line")?
            .context("read failed")
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

/// The harness itself: a registry comes up empty and reachable.
#[tokio::test]
async fn registry_starts_empty() -> Result<()> {
    let (addr, peers, _shutdown) = spawn_registry().await?;
    assert!(peers.is_empty());

    // reachable: a connection opens and can be dropped without registering
    let client = TestClient::connect(addr).await?;
    drop(client);
    assert!(wait_until(|| peers.is_empty()).await);
    Ok(())
}
