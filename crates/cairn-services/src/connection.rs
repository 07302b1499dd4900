//! Established-stream control loop, shared by inbound and outbound
//! connections, plus the line I/O helpers every module writes through.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::io::{AsyncWrite, AsyncWriteExt, BufReader, Lines};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::Mutex;

use cairn_core::wire::{PeerControl, SHUTDOWN_NOTICE_LINE};

use crate::neighbor::SharedNeighbors;

/// Write one `\n`-terminated protocol line.
pub(crate) async fn write_line<W>(writer: &mut W, line: &str) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(line.as_bytes()).await?;
    writer.write_all(b"\n").await?;
    writer.flush().await
}

/// Write one protocol line through a shared write half.
pub(crate) async fn send_line(
    writer: &Arc<Mutex<OwnedWriteHalf>>,
    line: &str,
) -> std::io::Result<()> {
    let mut writer = writer.lock().await;
    write_line(&mut *writer, line).await
}

/// Read control messages from an established neighbor stream until it ends.
///
/// Exits on a disconnect notice, EOF, or a read error — all three are the
/// same teardown: the neighbor entry is removed and the stream closes when
/// the halves drop. A redirect on an established stream is a protocol
/// violation and is ignored.
pub(crate) async fn control_loop(
    mut lines: Lines<BufReader<OwnedReadHalf>>,
    endpoint: SocketAddr,
    neighbors: SharedNeighbors,
) {
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => match PeerControl::parse(&line) {
                Ok(PeerControl::Disconnect) => {
                    tracing::info!(peer = %endpoint, "disconnect notice received");
                    break;
                }
                Ok(PeerControl::Redirect(target)) => {
                    tracing::warn!(
                        peer = %endpoint,
                        target = %target,
                        "redirect on established stream, ignoring"
                    );
                }
                Ok(PeerControl::Accepted) => {
                    tracing::debug!(peer = %endpoint, "stray acceptance, ignoring");
                }
                Err(_) if line.trim() == SHUTDOWN_NOTICE_LINE => {
                    tracing::info!(peer = %endpoint, "registry shutdown notice received");
                }
                Err(e) => {
                    tracing::warn!(peer = %endpoint, error = %e, "ignoring control line");
                }
            },
            Ok(None) => {
                tracing::info!(peer = %endpoint, "peer closed stream");
                break;
            }
            Err(e) => {
                tracing::warn!(peer = %endpoint, error = %e, "stream error, treating as disconnect");
                break;
            }
        }
    }

    if neighbors.remove(&endpoint).is_some() {
        tracing::info!(peer = %endpoint, remaining = neighbors.len(), "neighbor removed");
    }
}
