//! Cairn wire format — the line protocol spoken between peers and the
//! rendezvous registry.
//!
//! These messages ARE the protocol. Every line is UTF-8, `\n`-terminated,
//! and carries exactly one message. Changing any literal here is a breaking
//! change: old and new nodes meet on the same wire.
//!
//! Lines are parsed once, at the transport boundary, into the tagged types
//! below. Nothing downstream ever splits a string.

use std::fmt;
use std::net::{IpAddr, SocketAddr};

/// Acknowledgment sent to a joiner admitted into the neighbor set.
pub const ACCEPTED_LINE: &str = "Accepted connection";

/// Graceful teardown notice. Matched case-insensitively on receive.
pub const DISCONNECT_LINE: &str = "disconnected!";

/// Registry reply when no other peer is registered.
pub const FIRST_PEER_LINE: &str = "You are the first peer in the network.";

/// Deregistration command on the bootstrap stream. Matched case-insensitively.
pub const QUIT_LINE: &str = "quit";

/// Fan-out notice the registry sends to every listener on shutdown.
pub const SHUTDOWN_NOTICE_LINE: &str = "Server Shutdown";

/// Errors from parsing a protocol line.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum WireError {
    #[error("wrong token count in {0:?}")]
    TokenCount(String),
    #[error("unparseable host in {0:?}")]
    BadHost(String),
    #[error("unparseable or zero port in {0:?}")]
    BadPort(String),
    #[error("unrecognized message {0:?}")]
    Unrecognized(String),
}

/// Registry → joiner bootstrap reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinReply {
    /// Dial this endpoint to join the mesh.
    Target(SocketAddr),
    /// No other peer is registered; operate listener-only until joined.
    First,
}

impl JoinReply {
    /// Parse a trimmed registry reply line.
    pub fn parse(line: &str) -> Result<Self, WireError> {
        let line = line.trim();
        if line == FIRST_PEER_LINE {
            return Ok(JoinReply::First);
        }
        if let Some(rest) = line.strip_prefix("Connect to: ") {
            return parse_host_port(rest, line).map(JoinReply::Target);
        }
        Err(WireError::Unrecognized(line.to_string()))
    }
}

impl fmt::Display for JoinReply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JoinReply::Target(ep) => write!(f, "Connect to: {} {}", ep.ip(), ep.port()),
            JoinReply::First => f.write_str(FIRST_PEER_LINE),
        }
    }
}

/// Peer → peer control message on an open stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerControl {
    /// Join acknowledged; the connection is established.
    Accepted,
    /// The target is at capacity; retry against this endpoint.
    Redirect(SocketAddr),
    /// Graceful teardown notice. No response is expected.
    Disconnect,
}

impl PeerControl {
    /// Parse a trimmed peer control line.
    pub fn parse(line: &str) -> Result<Self, WireError> {
        let line = line.trim();
        if line == ACCEPTED_LINE {
            return Ok(PeerControl::Accepted);
        }
        if line.eq_ignore_ascii_case(DISCONNECT_LINE) {
            return Ok(PeerControl::Disconnect);
        }
        if let Some(rest) = line.strip_prefix("REDIRECT ") {
            return parse_host_port(rest, line).map(PeerControl::Redirect);
        }
        Err(WireError::Unrecognized(line.to_string()))
    }
}

impl fmt::Display for PeerControl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PeerControl::Accepted => f.write_str(ACCEPTED_LINE),
            PeerControl::Redirect(ep) => write!(f, "REDIRECT {} {}", ep.ip(), ep.port()),
            PeerControl::Disconnect => f.write_str(DISCONNECT_LINE),
        }
    }
}

/// Parse the `<port>` registration line a peer sends the registry.
/// Port 0 is rejected: an OS-assigned listener advertises its resolved port.
pub fn parse_listener_port(line: &str) -> Result<u16, WireError> {
    let line = line.trim();
    match line.parse::<u16>() {
        Ok(0) | Err(_) => Err(WireError::BadPort(line.to_string())),
        Ok(port) => Ok(port),
    }
}

/// Is this line the `quit` deregistration command?
pub fn is_quit(line: &str) -> bool {
    line.trim().eq_ignore_ascii_case(QUIT_LINE)
}

fn parse_host_port(rest: &str, full: &str) -> Result<SocketAddr, WireError> {
    let mut tokens = rest.split_whitespace();
    let (host, port) = match (tokens.next(), tokens.next(), tokens.next()) {
        (Some(h), Some(p), None) => (h, p),
        _ => return Err(WireError::TokenCount(full.to_string())),
    };
    let host: IpAddr = host
        .parse()
        .map_err(|_| WireError::BadHost(full.to_string()))?;
    let port = match port.parse::<u16>() {
        Ok(0) | Err(_) => return Err(WireError::BadPort(full.to_string())),
        Ok(p) => p,
    };
    Ok(SocketAddr::new(host, port))
}
