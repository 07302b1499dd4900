//! cairn-core — wire protocol and configuration.
//! All other Cairn crates depend on this one.

pub mod config;
pub mod wire;

pub use wire::{JoinReply, PeerControl, WireError};
