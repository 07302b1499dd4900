//! Configuration system for Cairn.
//!
//! Resolution order: environment variables → config file → defaults.
//!
//! Config file location:
//!   1. $CAIRN_CONFIG (explicit override)
//!   2. $XDG_CONFIG_HOME/cairn/config.toml
//!   3. ~/.config/cairn/config.toml

use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;

/// Top-level configuration, shared by both daemons.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CairnConfig {
    pub registry: RegistryConfig,
    pub network: NetworkConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Address the rendezvous registry listens on / is dialed at.
    pub host: IpAddr,
    /// Registry TCP port.
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// TCP port for this node's peer listener. 0 = OS-assigned.
    pub listen_port: u16,
    /// How many redirect hops a join attempt follows before giving up.
    pub redirect_hop_limit: u32,
}

// ── Defaults ──────────────────────────────────────────────────────────────────

impl Default for CairnConfig {
    fn default() -> Self {
        Self {
            registry: RegistryConfig::default(),
            network: NetworkConfig::default(),
        }
    }
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            host: IpAddr::V4(Ipv4Addr::LOCALHOST),
            port: 9090,
        }
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            listen_port: 0,
            redirect_hop_limit: 8,
        }
    }
}

impl CairnConfig {
    /// The registry endpoint as a dialable socket address.
    pub fn registry_endpoint(&self) -> SocketAddr {
        SocketAddr::new(self.registry.host, self.registry.port)
    }
}

// ── Path helpers ──────────────────────────────────────────────────────────────

fn config_dir() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| dirs_or_home().join(".config"))
        .join("cairn")
}

fn dirs_or_home() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {0}: {1}")]
    ReadFailed(PathBuf, std::io::Error),
    #[error("failed to parse {0}: {1}")]
    ParseFailed(PathBuf, toml::de::Error),
    #[error("failed to write {0}: {1}")]
    WriteFailed(PathBuf, std::io::Error),
    #[error("failed to serialize: {0}")]
    SerializeFailed(toml::ser::Error),
}

// ── Loading ───────────────────────────────────────────────────────────────────

impl CairnConfig {
    /// Load config: env vars → file → defaults.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::file_path();
        let mut config = if path.exists() {
            let text = std::fs::read_to_string(&path)
                .map_err(|e| ConfigError::ReadFailed(path.clone(), e))?;
            toml::from_str(&text).map_err(|e| ConfigError::ParseFailed(path.clone(), e))?
        } else {
            CairnConfig::default()
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// Config file path.
    pub fn file_path() -> PathBuf {
        std::env::var("CAIRN_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| config_dir().join("config.toml"))
    }

    /// Write default config if none exists. Returns the path.
    pub fn write_default_if_missing() -> Result<PathBuf, ConfigError> {
        let path = Self::file_path();
        if !path.exists() {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
            }
            let text = toml::to_string_pretty(&CairnConfig::default())
                .map_err(ConfigError::SerializeFailed)?;
            std::fs::write(&path, text)
                .map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
        }
        Ok(path)
    }

    /// Apply CAIRN_* env var overrides.
    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("CAIRN_REGISTRY__HOST") {
            if let Ok(host) = v.parse() {
                self.registry.host = host;
            }
        }
        if let Ok(v) = std::env::var("CAIRN_REGISTRY__PORT") {
            if let Ok(p) = v.parse() {
                self.registry.port = p;
            }
        }
        if let Ok(v) = std::env::var("CAIRN_NETWORK__LISTEN_PORT") {
            if let Ok(p) = v.parse() {
                self.network.listen_port = p;
            }
        }
        if let Ok(v) = std::env::var("CAIRN_NETWORK__REDIRECT_HOP_LIMIT") {
            if let Ok(n) = v.parse() {
                self.network.redirect_hop_limit = n;
            }
        }
    }
}
