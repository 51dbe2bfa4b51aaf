use serde::{Deserialize, Serialize};
use std::net::{Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::transport::{ChannelConfig, DEFAULT_EVENT_PORT, DEFAULT_MAX_FRAME_LEN, DEFAULT_RPC_PORT};

/// Connection settings shared by the host and engine sides, loaded from
/// `<config dir>/uwb-bridge/config.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IpcConfig {
    /// Rendezvous port of the event channel.
    pub event_port: u16,
    /// Port of the RPC channel (cookie service).
    pub rpc_port: u16,
    /// Bound for connect, each send and each receive.
    pub timeout_ms: u64,
    /// How long closing a channel keeps flushing before it hard-closes.
    pub linger_ms: u64,
    pub max_frame_len: usize,
    /// `tracing` filter used when `RUST_LOG` is not set.
    pub log_filter: String,
}

impl Default for IpcConfig {
    fn default() -> Self {
        Self {
            event_port: DEFAULT_EVENT_PORT,
            rpc_port: DEFAULT_RPC_PORT,
            timeout_ms: 5_000,
            linger_ms: 5_000,
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
            log_filter: "uwb_bridge=info".to_string(),
        }
    }
}

impl IpcConfig {
    /// Load config from the standard config path, falling back to defaults.
    pub fn load() -> Self {
        Self::load_from(&config_path())
    }

    /// Load config from `path`, falling back to defaults when the file is
    /// missing or unreadable.
    pub fn load_from(path: &Path) -> Self {
        if path.exists() {
            match std::fs::read_to_string(path) {
                Ok(content) => match serde_json::from_str(&content) {
                    Ok(config) => return config,
                    Err(e) => {
                        tracing::warn!("Failed to parse config {}: {}", path.display(), e);
                    }
                },
                Err(e) => {
                    tracing::warn!("Failed to read config {}: {}", path.display(), e);
                }
            }
        }
        Self::default()
    }

    /// Save config to the standard config path.
    pub fn save(&self) -> std::io::Result<()> {
        self.save_to(&config_path())
    }

    pub fn save_to(&self, path: &Path) -> std::io::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn linger(&self) -> Duration {
        Duration::from_millis(self.linger_ms)
    }

    pub fn channel_config(&self) -> ChannelConfig {
        ChannelConfig {
            timeout: self.timeout(),
            linger: self.linger(),
            max_frame_len: self.max_frame_len,
        }
    }

    pub fn event_addr(&self) -> SocketAddr {
        SocketAddr::from((Ipv4Addr::LOCALHOST, self.event_port))
    }

    pub fn rpc_addr(&self) -> SocketAddr {
        SocketAddr::from((Ipv4Addr::LOCALHOST, self.rpc_port))
    }
}

fn config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("~/.config"))
        .join("uwb-bridge")
        .join("config.json")
}
