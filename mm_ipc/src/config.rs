use std::path::Path;
use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;
use serde::Serialize;

use crate::DEFAULT_RECONNECT_DELAY_MS;
use crate::DEFAULT_SOCKET_PATH;
use crate::codec::DEFAULT_MAX_FRAME_LEN;

/// Which side of the transport a process runs. A process is exactly one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "lowercase")]
pub enum RoleConfig {
    Hub(HubConfig),
    Spoke(SpokeConfig),
}

impl RoleConfig {
    pub fn socket_path(&self) -> &Path {
        match self {
            RoleConfig::Hub(config) => &config.socket_path,
            RoleConfig::Spoke(config) => &config.socket_path,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HubConfig {
    /// Path the listening socket is bound to
    #[serde(default = "default_socket_path")]
    pub socket_path: PathBuf,

    /// Largest frame accepted from a spoke, in bytes
    #[serde(default = "default_max_frame_len")]
    pub max_frame_len: usize,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self { socket_path: default_socket_path(), max_frame_len: DEFAULT_MAX_FRAME_LEN }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpokeConfig {
    /// Path of the hub's socket
    #[serde(default = "default_socket_path")]
    pub socket_path: PathBuf,

    /// Markets this spoke collects, declared at handshake
    #[serde(default)]
    pub markets: Vec<String>,

    /// Indexes this spoke computes, declared at handshake
    #[serde(default)]
    pub indexes: Vec<String>,

    /// Fixed delay before a reconnection attempt in milliseconds
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,

    /// Largest frame accepted from the hub, in bytes
    #[serde(default = "default_max_frame_len")]
    pub max_frame_len: usize,
}

impl SpokeConfig {
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }
}

impl Default for SpokeConfig {
    fn default() -> Self {
        Self {
            socket_path: default_socket_path(),
            markets: Vec::new(),
            indexes: Vec::new(),
            reconnect_delay_ms: DEFAULT_RECONNECT_DELAY_MS,
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
        }
    }
}

fn default_socket_path() -> PathBuf {
    PathBuf::from(DEFAULT_SOCKET_PATH)
}

fn default_reconnect_delay_ms() -> u64 {
    DEFAULT_RECONNECT_DELAY_MS
}

fn default_max_frame_len() -> usize {
    DEFAULT_MAX_FRAME_LEN
}
