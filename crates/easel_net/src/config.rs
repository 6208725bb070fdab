//! Network configuration for an easel peer.

use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Configuration for the easel networking layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetConfig {
    /// Address to listen on for incoming WebSocket connections from viewers.
    /// Port 0 binds an ephemeral port; the advertised board ids use the
    /// actually bound port.
    #[serde(with = "socket_addr_serde")]
    pub listen_addr: SocketAddr,

    /// `host:port` of the directory server, or `None` to run standalone
    /// (boards can still be created and edited, just not advertised).
    pub directory_addr: Option<String>,

    /// Externally dialable `host:port` to advertise in board ids. Needed
    /// when listening on a wildcard address or behind NAT, where the bound
    /// address is not what other peers should dial. `None` advertises the
    /// bound address.
    #[serde(default)]
    pub advertised_addr: Option<String>,

    /// Timeout for establishing a new peer connection.
    #[serde(with = "duration_serde")]
    pub connect_timeout: Duration,

    /// Upper bound on the graceful shutdown sequence (listener
    /// notifications, directory retractions, connection close).
    #[serde(with = "duration_serde")]
    pub shutdown_timeout: Duration,
}

impl Default for NetConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:3171".parse().expect("valid default listen address"),
            directory_addr: None,
            advertised_addr: None,
            connect_timeout: Duration::from_secs(10),
            shutdown_timeout: Duration::from_secs(5),
        }
    }
}

impl NetConfig {
    /// Save the config to a JSON file.
    pub fn save_to_file(&self, path: &Path) -> Result<(), String> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| format!("Failed to create directory: {e}"))?;
        }
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| format!("Failed to serialize config: {e}"))?;
        std::fs::write(path, json).map_err(|e| format!("Failed to write config file: {e}"))
    }

    /// Load config from a JSON file, or return defaults if the file is missing.
    pub fn load_or_default(path: &Path) -> Self {
        if path.exists() {
            match std::fs::read_to_string(path) {
                Ok(data) => match serde_json::from_str::<NetConfig>(&data) {
                    Ok(config) => return config,
                    Err(e) => {
                        tracing::warn!("Corrupt config file, using defaults: {e}");
                    }
                },
                Err(e) => {
                    tracing::warn!("Cannot read config file, using defaults: {e}");
                }
            }
        }
        Self::default()
    }
}

// ---------------------------------------------------------------------------
// Serde helpers
// ---------------------------------------------------------------------------

mod socket_addr_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::net::SocketAddr;

    pub fn serialize<S: Serializer>(addr: &SocketAddr, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&addr.to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<SocketAddr, D::Error> {
        let s = String::deserialize(d)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(dur: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(dur.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let secs = u64::deserialize(d)?;
        Ok(Duration::from_secs(secs))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
