//! Process-wide configuration (external collaborator, spec §1).
//!
//! The core depends on this only for its own listen address, the
//! static peer address map, and tuning knobs; how the config file is
//! located or hot-reloaded is out of scope.

use std::collections::HashMap;
use std::net::Ipv4Addr;

use serde::Deserialize;

use crate::wire::primitive::{GLOBAL_MAX_SIZE, GLOBAL_MIN_SIZE};
use crate::wire::Address;

/// Default envoy listen port (spec §6).
pub const DEFAULT_ENVOY_PORT: u16 = 9922;
/// Default storage-server port (spec §6).
pub const DEFAULT_STORAGE_PORT: u16 = 9923;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Address this envoy listens on for both client and peer traffic.
    pub listen: SocketAddrConfig,
    /// Address of the backing storage server.
    pub storage: SocketAddrConfig,
    /// Static peer envoy address map, keyed by an operator-assigned
    /// peer name. Cluster membership discovery is a non-goal; peers
    /// are named here to make `LeaseRecord.address` routable.
    #[serde(default)]
    pub peers: HashMap<String, SocketAddrConfig>,
    /// Number of worker tasks the scheduler keeps warm.
    #[serde(default = "default_workers")]
    pub worker_pool_size: usize,
    /// Upper bound offered during version negotiation; clamped into
    /// `[GLOBAL_MIN_SIZE, GLOBAL_MAX_SIZE]` at load time.
    #[serde(default = "default_max_msize")]
    pub max_message_size: u32,
}

fn default_workers() -> usize {
    16
}

fn default_max_msize() -> u32 {
    GLOBAL_MAX_SIZE
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct SocketAddrConfig {
    pub ip: Ipv4Addr,
    pub port: u16,
}

impl From<SocketAddrConfig> for Address {
    fn from(s: SocketAddrConfig) -> Self {
        Address { ip: u32::from(s.ip), port: s.port }
    }
}

impl Config {
    pub fn from_toml_str(text: &str) -> Result<Self, toml::de::Error> {
        let mut cfg: Config = toml::from_str(text)?;
        cfg.max_message_size = cfg.max_message_size.clamp(GLOBAL_MIN_SIZE, GLOBAL_MAX_SIZE);
        Ok(cfg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_config() {
        let text = r#"
            [listen]
            ip = "0.0.0.0"
            port = 9922

            [storage]
            ip = "127.0.0.1"
            port = 9923

            [peers.e2]
            ip = "10.0.0.2"
            port = 9922
        "#;
        let cfg = Config::from_toml_str(text).expect("valid config");
        assert_eq!(cfg.listen.port, 9922);
        assert_eq!(cfg.worker_pool_size, 16);
        assert_eq!(cfg.peers.len(), 1);
    }

    #[test]
    fn clamps_oversized_message_size() {
        let text = r#"
            [listen]
            ip = "0.0.0.0"
            port = 9922
            [storage]
            ip = "127.0.0.1"
            port = 9923
            max_message_size = 4294967295
        "#;
        let cfg = Config::from_toml_str(text).expect("valid config");
        assert_eq!(cfg.max_message_size, GLOBAL_MAX_SIZE);
    }
}
