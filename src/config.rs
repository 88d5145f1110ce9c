// Node configuration: a flat JSON document loaded once at startup and
// resolved eagerly — every templated path is expanded here, so the
// rest of the crate only ever sees concrete paths, never `{base_path}`.
use std::path::{Path, PathBuf};

use crate::error::Error;

/// Standard protocol ports, kept as defaults a config file can override.
pub const P2P_PORT: u16 = 9000;
pub const RPC_PORT: u16 = 9001;
pub const MAX_PEERS: usize = 12;
pub const P2P_BIND_ADDRESS_DEFAULT: &str = "0.0.0.0";
pub const RPC_BIND_ADDRESS_DEFAULT: &str = "127.0.0.1";

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct DiscoveryService {
    pub host: String,
    pub port: u16,
    pub proto: String,
}

/// The JSON shape a config file is authored in, before template
/// expansion. `storage_path`/`key_dir`/`chain_db`/`state_db` may
/// reference `{base_path}` and `{account_address}`; everything else is
/// taken literally.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
struct RawConfig {
    base_path: String,
    account_address: String,
    #[serde(default = "default_storage_path")]
    storage_path: String,
    #[serde(default = "default_key_dir")]
    key_dir: String,
    #[serde(default = "default_chain_db")]
    chain_db: String,
    #[serde(default = "default_state_db")]
    state_db: String,
    discovery_service: DiscoveryService,
    #[serde(default = "default_p2p_port")]
    p2p_port: u16,
    #[serde(default = "default_rpc_port")]
    rpc_port: u16,
    #[serde(default = "default_p2p_bind")]
    p2p_bind_address: String,
    #[serde(default = "default_rpc_bind")]
    rpc_bind_address: String,
    #[serde(default = "default_max_peers")]
    max_peers: usize,
}

fn default_storage_path() -> String {
    "{base_path}/{account_address}".to_string()
}
fn default_key_dir() -> String {
    "{base_path}/{account_address}/.keys".to_string()
}
fn default_chain_db() -> String {
    "{base_path}/{account_address}/chain".to_string()
}
fn default_state_db() -> String {
    "{base_path}/{account_address}/state".to_string()
}
fn default_p2p_port() -> u16 {
    P2P_PORT
}
fn default_rpc_port() -> u16 {
    RPC_PORT
}
fn default_p2p_bind() -> String {
    P2P_BIND_ADDRESS_DEFAULT.to_string()
}
fn default_rpc_bind() -> String {
    RPC_BIND_ADDRESS_DEFAULT.to_string()
}
fn default_max_peers() -> usize {
    MAX_PEERS
}

/// Fully resolved runtime configuration — every path here is concrete,
/// template expansion already applied.
#[derive(Debug, Clone)]
pub struct Config {
    pub base_path: PathBuf,
    pub account_address: String,
    pub storage_path: PathBuf,
    pub key_dir: PathBuf,
    pub chain_db: PathBuf,
    pub state_db: PathBuf,
    pub discovery_service: DiscoveryService,
    pub p2p_port: u16,
    pub rpc_port: u16,
    pub p2p_bind_address: String,
    pub rpc_bind_address: String,
    pub max_peers: usize,
}

fn expand(template: &str, base_path: &str, account_address: &str) -> String {
    template.replace("{base_path}", base_path).replace("{account_address}", account_address)
}

impl Config {
    pub fn load(path: &Path) -> crate::error::Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| Error::Config(format!("reading {}: {e}", path.display())))?;
        let raw: RawConfig = serde_json::from_str(&raw).map_err(|e| Error::Config(format!("parsing {}: {e}", path.display())))?;
        Ok(Config {
            storage_path: PathBuf::from(expand(&raw.storage_path, &raw.base_path, &raw.account_address)),
            key_dir: PathBuf::from(expand(&raw.key_dir, &raw.base_path, &raw.account_address)),
            chain_db: PathBuf::from(expand(&raw.chain_db, &raw.base_path, &raw.account_address)),
            state_db: PathBuf::from(expand(&raw.state_db, &raw.base_path, &raw.account_address)),
            base_path: PathBuf::from(&raw.base_path),
            account_address: raw.account_address,
            discovery_service: raw.discovery_service,
            p2p_port: raw.p2p_port,
            rpc_port: raw.rpc_port,
            p2p_bind_address: raw.p2p_bind_address,
            rpc_bind_address: raw.rpc_bind_address,
            max_peers: raw.max_peers,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn template_fields_expand_against_base_path_and_address() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{
                "base_path": "/var/corechain",
                "account_address": "abc123",
                "discovery_service": {{"host": "seed.example", "port": 9100, "proto": "tcp"}}
            }}"#
        )
        .unwrap();
        let cfg = Config::load(file.path()).unwrap();
        assert_eq!(cfg.storage_path, PathBuf::from("/var/corechain/abc123"));
        assert_eq!(cfg.key_dir, PathBuf::from("/var/corechain/abc123/.keys"));
        assert_eq!(cfg.chain_db, PathBuf::from("/var/corechain/abc123/chain"));
        assert_eq!(cfg.p2p_port, P2P_PORT);
    }

    #[test]
    fn malformed_json_is_a_config_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "not json").unwrap();
        assert!(matches!(Config::load(file.path()), Err(Error::Config(_))));
    }
}
