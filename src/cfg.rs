//! Daemon configuration, loaded from a TOML file.

use std::{fs, net::SocketAddr, path::PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::{crypto::KeyType, types::{AccountId, Bridge}};

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Websocket endpoint of the locking chain, e.g. "ws://127.0.0.1:6005".
    pub locking_chain_endpoint: String,
    /// Websocket endpoint of the issuing chain.
    pub issuing_chain_endpoint: String,
    /// Address the JSON-RPC server listens on. Defaults to 127.0.0.1:6010.
    #[serde(default = "default_rpc_endpoint")]
    pub rpc_endpoint: SocketAddr,
    /// Directory holding the attestation database.
    pub data_dir: PathBuf,
    /// Signing key type. Defaults to secp256k1.
    #[serde(default)]
    pub key_type: KeyType,
    /// The witness's signing key, 32 hex-encoded bytes.
    pub signing_key: String,
    /// The bridge this witness attests for, in the chain's `XChainBridge`
    /// JSON shape.
    pub bridge: Bridge,
    /// Where this witness wants rewards paid on the locking chain.
    pub locking_chain_reward_account: AccountId,
    /// Where this witness wants rewards paid on the issuing chain.
    pub issuing_chain_reward_account: AccountId,
    /// When false, attestations are only stored for RPC harvesting and
    /// never submitted to the chains. Defaults to true.
    #[serde(default = "default_witness_submit")]
    pub witness_submit: bool,
    /// Interval between submission-batch flushes, in milliseconds.
    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,
    /// Credentials required by privileged RPC commands.
    pub admin: Option<AdminConfig>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AdminConfig {
    pub username: String,
    pub password: String,
}

fn default_rpc_endpoint() -> SocketAddr {
    "127.0.0.1:6010".parse().unwrap()
}

fn default_witness_submit() -> bool {
    true
}

fn default_heartbeat_interval_ms() -> u64 {
    1000
}

pub fn read_config(config_file: &PathBuf) -> Result<Config> {
    let config_content = fs::read_to_string(config_file)
        .with_context(|| format!("reading config file {}", config_file.display()))?;
    toml::from_str(&config_content)
        .with_context(|| format!("parsing config file {}", config_file.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_toml() -> String {
        let door_a = AccountId([1u8; 20]).to_base58();
        let door_b = AccountId([2u8; 20]).to_base58();
        let reward = AccountId([3u8; 20]).to_base58();
        format!(
            r#"
            locking_chain_endpoint = "ws://127.0.0.1:6005"
            issuing_chain_endpoint = "ws://127.0.0.1:6007"
            data_dir = "/var/lib/witness"
            signing_key = "{key}"
            locking_chain_reward_account = "{reward}"
            issuing_chain_reward_account = "{reward}"

            [bridge]
            LockingChainDoor = "{door_a}"
            LockingChainIssue = {{ currency = "XRP" }}
            IssuingChainDoor = "{door_b}"
            IssuingChainIssue = {{ currency = "XRP" }}
            "#,
            key = "11".repeat(32),
        )
    }

    #[test]
    fn parses_minimal_config() {
        let config: Config = toml::from_str(&minimal_toml()).unwrap();
        assert_eq!(config.key_type, KeyType::Secp256k1);
        assert!(config.witness_submit);
        assert_eq!(config.heartbeat_interval_ms, 1000);
        assert_eq!(config.rpc_endpoint, default_rpc_endpoint());
        assert!(config.admin.is_none());
    }

    #[test]
    fn rejects_unknown_fields() {
        let toml = format!("unknown_knob = true\n{}", minimal_toml());
        assert!(toml::from_str::<Config>(&toml).is_err());
    }
}
