use std::{fmt::Display, time::Duration};

use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DisplayFromStr};

use crate::{AccountId, PrivateKey};

/// First account number handed out to devnet fixture accounts.
pub const DEVNET_FIRST_ACCOUNT: u64 = 1001;

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct AccountConfig {
    pub id: AccountId,
    pub private_key: PrivateKey,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct AccountsConfig {
    pub entries: Vec<AccountConfig>,

    /// Index of the account acting as token treasury
    #[serde(default)]
    pub treasury: usize,

    /// Index of the account used to park surplus tokens
    #[serde(default = "default_parking")]
    pub parking: usize,
}

fn default_parking() -> usize {
    4
}

impl AccountsConfig {
    /// Fixture accounts with deterministic keys, suitable for an emulated
    /// ledger.
    pub fn devnet(count: usize) -> Self {
        let entries = (0..count as u64)
            .map(|i| {
                let id = AccountId::from_num(DEVNET_FIRST_ACCOUNT + i);

                AccountConfig {
                    id,
                    private_key: PrivateKey::derive(&format!("tally-devnet-{id}")),
                }
            })
            .collect();

        Self {
            entries,
            treasury: 0,
            parking: default_parking(),
        }
    }
}

impl Default for AccountsConfig {
    fn default() -> Self {
        Self::devnet(5)
    }
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Network {
    Mainnet,
    Testnet,
    Previewnet,

    #[default]
    Devnet,
}

impl Display for Network {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Mainnet => "mainnet",
            Self::Testnet => "testnet",
            Self::Previewnet => "previewnet",
            Self::Devnet => "devnet",
        };

        f.write_str(name)
    }
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct NetworkConfig {
    #[serde(default)]
    pub network: Network,

    /// Whole hbars credited to each fixture account on an emulated ledger
    #[serde(default = "default_initial_hbars")]
    pub initial_hbars: u64,
}

fn default_initial_hbars() -> u64 {
    1_000
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            network: Network::default(),
            initial_hbars: default_initial_hbars(),
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct WatchConfig {
    /// Seconds to wait for a matching topic message
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Seconds of topic history replayed when a subscription starts
    #[serde(default = "default_lookback_secs")]
    pub lookback_secs: u64,
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_lookback_secs() -> u64 {
    60
}

impl WatchConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn lookback(&self) -> Duration {
        Duration::from_secs(self.lookback_secs)
    }
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
            lookback_secs: default_lookback_secs(),
        }
    }
}

#[serde_as]
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct LoggingConfig {
    #[serde_as(as = "DisplayFromStr")]
    pub max_level: tracing::Level,

    /// Also emit events from the emulated ledger
    #[serde(default)]
    pub include_emulator: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            max_level: tracing::Level::INFO,
            include_emulator: Default::default(),
        }
    }
}

#[derive(Serialize, Deserialize, Default, Debug, Clone)]
pub struct HarnessConfig {
    #[serde(default)]
    pub accounts: AccountsConfig,

    #[serde(default)]
    pub network: NetworkConfig,

    #[serde(default)]
    pub watch: WatchConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_describe_five_devnet_accounts() {
        let config = HarnessConfig::default();

        assert_eq!(config.accounts.entries.len(), 5);
        assert_eq!(config.accounts.parking, 4);
        assert_eq!(config.accounts.treasury, 0);
        assert_eq!(config.accounts.entries[0].id, AccountId::from_num(1001));
        assert_eq!(config.network.network, Network::Devnet);
        assert_eq!(config.watch.timeout(), Duration::from_secs(30));
        assert_eq!(config.logging.max_level, tracing::Level::INFO);
    }

    #[test]
    fn devnet_keys_are_distinct_per_account() {
        let accounts = AccountsConfig::devnet(3);

        let keys: std::collections::BTreeSet<_> = accounts
            .entries
            .iter()
            .map(|x| x.private_key.public_key())
            .collect();

        assert_eq!(keys.len(), 3);
    }

    #[test]
    fn partial_json_falls_back_to_defaults() {
        let raw = r#"{
            "accounts": {
                "entries": [
                    { "id": "0.0.4501", "private_key": "302e020100300506032b657004220420aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa" }
                ],
                "parking": 0
            },
            "network": { "network": "testnet" },
            "logging": { "max_level": "debug" }
        }"#;

        let config: HarnessConfig = serde_json::from_str(raw).unwrap();

        assert_eq!(config.accounts.entries[0].id, AccountId::from_num(4501));
        assert_eq!(config.accounts.parking, 0);
        assert_eq!(config.network.network, Network::Testnet);
        assert_eq!(config.network.initial_hbars, 1_000);
        assert_eq!(config.watch.lookback_secs, 60);
        assert_eq!(config.logging.max_level, tracing::Level::DEBUG);
    }

    #[test]
    fn partial_watch_section_keeps_other_default() {
        let config: HarnessConfig =
            serde_json::from_str(r#"{ "watch": { "timeout_secs": 5 } }"#).unwrap();

        assert_eq!(config.watch.timeout(), Duration::from_secs(5));
        assert_eq!(config.watch.lookback(), Duration::from_secs(60));

        let config: HarnessConfig =
            serde_json::from_str(r#"{ "watch": { "lookback_secs": 15 } }"#).unwrap();

        assert_eq!(config.watch.timeout_secs, 30);
        assert_eq!(config.watch.lookback_secs, 15);
    }
}
