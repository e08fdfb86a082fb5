//! Configuration for the validator client

use crate::types::parse_address;
use ethers::types::Address;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Largest decimals value whose scale factor fits in a uint256
const MAX_TOKEN_DECIMALS: u32 = 77;

/// Validator client configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Local record storage
    pub storage: StorageConfig,

    /// Ledger connection and protocol contracts
    pub ledger: LedgerConfig,

    /// Signing identity selection
    pub identity: IdentityConfig,
}

/// Record store backend
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// One JSON file per record
    #[default]
    File,
    /// Embedded RocksDB
    RocksDb,
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory holding identity and commit records
    pub data_dir: PathBuf,

    /// Backend used for records
    pub backend: StoreBackend,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data/validator"),
            backend: StoreBackend::File,
        }
    }
}

/// Ledger configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    /// JSON-RPC endpoint
    pub rpc_url: String,

    /// Expected chain id (queried from the endpoint when unset)
    pub chain_id: Option<u64>,

    /// Validation module (commit/reveal, rounds, nonces)
    pub validation_module: String,

    /// Job registry (spec hashes, dispute raising)
    pub job_registry: String,

    /// Dispute module (dispute state, evidence)
    pub dispute_module: String,

    /// Stake manager (deposits, withdrawals, approval spender)
    pub stake_manager: String,

    /// Staking token
    pub staking_token: String,

    /// Staking token decimals
    pub token_decimals: u32,

    /// Confirmations awaited per transaction
    pub confirmations: usize,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        let zero = format!("{:?}", Address::zero());
        Self {
            rpc_url: "http://127.0.0.1:8545".to_string(),
            chain_id: None,
            validation_module: zero.clone(),
            job_registry: zero.clone(),
            dispute_module: zero.clone(),
            stake_manager: zero.clone(),
            staking_token: zero,
            token_decimals: 18,
            confirmations: 1,
        }
    }
}

/// Parsed protocol contract addresses
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContractAddresses {
    /// Validation module
    pub validation_module: Address,
    /// Job registry
    pub job_registry: Address,
    /// Dispute module
    pub dispute_module: Address,
    /// Stake manager
    pub stake_manager: Address,
    /// Staking token
    pub staking_token: Address,
}

impl LedgerConfig {
    /// Parse and check contract addresses
    pub fn contracts(&self) -> crate::Result<ContractAddresses> {
        let parse = |name: &str, value: &str| -> crate::Result<Address> {
            let address = parse_address(value).map_err(|e| {
                crate::Error::Config(format!("ledger.{} is not an address: {}", name, e))
            })?;
            if address.is_zero() {
                return Err(crate::Error::Config(format!("ledger.{} is not set", name)));
            }
            Ok(address)
        };

        Ok(ContractAddresses {
            validation_module: parse("validation_module", &self.validation_module)?,
            job_registry: parse("job_registry", &self.job_registry)?,
            dispute_module: parse("dispute_module", &self.dispute_module)?,
            stake_manager: parse("stake_manager", &self.stake_manager)?,
            staking_token: parse("staking_token", &self.staking_token)?,
        })
    }
}

/// Identity configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct IdentityConfig {
    /// Label used when a command omits `--label`
    pub default_label: Option<String>,

    /// Address the resolved signer must match
    pub expected_address: Option<String>,
}

impl IdentityConfig {
    /// Parsed expected signer address
    pub fn expected_address(&self) -> crate::Result<Option<Address>> {
        self.expected_address
            .as_deref()
            .map(|s| {
                parse_address(s).map_err(|e| {
                    crate::Error::Config(format!("identity.expected_address: {}", e))
                })
            })
            .transpose()
    }
}

impl Config {
    /// Load from file
    pub fn from_file(path: impl AsRef<std::path::Path>) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| crate::Error::Config(format!("Failed to parse config: {}", e)))?;
        Ok(config)
    }

    /// Apply environment variable overrides
    pub fn with_env(mut self) -> crate::Result<Self> {
        if let Ok(data_dir) = std::env::var("VALIDATOR_DATA_DIR") {
            self.storage.data_dir = PathBuf::from(data_dir);
        }

        if let Ok(url) = std::env::var("VALIDATOR_RPC_URL") {
            self.ledger.rpc_url = url;
        }

        if let Ok(chain_id) = std::env::var("VALIDATOR_CHAIN_ID") {
            let chain_id = chain_id.parse::<u64>().map_err(|e| {
                crate::Error::Config(format!("VALIDATOR_CHAIN_ID {:?}: {}", chain_id, e))
            })?;
            self.ledger.chain_id = Some(chain_id);
        }

        if let Ok(label) = std::env::var("VALIDATOR_LABEL") {
            self.identity.default_label = Some(label);
        }

        if let Ok(address) = std::env::var("VALIDATOR_EXPECTED_ADDRESS") {
            self.identity.expected_address = Some(address);
        }

        Ok(self)
    }

    /// Load from environment variables over defaults
    pub fn from_env() -> crate::Result<Self> {
        Config::default().with_env()
    }

    /// Reject unusable settings
    pub fn validate(&self) -> crate::Result<()> {
        if self.storage.data_dir.as_os_str().is_empty() {
            return Err(crate::Error::Config("storage.data_dir is empty".to_string()));
        }
        if self.ledger.token_decimals > MAX_TOKEN_DECIMALS {
            return Err(crate::Error::Config(format!(
                "ledger.token_decimals must be at most {}",
                MAX_TOKEN_DECIMALS
            )));
        }
        self.identity.expected_address()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.storage.backend, StoreBackend::File);
        assert_eq!(config.ledger.token_decimals, 18);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: Config = toml::from_str(
            r#"
            [storage]
            backend = "rocksdb"

            [ledger]
            rpc_url = "https://rpc.example.org"
            chain_id = 11155111
            "#,
        )
        .unwrap();

        assert_eq!(config.storage.backend, StoreBackend::RocksDb);
        assert_eq!(config.storage.data_dir, PathBuf::from("./data/validator"));
        assert_eq!(config.ledger.chain_id, Some(11155111));
        assert_eq!(config.ledger.confirmations, 1);
    }

    #[test]
    fn test_unset_contracts_rejected() {
        let config = Config::default();
        assert!(matches!(
            config.ledger.contracts(),
            Err(crate::Error::Config(_))
        ));
    }

    #[test]
    fn test_contracts_parse() {
        let mut ledger = LedgerConfig::default();
        let addr = "0x00000000000000000000000000000000000000a1";
        ledger.validation_module = addr.to_string();
        ledger.job_registry = addr.to_string();
        ledger.dispute_module = addr.to_string();
        ledger.stake_manager = addr.to_string();
        ledger.staking_token = addr.to_string();

        let contracts = ledger.contracts().unwrap();
        assert_eq!(contracts.stake_manager, Address::from_low_u64_be(0xa1));
    }

    #[test]
    fn test_validate_rejects_bad_settings() {
        let mut config = Config::default();
        config.ledger.token_decimals = 78;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.identity.expected_address = Some("0x1234".to_string());
        assert!(config.validate().is_err());
    }
}
