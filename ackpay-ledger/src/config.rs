//! Service configuration.
//!
//! Loads configuration from a TOML file with support for environment
//! variable expansion in string values. Variables use `$VAR` or `${VAR}`
//! syntax.
//!
//! # Example Configuration
//!
//! ```toml
//! host = "0.0.0.0"
//! port = 4567
//! demand_ttl_seconds = 300
//! receipt_ttl_seconds = 3600
//! resource_price = 40000
//!
//! [identity]
//! server_did = "did:web:localhost%3A4567"
//! server_seed = "$SERVER_SEED_HEX"
//! receipt_did = "did:web:localhost%3A4568"
//! receipt_seed = "$RECEIPT_SEED_HEX"
//!
//! [ledger]
//! asset = "eip155:1/erc20:0xA0b86991c6218b36c1d19D4a2e9Eb0cE3606eB48"
//! decimals = 6
//! currency = "USDC"
//!
//! [retry]
//! max_attempts = 10
//! interval_ms = 1000
//!
//! [rails.evm]
//! network = "eip155:84532"
//! rpc_url = "https://sepolia.base.org"
//!
//! [rails.solana]
//! network = "solana:EtWTRABZaYq6iMfeYKouRu166VU2xqa1"
//! rpc_url = "https://api.devnet.solana.com"
//!
//! [rails.processor]
//! network = "stripe"
//!
//! [[accounts]]
//! did = "did:web:localhost%3A5678"
//! seed = "$PAYER_SEED_HEX"
//! balance = "1000000000"
//! ```
//!
//! # Environment Variables
//!
//! - `CONFIG` — Path to configuration file (default: `config.toml`)
//! - `HOST` — Override server bind address
//! - `PORT` — Override server port
//! - Seeds referenced by `$VAR` in the config file

use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::path::Path;

use ackpay::policy::AgentPolicy;

/// Errors from configuration loading.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("Cannot read config: {0}")]
    Io(#[from] std::io::Error),
    /// The file is not valid TOML for this schema.
    #[error("Cannot parse config: {0}")]
    Parse(#[from] toml::de::Error),
    /// A seed is not 32 bytes of hex.
    #[error("Invalid key seed for {0}: expected 64 hex chars")]
    InvalidSeed(String),
    /// A balance is not a decimal subunit count.
    #[error("Invalid balance for {0}: expected decimal subunits")]
    InvalidBalance(String),
}

/// Top-level service configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Server bind address (default: `0.0.0.0`).
    #[serde(default = "default_host")]
    pub host: IpAddr,

    /// Server port (default: `4567`).
    #[serde(default = "default_port")]
    pub port: u16,

    /// Validity window of payment demands, in seconds.
    #[serde(default = "default_demand_ttl")]
    pub demand_ttl_seconds: u64,

    /// Validity window of issued receipts, in seconds.
    #[serde(default = "default_receipt_ttl")]
    pub receipt_ttl_seconds: u64,

    /// Price of the demo resource, in settlement-asset subunits.
    #[serde(default = "default_resource_price")]
    pub resource_price: u64,

    /// Service and receipt-issuer identities.
    pub identity: IdentityConfig,

    /// Ledger settlement asset.
    pub ledger: LedgerConfig,

    /// Settlement-lookup retry budget.
    #[serde(default)]
    pub retry: RetryConfig,

    /// Optional external rails.
    #[serde(default)]
    pub rails: RailsConfig,

    /// Accounts seeded at startup.
    #[serde(default)]
    pub accounts: Vec<AccountConfig>,
}

/// Signing identities of the service and its receipt issuer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityConfig {
    /// The resource server's DID.
    pub server_did: String,
    /// The resource server's Ed25519 seed (hex). Supports `$VAR` expansion.
    pub server_seed: String,
    /// The receipt issuer's DID.
    pub receipt_did: String,
    /// The receipt issuer's Ed25519 seed (hex). Supports `$VAR` expansion.
    pub receipt_seed: String,
}

/// The asset the ledger settles.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerConfig {
    /// CAIP-19 asset identifier.
    pub asset: String,
    /// Subunit decimals.
    pub decimals: u8,
    /// Display currency symbol.
    pub currency: String,
}

/// Bounded retry budget for eventually-consistent settlement lookups.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum lookups per verification attempt.
    pub max_attempts: u32,
    /// Delay between lookups, in milliseconds.
    pub interval_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            interval_ms: 1000,
        }
    }
}

/// Optional external settlement rails.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RailsConfig {
    /// An EVM rail, if configured.
    pub evm: Option<ChainRailConfig>,
    /// A Solana rail, if configured.
    pub solana: Option<ChainRailConfig>,
    /// An off-ledger processor rail, if configured.
    pub processor: Option<ProcessorRailConfig>,
}

/// A chain rail: which network, and where to reach it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainRailConfig {
    /// The rail's network id (CAIP-2).
    pub network: String,
    /// HTTP RPC endpoint URL.
    pub rpc_url: String,
}

/// An off-ledger processor rail.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessorRailConfig {
    /// The processor's network id (e.g. `stripe`).
    pub network: String,
}

/// An account to register at startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountConfig {
    /// The account DID.
    pub did: String,
    /// The account's Ed25519 seed (hex). Supports `$VAR` expansion.
    pub seed: String,
    /// Starting balance of the settlement asset, in subunits.
    pub balance: String,
    /// The account's initial policy.
    #[serde(default)]
    pub policy: AgentPolicy,
}

fn default_host() -> IpAddr {
    IpAddr::V4(std::net::Ipv4Addr::new(0, 0, 0, 0))
}

fn default_port() -> u16 {
    4567
}

fn default_demand_ttl() -> u64 {
    300
}

fn default_receipt_ttl() -> u64 {
    3600
}

fn default_resource_price() -> u64 {
    40_000
}

impl ServiceConfig {
    /// Loads configuration from the path given by the `CONFIG` environment
    /// variable, falling back to `config.toml` in the current directory.
    ///
    /// `$VAR` / `${VAR}` references are expanded from the process
    /// environment before parsing; `HOST` and `PORT` override the file
    /// values.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the file cannot be read or parsed.
    pub fn load() -> Result<Self, ConfigError> {
        let path = std::env::var("CONFIG").unwrap_or_else(|_| "config.toml".to_owned());
        Self::load_from(&path)
    }

    /// Loads configuration from a specific file path.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the file cannot be read or parsed.
    pub fn load_from(path: &str) -> Result<Self, ConfigError> {
        let content = if Path::new(path).exists() {
            std::fs::read_to_string(path)?
        } else {
            String::new()
        };

        let expanded = expand_env_vars(&content);
        let mut config: Self = toml::from_str(&expanded)?;

        if let Ok(host) = std::env::var("HOST") {
            if let Ok(addr) = host.parse() {
                config.host = addr;
            }
        }
        if let Ok(port) = std::env::var("PORT") {
            if let Ok(p) = port.parse() {
                config.port = p;
            }
        }

        Ok(config)
    }
}

/// Decodes a 32-byte Ed25519 seed from hex.
///
/// # Errors
///
/// Returns [`ConfigError::InvalidSeed`] for anything but 64 hex chars.
pub fn parse_seed(owner: &str, seed_hex: &str) -> Result<[u8; 32], ConfigError> {
    let bytes =
        hex::decode(seed_hex.trim()).map_err(|_| ConfigError::InvalidSeed(owner.to_owned()))?;
    bytes
        .try_into()
        .map_err(|_| ConfigError::InvalidSeed(owner.to_owned()))
}

/// Parses an account's starting balance (decimal subunits).
///
/// # Errors
///
/// Returns [`ConfigError::InvalidBalance`] for anything but a decimal
/// integer.
pub fn parse_balance(owner: &str, balance: &str) -> Result<u128, ConfigError> {
    balance
        .trim()
        .parse::<u128>()
        .map_err(|_| ConfigError::InvalidBalance(owner.to_owned()))
}

/// Expands `$VAR` and `${VAR}` patterns from environment variables.
///
/// Unresolved variables are left as-is.
fn expand_env_vars(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' {
            let braced = chars.peek() == Some(&'{');
            if braced {
                chars.next();
            }

            let mut var_name = String::new();
            while let Some(&c) = chars.peek() {
                if braced {
                    if c == '}' {
                        chars.next();
                        break;
                    }
                } else if !c.is_ascii_alphanumeric() && c != '_' {
                    break;
                }
                var_name.push(c);
                chars.next();
            }

            if var_name.is_empty() {
                result.push('$');
                if braced {
                    result.push('{');
                }
            } else if let Ok(val) = std::env::var(&var_name) {
                result.push_str(&val);
            } else {
                result.push('$');
                if braced {
                    result.push('{');
                }
                result.push_str(&var_name);
                if braced {
                    result.push('}');
                }
            }
        } else {
            result.push(ch);
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_minimal_config() {
        let config: ServiceConfig = toml::from_str(
            r#"
            [identity]
            server_did = "did:web:localhost%3A4567"
            server_seed = "0101010101010101010101010101010101010101010101010101010101010101"
            receipt_did = "did:web:localhost%3A4568"
            receipt_seed = "0202020202020202020202020202020202020202020202020202020202020202"

            [ledger]
            asset = "eip155:1/erc20:0xA0b86991c6218b36c1d19D4a2e9Eb0cE3606eB48"
            decimals = 6
            currency = "USDC"
            "#,
        )
        .unwrap();
        assert_eq!(config.port, 4567);
        assert_eq!(config.demand_ttl_seconds, 300);
        assert_eq!(config.retry.max_attempts, 10);
        assert!(config.rails.evm.is_none());
        assert!(config.accounts.is_empty());
    }

    #[test]
    #[allow(unsafe_code)]
    fn test_env_expansion() {
        // Safe: test-local variable name nothing else reads.
        unsafe { std::env::set_var("ACKPAY_TEST_SEED", "aa") };
        assert_eq!(expand_env_vars("seed = \"$ACKPAY_TEST_SEED\""), "seed = \"aa\"");
        assert_eq!(
            expand_env_vars("seed = \"${ACKPAY_TEST_SEED}bb\""),
            "seed = \"aabb\""
        );
        assert_eq!(expand_env_vars("$NOT_SET_ANYWHERE_1"), "$NOT_SET_ANYWHERE_1");
    }

    #[test]
    fn test_parse_seed() {
        let seed = parse_seed("payer", &"01".repeat(32)).unwrap();
        assert_eq!(seed, [1u8; 32]);
        assert!(parse_seed("payer", "0102").is_err());
        assert!(parse_seed("payer", "zz").is_err());
    }

    #[test]
    fn test_parse_balance() {
        assert_eq!(parse_balance("payer", "1000000000").unwrap(), 1_000_000_000);
        assert!(parse_balance("payer", "1e9").is_err());
    }
}
