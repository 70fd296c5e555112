//! Chain, asset, and settlement-rail identifiers.
//!
//! - [`ChainId`] - A CAIP-2 compliant chain identifier (e.g. `eip155:8453`)
//! - [`AssetId`] - A CAIP-19 style asset identifier
//!   (`eip155:1/erc20:0xA0b8...`); the ledger always keys balances by it so
//!   the same logical currency on different rails cannot be confused
//! - [`NetworkId`] - An opaque settlement-rail identifier compared by exact
//!   string match: a CAIP-2 chain id for on-chain rails, a processor name
//!   (e.g. `stripe`) for off-ledger rails, or `ledger` for the reference
//!   ledger rail

use serde::{Deserialize, Deserializer, Serialize, Serializer, de};
use std::fmt;
use std::str::FromStr;

/// A CAIP-2 compliant blockchain identifier.
///
/// The format is `namespace:reference` where `namespace` identifies the
/// blockchain family (e.g. `eip155`, `solana`) and `reference` the specific
/// chain within that family.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChainId {
    namespace: String,
    reference: String,
}

impl ChainId {
    /// Creates a new chain ID from namespace and reference components.
    pub fn new<N: Into<String>, R: Into<String>>(namespace: N, reference: R) -> Self {
        Self {
            namespace: namespace.into(),
            reference: reference.into(),
        }
    }

    /// Returns the namespace component.
    #[must_use]
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Returns the reference component.
    #[must_use]
    pub fn reference(&self) -> &str {
        &self.reference
    }
}

impl fmt::Display for ChainId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.namespace, self.reference)
    }
}

/// Error returned when parsing an invalid chain ID string.
#[derive(Debug, thiserror::Error)]
#[error("Invalid chain id format {0}")]
pub struct ChainIdFormatError(String);

impl FromStr for ChainId {
    type Err = ChainIdFormatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (namespace, reference) = s
            .split_once(':')
            .ok_or_else(|| ChainIdFormatError(s.into()))?;
        if namespace.is_empty() || reference.is_empty() {
            return Err(ChainIdFormatError(s.into()));
        }
        Ok(Self::new(namespace, reference))
    }
}

impl Serialize for ChainId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for ChainId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Self::from_str(&s).map_err(de::Error::custom)
    }
}

/// A CAIP-19 style asset identifier.
///
/// Serializes as `chain_id/asset_namespace:asset_reference`, e.g.
/// `eip155:1/erc20:0xA0b86991c6218b36c1d19D4a2e9Eb0cE3606eB48`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AssetId {
    chain: ChainId,
    namespace: String,
    reference: String,
}

impl AssetId {
    /// Creates a new asset ID.
    pub fn new<N: Into<String>, R: Into<String>>(chain: ChainId, namespace: N, reference: R) -> Self {
        Self {
            chain,
            namespace: namespace.into(),
            reference: reference.into(),
        }
    }

    /// Returns the chain this asset is deployed on.
    #[must_use]
    pub fn chain(&self) -> &ChainId {
        &self.chain
    }

    /// Returns the asset namespace (e.g. `erc20`, `token`, `slip44`).
    #[must_use]
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Returns the asset reference (contract address, mint, or coin type).
    #[must_use]
    pub fn reference(&self) -> &str {
        &self.reference
    }
}

impl fmt::Display for AssetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}:{}", self.chain, self.namespace, self.reference)
    }
}

/// Error returned when parsing an invalid asset ID string.
#[derive(Debug, thiserror::Error)]
#[error("Invalid asset id format {0}")]
pub struct AssetIdFormatError(String);

impl FromStr for AssetId {
    type Err = AssetIdFormatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (chain_part, asset_part) = s
            .split_once('/')
            .ok_or_else(|| AssetIdFormatError(s.into()))?;
        let chain = ChainId::from_str(chain_part).map_err(|_| AssetIdFormatError(s.into()))?;
        let (namespace, reference) = asset_part
            .split_once(':')
            .ok_or_else(|| AssetIdFormatError(s.into()))?;
        if namespace.is_empty() || reference.is_empty() {
            return Err(AssetIdFormatError(s.into()));
        }
        Ok(Self::new(chain, namespace, reference))
    }
}

impl Serialize for AssetId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for AssetId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Self::from_str(&s).map_err(de::Error::custom)
    }
}

/// A settlement-rail identifier.
///
/// Payment options name the rail they settle on. Lookups compare the raw
/// string exactly; there is no fuzzy matching, so a client asking for an
/// unsupported rail gets a typed failure rather than a guess.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NetworkId(String);

impl NetworkId {
    /// Creates a network ID from its string form.
    pub fn new<S: Into<String>>(s: S) -> Self {
        Self(s.into())
    }

    /// Returns the string form.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Parses the network ID as a CAIP-2 chain id, if it is one.
    #[must_use]
    pub fn as_chain_id(&self) -> Option<ChainId> {
        ChainId::from_str(&self.0).ok()
    }
}

impl fmt::Display for NetworkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<ChainId> for NetworkId {
    fn from(chain: ChainId) -> Self {
        Self(chain.to_string())
    }
}

impl From<&str> for NetworkId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl Serialize for NetworkId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for NetworkId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(Self(String::deserialize(deserializer)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chain_id_roundtrip() {
        let original = ChainId::new("eip155", "84532");
        let serialized = serde_json::to_string(&original).unwrap();
        assert_eq!(serialized, "\"eip155:84532\"");
        let deserialized: ChainId = serde_json::from_str(&serialized).unwrap();
        assert_eq!(original, deserialized);
    }

    #[test]
    fn test_chain_id_rejects_invalid() {
        assert!(ChainId::from_str("eip155").is_err());
        assert!(ChainId::from_str(":84532").is_err());
        assert!(ChainId::from_str("eip155:").is_err());
    }

    #[test]
    fn test_asset_id_display_and_parse() {
        let asset = AssetId::new(
            ChainId::new("eip155", "1"),
            "erc20",
            "0xA0b86991c6218b36c1d19D4a2e9Eb0cE3606eB48",
        );
        let s = asset.to_string();
        assert_eq!(
            s,
            "eip155:1/erc20:0xA0b86991c6218b36c1d19D4a2e9Eb0cE3606eB48"
        );
        let parsed = AssetId::from_str(&s).unwrap();
        assert_eq!(parsed, asset);
    }

    #[test]
    fn test_asset_id_solana_mint() {
        let asset = AssetId::from_str(
            "solana:EtWTRABZaYq6iMfeYKouRu166VU2xqa1/token:4zMMC9srt5Ri5X14GAgXhaHii3GnPAEERYPJgZJDncDU",
        )
        .unwrap();
        assert_eq!(asset.namespace(), "token");
        assert_eq!(asset.chain().namespace(), "solana");
    }

    #[test]
    fn test_asset_id_rejects_invalid() {
        assert!(AssetId::from_str("eip155:1").is_err());
        assert!(AssetId::from_str("eip155:1/erc20").is_err());
        assert!(AssetId::from_str("bare/erc20:0xabc").is_err());
    }

    #[test]
    fn test_network_id_exact_match_only() {
        let a = NetworkId::new("eip155:84532");
        let b = NetworkId::new("eip155:84532 ");
        assert_ne!(a, b);
        assert_eq!(a, NetworkId::from(ChainId::new("eip155", "84532")));
    }

    #[test]
    fn test_network_id_as_chain_id() {
        assert!(NetworkId::new("eip155:84532").as_chain_id().is_some());
        assert!(NetworkId::new("stripe").as_chain_id().is_none());
    }
}
