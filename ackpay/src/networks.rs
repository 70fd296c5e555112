//! Registry of well-known settlement rails.
//!
//! Maps a rail's [`NetworkId`] to its chain, settlement asset, and currency
//! precision. Concrete rail data lives in chain-specific crates
//! (`ackpay-evm`, `ackpay-svm`); applications assemble a [`RailRegistry`]
//! from those slices at startup.

use std::collections::HashMap;

use crate::caip::{AssetId, ChainId, NetworkId};

/// A known settlement rail with its configured settlement asset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RailInfo {
    /// Rail identifier (CAIP-2 string for chains, processor name otherwise).
    pub network: &'static str,
    /// CAIP-2 namespace of the underlying chain.
    pub chain_namespace: &'static str,
    /// CAIP-2 reference of the underlying chain.
    pub chain_reference: &'static str,
    /// Asset namespace of the settlement asset (e.g. `erc20`, `token`).
    pub asset_namespace: &'static str,
    /// Asset reference (contract address or mint).
    pub asset_reference: &'static str,
    /// Subunit decimals of the settlement asset.
    pub decimals: u8,
    /// Display currency symbol.
    pub currency: &'static str,
}

impl RailInfo {
    /// The rail's [`NetworkId`].
    #[must_use]
    pub fn network_id(&self) -> NetworkId {
        NetworkId::new(self.network)
    }

    /// The rail's [`ChainId`].
    #[must_use]
    pub fn chain_id(&self) -> ChainId {
        ChainId::new(self.chain_namespace, self.chain_reference)
    }

    /// The rail's settlement [`AssetId`].
    #[must_use]
    pub fn asset_id(&self) -> AssetId {
        AssetId::new(self.chain_id(), self.asset_namespace, self.asset_reference)
    }
}

/// Registry of configured rails, keyed by [`NetworkId`].
#[derive(Debug, Clone, Default)]
pub struct RailRegistry {
    rails: HashMap<NetworkId, RailInfo>,
}

impl RailRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry pre-populated from a rail slice.
    #[must_use]
    pub fn from_rails(rails: &[RailInfo]) -> Self {
        let mut registry = Self::new();
        registry.register(rails);
        registry
    }

    /// Registers additional rails.
    pub fn register(&mut self, rails: &[RailInfo]) {
        for rail in rails {
            self.rails.insert(rail.network_id(), *rail);
        }
    }

    /// Builder-style registration.
    #[must_use]
    pub fn with_rails(mut self, rails: &[RailInfo]) -> Self {
        self.register(rails);
        self
    }

    /// Looks up a rail by its network id.
    #[must_use]
    pub fn by_network(&self, network: &NetworkId) -> Option<&RailInfo> {
        self.rails.get(network)
    }

    /// Returns the number of registered rails.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rails.len()
    }

    /// Returns `true` if no rails are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rails.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEST_RAIL: RailInfo = RailInfo {
        network: "eip155:84532",
        chain_namespace: "eip155",
        chain_reference: "84532",
        asset_namespace: "erc20",
        asset_reference: "0x036CbD53842c5426634e7929541eC2318f3dCF7e",
        decimals: 6,
        currency: "USDC",
    };

    #[test]
    fn test_rail_ids() {
        assert_eq!(TEST_RAIL.network_id().as_str(), "eip155:84532");
        assert_eq!(TEST_RAIL.chain_id().to_string(), "eip155:84532");
        assert_eq!(
            TEST_RAIL.asset_id().to_string(),
            "eip155:84532/erc20:0x036CbD53842c5426634e7929541eC2318f3dCF7e"
        );
    }

    #[test]
    fn test_registry_lookup() {
        let registry = RailRegistry::from_rails(&[TEST_RAIL]);
        assert_eq!(registry.len(), 1);
        let rail = registry.by_network(&NetworkId::new("eip155:84532")).unwrap();
        assert_eq!(rail.decimals, 6);
        assert!(registry.by_network(&NetworkId::new("eip155:8453")).is_none());
    }
}
