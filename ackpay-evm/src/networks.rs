//! Known EVM settlement rails and USDC deployments.

use ackpay::networks::RailInfo;
use alloy_primitives::{Address, address};

/// USDC contract address on Base Mainnet.
pub const USDC_BASE: Address = address!("833589fCD6eDb6E08f4c7C32D4f71b54bdA02913");

/// USDC contract address on Base Sepolia.
pub const USDC_BASE_SEPOLIA: Address = address!("036CbD53842c5426634e7929541eC2318f3dCF7e");

/// USDC contract address on Ethereum Mainnet.
pub const USDC_ETHEREUM: Address = address!("A0b86991c6218b36c1d19D4a2e9Eb0cE3606eB48");

/// Default token decimals for USDC.
pub const USDC_DECIMALS: u8 = 6;

/// The EVM rails this crate knows out of the box, all settling in USDC.
pub const EVM_RAILS: &[RailInfo] = &[
    RailInfo {
        network: "eip155:8453",
        chain_namespace: "eip155",
        chain_reference: "8453",
        asset_namespace: "erc20",
        asset_reference: "0x833589fCD6eDb6E08f4c7C32D4f71b54bdA02913",
        decimals: USDC_DECIMALS,
        currency: "USDC",
    },
    RailInfo {
        network: "eip155:84532",
        chain_namespace: "eip155",
        chain_reference: "84532",
        asset_namespace: "erc20",
        asset_reference: "0x036CbD53842c5426634e7929541eC2318f3dCF7e",
        decimals: USDC_DECIMALS,
        currency: "USDC",
    },
    RailInfo {
        network: "eip155:1",
        chain_namespace: "eip155",
        chain_reference: "1",
        asset_namespace: "erc20",
        asset_reference: "0xA0b86991c6218b36c1d19D4a2e9Eb0cE3606eB48",
        decimals: USDC_DECIMALS,
        currency: "USDC",
    },
];

/// The settlement-asset contract configured for a known EVM rail.
#[must_use]
pub fn settlement_asset(network: &ackpay::caip::NetworkId) -> Option<Address> {
    EVM_RAILS
        .iter()
        .find(|rail| rail.network == network.as_str())
        .and_then(|rail| rail.asset_reference.parse().ok())
}
