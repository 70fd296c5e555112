//! Known Solana settlement rails and USDC mints.
//!
//! Solana networks are identified by the first 32 characters of their
//! genesis block hash.

use ackpay::networks::RailInfo;
use solana_pubkey::{Pubkey, pubkey};

/// Genesis hash reference of Solana mainnet.
pub const SOLANA_MAINNET: &str = "5eykt4UsFv8P8NJdTREpY1vzqKqZKvdp";

/// Genesis hash reference of Solana devnet.
pub const SOLANA_DEVNET: &str = "EtWTRABZaYq6iMfeYKouRu166VU2xqa1";

/// USDC mint on Solana mainnet.
pub const USDC_MINT_MAINNET: Pubkey = pubkey!("EPjFWdd5AufqSSqeM2qN1xzybapC8G4wEGGkZwyTDt1v");

/// USDC mint on Solana devnet.
pub const USDC_MINT_DEVNET: Pubkey = pubkey!("4zMMC9srt5Ri5X14GAgXhaHii3GnPAEERYPJgZJDncDU");

/// The Solana rails this crate knows out of the box, settling in USDC.
pub const SOLANA_RAILS: &[RailInfo] = &[
    RailInfo {
        network: "solana:5eykt4UsFv8P8NJdTREpY1vzqKqZKvdp",
        chain_namespace: "solana",
        chain_reference: SOLANA_MAINNET,
        asset_namespace: "token",
        asset_reference: "EPjFWdd5AufqSSqeM2qN1xzybapC8G4wEGGkZwyTDt1v",
        decimals: 6,
        currency: "USDC",
    },
    RailInfo {
        network: "solana:EtWTRABZaYq6iMfeYKouRu166VU2xqa1",
        chain_namespace: "solana",
        chain_reference: SOLANA_DEVNET,
        asset_namespace: "token",
        asset_reference: "4zMMC9srt5Ri5X14GAgXhaHii3GnPAEERYPJgZJDncDU",
        decimals: 6,
        currency: "USDC",
    },
];

/// The settlement mint configured for a known Solana rail.
#[must_use]
pub fn settlement_mint(network: &ackpay::caip::NetworkId) -> Option<Pubkey> {
    use std::str::FromStr;
    SOLANA_RAILS
        .iter()
        .find(|rail| rail.network == network.as_str())
        .and_then(|rail| Pubkey::from_str(rail.asset_reference).ok())
}
