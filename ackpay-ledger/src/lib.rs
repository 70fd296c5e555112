//! Reference ledger and receipt service for ACK-Pay.
//!
//! This crate hosts the authoritative in-memory balance store that acts as
//! one settlement rail, the agent directory that exchanges identity
//! metadata for policy enforcement, the network-agnostic receipt endpoint,
//! and a pay-gated demo resource. The server binary wires the EVM, Solana,
//! processor, and ledger rails into one verifier registry.

pub mod auth;
pub mod client;
pub mod config;
pub mod error;
pub mod handlers;
pub mod rail;
pub mod store;

pub use store::{LEDGER_NETWORK, LedgerStore};
