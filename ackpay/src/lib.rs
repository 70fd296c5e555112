//! Core types for the ACK-Pay payment settlement protocol.
//!
//! ACK-Pay lets one machine demand payment from another: a server answers an
//! unpaid request with a signed, multi-option payment demand (HTTP 402), the
//! requester settles on one of the offered rails, and a trusted receipt
//! service converts verified settlement proof into a portable signed receipt
//! that downstream services accept instead of a second payment.
//!
//! This crate is rail-agnostic. Chain-specific settlement verification lives
//! in separate crates (`ackpay-evm`, `ackpay-svm`), and the reference ledger
//! service in `ackpay-ledger`.
//!
//! # Modules
//!
//! - [`amount`] - Human-readable currency amount parsing
//! - [`caip`] - CAIP-2 chain ids, CAIP-19 asset ids, and settlement-rail ids
//! - [`did`] - Canonical DID handling and `did:pkh` address extraction
//! - [`identity`] - The identity substrate seam: Ed25519 JWTs and key resolution
//! - [`networks`] - Registry of well-known settlement rails
//! - [`policy`] - Pre-transaction counterparty policy gate
//! - [`processor`] - Off-ledger payment-processor rail
//! - [`receipt`] - Receipt issuance with replay protection, and verification
//! - [`request`] - Payment request and payment option wire types
//! - [`timestamp`] - Unix timestamp type used for expiries
//! - [`token`] - The payment-token protocol (402 challenge, verify, select)
//! - [`verify`] - Settlement verification engine abstractions

pub mod amount;
pub mod caip;
pub mod did;
pub mod identity;
pub mod networks;
pub mod policy;
pub mod processor;
pub mod receipt;
pub mod request;
pub mod timestamp;
pub mod token;
pub mod verify;

pub use caip::{AssetId, ChainId, NetworkId};
pub use did::Did;
pub use request::{PaymentOption, PaymentRequest};
pub use timestamp::UnixTimestamp;
pub use verify::{SettlementVerifier, Verification, VerifierRegistry};
