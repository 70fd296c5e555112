//! Solana settlement verification for ACK-Pay.
//!
//! Solana is an account-model rail: instead of decoding transfer
//! instructions, verification inspects the confirmed transaction's token
//! balance deltas. A claim is confirmed when the transaction executed
//! without error, the claimed payer is one of its authorizing signers, the
//! recipient's balance of the configured mint grew by exactly the option's
//! amount at the option's declared precision, and a memo binds the
//! transaction to the payment token being settled.
//!
//! An RPC node may not have indexed a just-submitted transaction, so the
//! lookup polls under the bounded retry policy before reporting a retryable
//! timeout.

pub mod networks;
pub mod rpc;
pub mod verifier;

pub use networks::SOLANA_RAILS;
pub use rpc::SolanaRpcLike;
pub use verifier::SolanaVerifier;
