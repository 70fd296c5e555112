//! Settlement verification engine abstractions.
//!
//! Given a settlement claim and the payment option it purports to satisfy,
//! a rail-specific [`SettlementVerifier`] asserts that an observable,
//! finalized event transferred the exact required amount to the exact
//! required recipient from an account controlled by the claimed payer.
//!
//! Each verification attempt moves `Pending -> Confirmed | Failed |
//! TimedOut`. Rails with asynchronous finality poll the underlying record
//! under a bounded [`RetryPolicy`]; if the record never appears the attempt
//! ends in [`Verification::TimedOut`], which is retryable, while a record
//! that appears but violates a check ends in [`Verification::Failed`],
//! which is terminal for that proof.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use crate::caip::NetworkId;
use crate::did::Did;
use crate::request::PaymentOption;

/// Rail-specific reference to a claimed settlement event.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClaimMetadata {
    /// The rail the settlement happened on.
    pub network: NetworkId,
    /// Transaction hash, signature, event id, or ledger payment id.
    pub tx_ref: String,
}

/// The payload of a payer-signed settlement claim.
///
/// This is what a payer submits to a receipt service: the original payment
/// token, the chosen option, the rail-specific event reference, and the
/// payer's own DID. The enclosing JWT is signed by the payer, binding the
/// claim to its author.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettlementClaim {
    /// The payment token this settlement answers.
    pub payment_token: String,
    /// Id of the option that was paid.
    pub payment_option_id: String,
    /// Rail-specific settlement reference.
    pub metadata: ClaimMetadata,
    /// The paying party.
    pub payer_did: Did,
}

impl SettlementClaim {
    /// The unique settlement identifier used by the receipt replay guard.
    #[must_use]
    pub fn settlement_id(&self) -> String {
        format!("{}:{}", self.metadata.network, self.metadata.tx_ref)
    }
}

/// The wire form of a settlement claim: the claim body wrapped in the
/// payer's JWT claims.
#[derive(Debug, Serialize)]
struct SignedClaim<'a> {
    iss: &'a Did,
    iat: crate::timestamp::UnixTimestamp,
    exp: crate::timestamp::UnixTimestamp,
    #[serde(flatten)]
    claim: &'a SettlementClaim,
}

/// Signs a settlement claim with the payer's key.
///
/// The resulting JWT is what a payer submits to a receipt service; its
/// issuer is the claim's `payer_did`, binding the claim to its author.
///
/// # Errors
///
/// Returns a serialization error if the claim cannot be signed.
pub fn sign_settlement_claim(
    claim: &SettlementClaim,
    keypair: &crate::identity::Keypair,
    ttl_seconds: u64,
) -> Result<String, crate::identity::JwtError> {
    let now = crate::timestamp::UnixTimestamp::now();
    crate::identity::sign_jwt(
        &SignedClaim {
            iss: &claim.payer_did,
            iat: now,
            exp: now + ttl_seconds,
            claim,
        },
        keypair,
    )
}

/// Evidence produced by a verifier when all checks pass.
///
/// Receipt issuance requires one of these, so a receipt can only be minted
/// for a claim some verifier actually confirmed.
#[derive(Debug, Clone)]
pub struct Confirmation {
    /// The payer identity as observed on the rail (address or DID).
    pub payer: String,
}

/// Terminal reasons a settlement claim fails verification.
#[derive(Debug, Clone, thiserror::Error)]
pub enum VerificationFailure {
    /// No verifier is registered for the claimed rail.
    #[error("Unknown network: {0}")]
    UnknownNetwork(NetworkId),
    /// The claim's rail does not match the chosen option's rail.
    #[error("Claim network {claimed} does not match option network {expected}")]
    NetworkMismatch {
        /// Rail named in the claim metadata.
        claimed: NetworkId,
        /// Rail of the payment option.
        expected: NetworkId,
    },
    /// The referenced transaction exists but did not execute successfully.
    #[error("Settlement transaction failed")]
    TransactionFailed,
    /// The transferred amount differs from the option's amount.
    #[error("Transferred amount {found} does not equal required amount {expected}")]
    AmountMismatch {
        /// Required subunits.
        expected: u64,
        /// Observed subunits.
        found: u64,
    },
    /// No transfer to the option's recipient was observed.
    #[error("Settlement recipient does not match payment option")]
    RecipientMismatch,
    /// The observed payer is not the claimed payer.
    #[error("Settlement payer does not match claimed payer")]
    PayerMismatch,
    /// The transfer used a different asset than the rail's settlement asset.
    #[error("Settlement asset does not match configured asset")]
    AssetMismatch,
    /// The asset's reported precision differs from the option's.
    #[error("Asset decimals {found} do not equal required decimals {expected}")]
    DecimalsMismatch {
        /// Required decimals.
        expected: u8,
        /// Reported decimals.
        found: u8,
    },
    /// The transaction does not carry the expected payment-token binding.
    #[error("Settlement memo missing or invalid")]
    MemoMismatch,
    /// The settlement reference could not be parsed for this rail.
    #[error("Malformed settlement reference: {0}")]
    MalformedReference(String),
    /// The rail endpoint answered, but with an unexpected error.
    #[error("Rail error: {0}")]
    Rail(String),
}

/// Outcome of one verification attempt.
#[derive(Debug, Clone)]
pub enum Verification {
    /// All checks passed.
    Confirmed(Confirmation),
    /// A check failed; retrying without new proof is pointless.
    Failed(VerificationFailure),
    /// The record never appeared within the retry budget; retryable.
    TimedOut,
}

impl Verification {
    /// Returns `true` for [`Verification::Confirmed`].
    #[must_use]
    pub const fn is_confirmed(&self) -> bool {
        matches!(self, Self::Confirmed(_))
    }
}

impl From<VerificationFailure> for Verification {
    fn from(failure: VerificationFailure) -> Self {
        Self::Failed(failure)
    }
}

/// A rail-specific settlement verifier.
#[async_trait]
pub trait SettlementVerifier: Send + Sync {
    /// Verifies that `claim` satisfies `option` on this rail.
    async fn verify(&self, claim: &SettlementClaim, option: &PaymentOption) -> Verification;
}

/// A bounded retry budget for eventually-consistent settlement lookups.
///
/// This is the only intentionally retried operation in the protocol; every
/// other failure is terminal for the request.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Maximum number of lookups before giving up.
    pub max_attempts: u32,
    /// Fixed delay between lookups.
    pub interval: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            interval: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    /// Creates a policy with the given budget.
    #[must_use]
    pub const fn new(max_attempts: u32, interval: Duration) -> Self {
        Self {
            max_attempts,
            interval,
        }
    }

    /// Runs `lookup` until it yields a value or the budget is exhausted.
    ///
    /// Returns `None` after `max_attempts` lookups; callers translate that
    /// into [`Verification::TimedOut`].
    pub async fn run<T, F, Fut>(&self, mut lookup: F) -> Option<T>
    where
        F: FnMut() -> Fut + Send,
        Fut: Future<Output = Option<T>> + Send,
    {
        for attempt in 0..self.max_attempts {
            if let Some(value) = lookup().await {
                return Some(value);
            }
            if attempt + 1 < self.max_attempts {
                tokio::time::sleep(self.interval).await;
            }
        }
        None
    }
}

/// Routes settlement claims to the verifier registered for their rail.
///
/// Dispatch fails closed: a claim naming a rail with no registered verifier
/// is a terminal [`VerificationFailure::UnknownNetwork`] failure.
#[derive(Default)]
pub struct VerifierRegistry {
    verifiers: HashMap<NetworkId, Arc<dyn SettlementVerifier>>,
}

impl std::fmt::Debug for VerifierRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VerifierRegistry")
            .field("networks", &self.verifiers.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl VerifierRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a verifier for one or more rails.
    pub fn register<I>(&mut self, networks: I, verifier: Arc<dyn SettlementVerifier>)
    where
        I: IntoIterator<Item = NetworkId>,
    {
        for network in networks {
            self.verifiers.insert(network, Arc::clone(&verifier));
        }
    }

    /// Returns the rails with a registered verifier.
    #[must_use]
    pub fn networks(&self) -> Vec<&NetworkId> {
        self.verifiers.keys().collect()
    }

    /// Verifies a claim against the option it names.
    ///
    /// Checks the claim and option agree on the rail, then dispatches to
    /// the registered verifier.
    pub async fn verify(&self, claim: &SettlementClaim, option: &PaymentOption) -> Verification {
        if claim.metadata.network != option.network {
            return VerificationFailure::NetworkMismatch {
                claimed: claim.metadata.network.clone(),
                expected: option.network.clone(),
            }
            .into();
        }
        let Some(verifier) = self.verifiers.get(&claim.metadata.network) else {
            return VerificationFailure::UnknownNetwork(claim.metadata.network.clone()).into();
        };
        verifier.verify(claim, option).await
    }
}
