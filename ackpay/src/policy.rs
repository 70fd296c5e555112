//! Pre-transaction counterparty policy gate.
//!
//! Before committing to a payment, a payer evaluates its own policy against
//! the counterparty's directory metadata. Policy state is mutable and owned
//! by the agent's operator, so callers must fetch it fresh from the
//! authoritative source immediately before each evaluation; a stale cached
//! policy must never authorize a transfer.

use serde::{Deserialize, Serialize};

use crate::did::Did;
use crate::identity::{KeyResolver, verify_jwt};

/// An agent's transaction policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AgentPolicy {
    /// Whether the counterparty must present a credential from a trusted
    /// issuer.
    pub require_trusted_credential: bool,
    /// The accepted credential issuers. With `require_trusted_credential`
    /// set and this list empty, every counterparty is denied.
    pub trusted_credential_issuers: Vec<Did>,
    /// Largest allowed single transaction, in subunits.
    pub max_transaction_size: u64,
    /// Daily cumulative limit, in subunits. Carried for operators that
    /// enforce it out of band; not part of the evaluation order.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub daily_transaction_limit: Option<u64>,
    /// If non-empty, only these counterparties are allowed.
    pub trusted_counterparties: Vec<Did>,
}

impl Default for AgentPolicy {
    fn default() -> Self {
        Self {
            require_trusted_credential: false,
            trusted_credential_issuers: Vec::new(),
            max_transaction_size: u64::MAX,
            daily_transaction_limit: None,
            trusted_counterparties: Vec::new(),
        }
    }
}

/// Directory record for an agent: identity, optional credential, policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentMetadata {
    /// The agent's DID.
    pub did: Did,
    /// A credential JWT attesting to the agent, if it holds one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub credential: Option<String>,
    /// The agent's current policy.
    pub policy: AgentPolicy,
}

/// A policy denial, with the reason the relying agent reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum PolicyViolation {
    /// The counterparty's credential is absent, unverifiable, or issued by
    /// an unaccepted party.
    #[error("missing trusted credential")]
    MissingTrustedCredential,
    /// The transaction exceeds the configured size limit.
    #[error("exceeds transaction limit")]
    ExceedsTransactionLimit,
    /// The counterparty is not on the configured allowlist.
    #[error("not trusted")]
    NotTrusted,
}

/// Evaluates `policy` against a counterparty and transaction amount.
///
/// Checks short-circuit in a fixed order:
///
/// 1. If the policy requires a trusted credential, the counterparty's
///    credential must verify against the resolver's key material and its
///    issuer must be on the accepted-issuer list.
/// 2. `amount` (in subunits) must not exceed `max_transaction_size`.
/// 3. If a non-empty allowlist is configured, the counterparty must be on
///    it.
///
/// # Errors
///
/// Returns the first [`PolicyViolation`] encountered.
pub fn evaluate(
    policy: &AgentPolicy,
    counterparty: &AgentMetadata,
    amount: u64,
    resolver: &dyn KeyResolver,
) -> Result<(), PolicyViolation> {
    if policy.require_trusted_credential && !credential_is_trusted(policy, counterparty, resolver) {
        tracing::debug!(counterparty = %counterparty.did, "Policy denied: credential check");
        return Err(PolicyViolation::MissingTrustedCredential);
    }

    if amount > policy.max_transaction_size {
        tracing::debug!(
            counterparty = %counterparty.did,
            amount,
            limit = policy.max_transaction_size,
            "Policy denied: transaction size"
        );
        return Err(PolicyViolation::ExceedsTransactionLimit);
    }

    if !policy.trusted_counterparties.is_empty()
        && !policy.trusted_counterparties.contains(&counterparty.did)
    {
        tracing::debug!(counterparty = %counterparty.did, "Policy denied: not on allowlist");
        return Err(PolicyViolation::NotTrusted);
    }

    Ok(())
}

/// Whether the counterparty presents a credential signed by an accepted
/// issuer.
fn credential_is_trusted(
    policy: &AgentPolicy,
    counterparty: &AgentMetadata,
    resolver: &dyn KeyResolver,
) -> bool {
    let Some(credential) = counterparty.credential.as_deref() else {
        return false;
    };
    match verify_jwt(credential, resolver) {
        Ok(verified) => policy.trusted_credential_issuers.contains(&verified.issuer),
        Err(_) => false,
    }
}
