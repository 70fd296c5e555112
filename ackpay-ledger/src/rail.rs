//! The reference ledger as a settlement rail.

use async_trait::async_trait;
use std::sync::Arc;

use ackpay::did::Did;
use ackpay::request::PaymentOption;
use ackpay::verify::{
    Confirmation, RetryPolicy, SettlementClaim, SettlementVerifier, Verification,
    VerificationFailure,
};

use crate::store::LedgerStore;

/// Verifies settlement claims against the ledger's settled-transfer log.
///
/// The log is local, but lookups still run under the bounded retry envelope
/// so a claim racing its own transfer resolves as a retryable timeout
/// instead of a terminal failure.
pub struct LedgerRailVerifier {
    store: Arc<LedgerStore>,
    retry: RetryPolicy,
}

impl std::fmt::Debug for LedgerRailVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LedgerRailVerifier")
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

impl LedgerRailVerifier {
    /// Creates a verifier over the given store.
    #[must_use]
    pub fn new(store: Arc<LedgerStore>, retry: RetryPolicy) -> Self {
        Self { store, retry }
    }
}

#[async_trait]
impl SettlementVerifier for LedgerRailVerifier {
    async fn verify(&self, claim: &SettlementClaim, option: &PaymentOption) -> Verification {
        let Ok(recipient) = Did::parse(&option.recipient) else {
            return VerificationFailure::MalformedReference(format!(
                "recipient {} is not a DID",
                option.recipient
            ))
            .into();
        };

        let settled = self
            .retry
            .run(|| {
                let store = &self.store;
                let payment_id = claim.metadata.tx_ref.clone();
                async move { store.settled(&payment_id) }
            })
            .await;
        let Some(settled) = settled else {
            return Verification::TimedOut;
        };

        if settled.payer != claim.payer_did {
            return VerificationFailure::PayerMismatch.into();
        }
        if settled.recipient != recipient {
            return VerificationFailure::RecipientMismatch.into();
        }
        if settled.amount != option.amount {
            return VerificationFailure::AmountMismatch {
                expected: option.amount,
                found: settled.amount,
            }
            .into();
        }

        Verification::Confirmed(Confirmation {
            payer: settled.payer.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ackpay::caip::{AssetId, NetworkId};
    use ackpay::identity::DidDirectory;
    use ackpay::policy::AgentPolicy;
    use ackpay::verify::ClaimMetadata;
    use std::collections::HashMap;
    use std::str::FromStr;
    use std::time::Duration;

    fn asset() -> AssetId {
        AssetId::from_str("eip155:1/erc20:0xA0b86991c6218b36c1d19D4a2e9Eb0cE3606eB48").unwrap()
    }

    fn seeded() -> (Arc<LedgerStore>, Did, Did) {
        let store = Arc::new(LedgerStore::new(
            asset(),
            6,
            "USDC".to_owned(),
            300,
            "http://localhost:4568/receipts".parse().unwrap(),
            Arc::new(DidDirectory::new()),
        ));
        let payer = Did::parse("did:web:localhost:5678").unwrap();
        let recipient = Did::parse("did:web:localhost:5679").unwrap();
        store.register_account(
            payer.clone(),
            &[1; 32],
            HashMap::from([(asset(), 1_000_000_000u128)]),
            AgentPolicy::default(),
            None,
        );
        store.register_account(
            recipient.clone(),
            &[2; 32],
            HashMap::from([(asset(), 0u128)]),
            AgentPolicy::default(),
            None,
        );
        (store, payer, recipient)
    }

    fn fast_retry() -> RetryPolicy {
        RetryPolicy::new(2, Duration::ZERO)
    }

    fn option_for(recipient: &Did, amount: u64) -> PaymentOption {
        PaymentOption {
            id: crate::store::LEDGER_OPTION_ID.to_owned(),
            network: NetworkId::new(crate::store::LEDGER_NETWORK),
            amount,
            decimals: 6,
            currency: "USDC".to_owned(),
            recipient: recipient.to_string(),
            receipt_service: "http://localhost:4568/receipts".parse().unwrap(),
            payment_service: None,
        }
    }

    #[tokio::test]
    async fn test_confirms_executed_transfer() {
        let (store, payer, recipient) = seeded();
        let demand = store.create_demand(&recipient, 60_000_000).unwrap();
        let executed = store.execute_transfer(&payer, &demand.payment_token).unwrap();

        let verifier = LedgerRailVerifier::new(Arc::clone(&store), fast_retry());
        let verification = verifier
            .verify(&executed.body, &option_for(&recipient, 60_000_000))
            .await;
        assert!(verification.is_confirmed());
    }

    #[tokio::test]
    async fn test_unknown_payment_times_out() {
        let (store, payer, recipient) = seeded();
        let claim = SettlementClaim {
            payment_token: "h.p.s".into(),
            payment_option_id: crate::store::LEDGER_OPTION_ID.into(),
            metadata: ClaimMetadata {
                network: NetworkId::new(crate::store::LEDGER_NETWORK),
                tx_ref: "no-such-payment".into(),
            },
            payer_did: payer,
        };
        let verifier = LedgerRailVerifier::new(store, fast_retry());
        let verification = verifier.verify(&claim, &option_for(&recipient, 1)).await;
        assert!(matches!(verification, Verification::TimedOut));
    }

    #[tokio::test]
    async fn test_amount_mismatch_rejected_exactly() {
        let (store, payer, recipient) = seeded();
        let demand = store.create_demand(&recipient, 60_000_000).unwrap();
        let executed = store.execute_transfer(&payer, &demand.payment_token).unwrap();
        let verifier = LedgerRailVerifier::new(Arc::clone(&store), fast_retry());

        // One subunit off in either direction must be rejected.
        for amount in [59_999_999u64, 60_000_001] {
            let verification = verifier
                .verify(&executed.body, &option_for(&recipient, amount))
                .await;
            assert!(matches!(
                verification,
                Verification::Failed(VerificationFailure::AmountMismatch { .. })
            ));
        }
    }

    #[tokio::test]
    async fn test_payer_mismatch_rejected() {
        let (store, payer, recipient) = seeded();
        let demand = store.create_demand(&recipient, 60_000_000).unwrap();
        let executed = store.execute_transfer(&payer, &demand.payment_token).unwrap();

        let mut forged = executed.body.clone();
        forged.payer_did = Did::parse("did:web:imposter.example").unwrap();

        let verifier = LedgerRailVerifier::new(store, fast_retry());
        let verification = verifier
            .verify(&forged, &option_for(&recipient, 60_000_000))
            .await;
        assert!(matches!(
            verification,
            Verification::Failed(VerificationFailure::PayerMismatch)
        ));
    }
}
