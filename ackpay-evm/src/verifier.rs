//! On-chain settlement verification against an alloy [`Provider`].

use alloy_primitives::{Address, Log, TxHash, U256};
use alloy_provider::Provider;
use alloy_sol_types::{SolEvent, sol};
use async_trait::async_trait;

use ackpay::did::Did;
use ackpay::request::PaymentOption;
use ackpay::verify::{
    Confirmation, RetryPolicy, SettlementClaim, SettlementVerifier, Verification,
    VerificationFailure,
};

sol! {
    /// ERC-20 `Transfer` event.
    #[derive(Debug)]
    event Transfer(address indexed from, address indexed to, uint256 value);
}

/// Verifies EVM settlements by inspecting transaction receipts.
///
/// One verifier instance serves one chain; the settlement asset is fixed at
/// construction so a transfer of some other token on the same chain can
/// never satisfy an option.
pub struct EvmVerifier<P> {
    provider: P,
    asset: Address,
    retry: RetryPolicy,
}

impl<P> std::fmt::Debug for EvmVerifier<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EvmVerifier")
            .field("asset", &self.asset)
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

impl<P> EvmVerifier<P>
where
    P: Provider + Send + Sync,
{
    /// Creates a verifier for one chain's settlement asset.
    pub const fn new(provider: P, asset: Address, retry: RetryPolicy) -> Self {
        Self {
            provider,
            asset,
            retry,
        }
    }
}

/// Resolves a payment option's recipient to an EVM address.
///
/// The recipient may be a bare `0x` address or a `did:pkh:eip155` DID.
fn recipient_address(recipient: &str) -> Option<Address> {
    if recipient.starts_with("did:") {
        let did = Did::parse(recipient).ok()?;
        did.eip155_address()?.parse().ok()
    } else {
        recipient.parse().ok()
    }
}

/// Finds the first `Transfer` event on `asset` paying `recipient`.
fn find_transfer_to(logs: &[Log], asset: Address, recipient: Address) -> Option<Transfer> {
    logs.iter()
        .filter(|log| log.address == asset)
        .filter_map(|log| Transfer::decode_log(log).ok())
        .map(|decoded| decoded.data)
        .find(|transfer| transfer.to == recipient)
}

#[async_trait]
impl<P> SettlementVerifier for EvmVerifier<P>
where
    P: Provider + Send + Sync + 'static,
{
    async fn verify(&self, claim: &SettlementClaim, option: &PaymentOption) -> Verification {
        let Some(payer) = claim
            .payer_did
            .eip155_address()
            .and_then(|s| s.parse::<Address>().ok())
        else {
            return VerificationFailure::MalformedReference(format!(
                "payer DID {} is not an eip155 did:pkh",
                claim.payer_did
            ))
            .into();
        };

        let Some(recipient) = recipient_address(&option.recipient) else {
            return VerificationFailure::MalformedReference(format!(
                "recipient {} is not an EVM address",
                option.recipient
            ))
            .into();
        };

        let tx_hash: TxHash = match claim.metadata.tx_ref.parse() {
            Ok(hash) => hash,
            Err(_) => {
                return VerificationFailure::MalformedReference(claim.metadata.tx_ref.clone())
                    .into();
            }
        };

        // The receipt may not be indexed yet right after broadcast; poll
        // within the retry budget before declaring a timeout.
        let receipt = self
            .retry
            .run(|| {
                let provider = &self.provider;
                async move { provider.get_transaction_receipt(tx_hash).await.ok().flatten() }
            })
            .await;
        let Some(receipt) = receipt else {
            tracing::debug!(tx = %tx_hash, "Transaction receipt never appeared");
            return Verification::TimedOut;
        };

        if !receipt.status() {
            return VerificationFailure::TransactionFailed.into();
        }

        let logs: Vec<Log> = receipt.inner.logs().iter().map(|l| l.inner.clone()).collect();
        let Some(transfer) = find_transfer_to(&logs, self.asset, recipient) else {
            return VerificationFailure::RecipientMismatch.into();
        };

        if transfer.value != U256::from(option.amount) {
            let found = u64::try_from(transfer.value).unwrap_or(u64::MAX);
            return VerificationFailure::AmountMismatch {
                expected: option.amount,
                found,
            }
            .into();
        }

        if transfer.from != payer {
            return VerificationFailure::PayerMismatch.into();
        }

        tracing::info!(tx = %tx_hash, payer = %payer, "EVM settlement confirmed");
        Verification::Confirmed(Confirmation {
            payer: payer.to_string(),
        })
    }
}
