//! Settlement verification against Solana transaction metadata.

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use solana_client::rpc_config::RpcTransactionConfig;
use solana_commitment_config::CommitmentConfig;
use solana_pubkey::{Pubkey, pubkey};
use solana_signature::Signature;
use solana_transaction::versioned::VersionedTransaction;
use solana_transaction_status_client_types::{
    UiTransactionEncoding, UiTransactionStatusMeta, UiTransactionTokenBalance,
};
use std::str::FromStr;

use ackpay::did::Did;
use ackpay::request::PaymentOption;
use ackpay::verify::{
    Confirmation, RetryPolicy, SettlementClaim, SettlementVerifier, Verification,
    VerificationFailure,
};

use crate::rpc::SolanaRpcLike;

/// The SPL memo program.
pub const MEMO_PROGRAM_ID: Pubkey = pubkey!("MemoSq4gqABAXKb96qnH8TysNcWxMyWCqXgDLGmfcHr");

/// Verifies Solana settlements by inspecting confirmed transactions.
///
/// One verifier instance serves one cluster; the settlement mint is fixed
/// at construction.
pub struct SolanaVerifier<R> {
    rpc: R,
    mint: Pubkey,
    retry: RetryPolicy,
}

impl<R> std::fmt::Debug for SolanaVerifier<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SolanaVerifier")
            .field("mint", &self.mint)
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

impl<R> SolanaVerifier<R>
where
    R: SolanaRpcLike,
{
    /// Creates a verifier for one cluster's settlement mint.
    pub const fn new(rpc: R, mint: Pubkey, retry: RetryPolicy) -> Self {
        Self { rpc, mint, retry }
    }
}

/// Resolves a payment option's recipient to a Solana pubkey.
///
/// The recipient may be a bare base58 key or a `did:pkh:solana` DID.
fn recipient_pubkey(recipient: &str) -> Option<Pubkey> {
    if recipient.starts_with("did:") {
        let did = Did::parse(recipient).ok()?;
        Pubkey::from_str(did.solana_address()?).ok()
    } else {
        Pubkey::from_str(recipient).ok()
    }
}

/// The account keys that authorized a transaction.
fn signer_pubkeys(transaction: &VersionedTransaction) -> &[Pubkey] {
    let keys = transaction.message.static_account_keys();
    let signers = transaction.message.header().num_required_signatures as usize;
    &keys[..signers.min(keys.len())]
}

/// The memo content expected for a settlement of `payment_token`: the
/// lowercase hex SHA-256 of the token, binding the transaction to the
/// demand it pays.
fn expected_memo(payment_token: &str) -> String {
    let digest = Sha256::digest(payment_token.as_bytes());
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

/// Whether any memo instruction in the transaction carries `expected`.
fn memo_matches(transaction: &VersionedTransaction, expected: &str) -> bool {
    let keys = transaction.message.static_account_keys();
    transaction.message.instructions().iter().any(|instruction| {
        instruction.program_id(keys) == &MEMO_PROGRAM_ID
            && std::str::from_utf8(&instruction.data)
                .is_ok_and(|memo| memo.trim().eq_ignore_ascii_case(expected))
    })
}

/// The recipient's balance change of `mint`, in subunits, and the mint
/// precision the cluster reports.
///
/// # Errors
///
/// Returns [`VerificationFailure::RecipientMismatch`] when the transaction
/// left no post-balance entry for the recipient, i.e. it never credited
/// them.
fn recipient_token_delta(
    meta: &UiTransactionStatusMeta,
    mint: &str,
    owner: &str,
) -> Result<(i128, u8), VerificationFailure> {
    fn find(
        balances: &Option<Vec<UiTransactionTokenBalance>>,
        mint: &str,
        owner: &str,
    ) -> Option<u128> {
        balances.as_ref()?.iter().find_map(|balance| {
            let balance_owner: Option<String> = balance.owner.clone().into();
            (balance.mint == mint && balance_owner.as_deref() == Some(owner))
                .then(|| balance.ui_token_amount.amount.parse::<u128>().ok())
                .flatten()
        })
    }

    let pre: Option<Vec<UiTransactionTokenBalance>> = meta.pre_token_balances.clone().into();
    let post: Option<Vec<UiTransactionTokenBalance>> = meta.post_token_balances.clone().into();

    let post_entry = post
        .as_ref()
        .and_then(|balances| {
            balances.iter().find(|balance| {
                let balance_owner: Option<String> = balance.owner.clone().into();
                balance.mint == mint && balance_owner.as_deref() == Some(owner)
            })
        })
        .ok_or(VerificationFailure::RecipientMismatch)?;

    let decimals = post_entry.ui_token_amount.decimals;
    let post_amount = post_entry
        .ui_token_amount
        .amount
        .parse::<u128>()
        .map_err(|_| VerificationFailure::Rail("unparseable token balance".into()))?;
    let pre_amount = find(&pre, mint, owner).unwrap_or(0);

    Ok((post_amount as i128 - pre_amount as i128, decimals))
}

#[async_trait]
impl<R> SettlementVerifier for SolanaVerifier<R>
where
    R: SolanaRpcLike + 'static,
{
    async fn verify(&self, claim: &SettlementClaim, option: &PaymentOption) -> Verification {
        let Some(payer) = claim
            .payer_did
            .solana_address()
            .and_then(|s| Pubkey::from_str(s).ok())
        else {
            return VerificationFailure::MalformedReference(format!(
                "payer DID {} is not a solana did:pkh",
                claim.payer_did
            ))
            .into();
        };

        let Some(recipient) = recipient_pubkey(&option.recipient) else {
            return VerificationFailure::MalformedReference(format!(
                "recipient {} is not a Solana address",
                option.recipient
            ))
            .into();
        };

        let signature = match Signature::from_str(&claim.metadata.tx_ref) {
            Ok(signature) => signature,
            Err(_) => {
                return VerificationFailure::MalformedReference(claim.metadata.tx_ref.clone())
                    .into();
            }
        };

        // The RPC node may not have indexed the transaction yet; poll
        // within the retry budget before declaring a timeout.
        let fetched = self
            .retry
            .run(|| {
                let rpc = &self.rpc;
                async move {
                    let config = RpcTransactionConfig {
                        encoding: Some(UiTransactionEncoding::Base64),
                        commitment: Some(CommitmentConfig::confirmed()),
                        max_supported_transaction_version: Some(0),
                    };
                    rpc.get_transaction_with_config(&signature, config).await.ok()
                }
            })
            .await;
        let Some(fetched) = fetched else {
            tracing::debug!(signature = %signature, "Transaction never appeared");
            return Verification::TimedOut;
        };

        let Some(meta) = fetched.transaction.meta else {
            return VerificationFailure::Rail("transaction meta unavailable".into()).into();
        };
        if meta.err.is_some() {
            return VerificationFailure::TransactionFailed.into();
        }

        let Some(transaction) = fetched.transaction.transaction.decode() else {
            return VerificationFailure::Rail("transaction payload undecodable".into()).into();
        };

        if !signer_pubkeys(&transaction).contains(&payer) {
            return VerificationFailure::PayerMismatch.into();
        }

        if !memo_matches(&transaction, &expected_memo(&claim.payment_token)) {
            return VerificationFailure::MemoMismatch.into();
        }

        let (delta, decimals) = match recipient_token_delta(
            &meta,
            &self.mint.to_string(),
            &recipient.to_string(),
        ) {
            Ok(found) => found,
            Err(failure) => return failure.into(),
        };
        if decimals != option.decimals {
            return VerificationFailure::DecimalsMismatch {
                expected: option.decimals,
                found: decimals,
            }
            .into();
        }
        if delta != i128::from(option.amount) {
            return VerificationFailure::AmountMismatch {
                expected: option.amount,
                found: u64::try_from(delta.max(0)).unwrap_or(u64::MAX),
            }
            .into();
        }

        tracing::info!(signature = %signature, payer = %payer, "Solana settlement confirmed");
        Verification::Confirmed(Confirmation {
            payer: payer.to_string(),
        })
    }
}
