//! Receipt issuance and verification.
//!
//! A payment receipt is a signed, time-boxed credential asserting that a
//! specific payment was verified. Receipts are coarse-grained bearer
//! capabilities: a relying party that accepts a not-yet-expired receipt
//! grants access without re-verifying settlement, so the replay guard at
//! issuance time is the sole defense against a single payment being turned
//! into two receipts.

use dashmap::DashSet;
use serde::{Deserialize, Serialize};

use crate::did::Did;
use crate::identity::{JwtError, Keypair, KeyResolver, sign_jwt, verify_jwt_at};
use crate::request::{PaymentOption, PaymentRequest};
use crate::timestamp::UnixTimestamp;
use crate::verify::{Confirmation, SettlementClaim};

/// The claims carried by a payment receipt credential.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReceiptClaims {
    /// The receipt service that issued this receipt.
    pub iss: Did,
    /// Issuance time.
    pub iat: UnixTimestamp,
    /// Expiry; the receipt is a bearer capability until this instant.
    pub exp: UnixTimestamp,
    /// The verified payer.
    pub payer_did: Did,
    /// The payment option that was settled.
    pub payment_option_id: String,
    /// The payment request the option belongs to.
    pub payment_request_id: String,
    /// The party that issued the original payment request.
    pub request_issuer: Did,
}

/// Errors from receipt issuance and verification.
#[derive(Debug, thiserror::Error)]
pub enum ReceiptError {
    /// The settlement proof was already exchanged for a receipt.
    #[error("Receipt already issued for this settlement")]
    AlreadyIssued,
    /// The receipt's issuer is not on the relying party's trust list.
    #[error("Untrusted receipt issuer: {0}")]
    UntrustedIssuer(Did),
    /// The receipt is bound to a different request issuer.
    #[error("Receipt request issuer does not match")]
    RequestIssuerMismatch,
    /// Signature, expiry, or resolution failure.
    #[error(transparent)]
    Jwt(#[from] JwtError),
    /// The token payload is not a receipt claim set.
    #[error("Invalid receipt payload: {0}")]
    InvalidPayload(String),
}

/// Mints signed payment receipts for confirmed settlements.
///
/// The issuer owns the consumed-proof set: marking a settlement identifier
/// consumed is atomic with respect to concurrent issuance attempts, so a
/// race between two requests for the same settlement yields exactly one
/// receipt.
pub struct ReceiptIssuer {
    did: Did,
    keypair: Keypair,
    ttl_seconds: u64,
    consumed: DashSet<String>,
}

impl std::fmt::Debug for ReceiptIssuer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReceiptIssuer")
            .field("did", &self.did)
            .field("ttl_seconds", &self.ttl_seconds)
            .field("consumed", &self.consumed.len())
            .finish_non_exhaustive()
    }
}

impl ReceiptIssuer {
    /// Creates an issuer signing with its own key.
    #[must_use]
    pub fn new(did: Did, keypair: Keypair, ttl_seconds: u64) -> Self {
        Self {
            did,
            keypair,
            ttl_seconds,
            consumed: DashSet::new(),
        }
    }

    /// The issuer's DID; relying parties put this on their trust list.
    #[must_use]
    pub fn did(&self) -> &Did {
        &self.did
    }

    /// Issues a receipt for a confirmed settlement.
    ///
    /// Requires a [`Confirmation`], which only a settlement verifier
    /// produces, so issuance cannot precede verification. The settlement
    /// identifier is consumed exactly once; repeat or concurrent calls for
    /// the same identifier fail with [`ReceiptError::AlreadyIssued`] and
    /// perform no side effects.
    ///
    /// # Errors
    ///
    /// Returns [`ReceiptError::AlreadyIssued`] on proof reuse, or a
    /// serialization error if the claims cannot be signed.
    pub fn issue(
        &self,
        claim: &SettlementClaim,
        request: &PaymentRequest,
        request_issuer: &Did,
        option: &PaymentOption,
        _confirmation: &Confirmation,
    ) -> Result<String, ReceiptError> {
        let settlement_id = claim.settlement_id();
        // insert is the atomic check-and-mark: false means someone already
        // consumed this settlement.
        if !self.consumed.insert(settlement_id.clone()) {
            return Err(ReceiptError::AlreadyIssued);
        }

        let now = UnixTimestamp::now();
        let claims = ReceiptClaims {
            iss: self.did.clone(),
            iat: now,
            exp: now + self.ttl_seconds,
            payer_did: claim.payer_did.clone(),
            payment_option_id: option.id.clone(),
            payment_request_id: request.id.clone(),
            request_issuer: request_issuer.clone(),
        };
        match sign_jwt(&claims, &self.keypair) {
            Ok(token) => {
                tracing::info!(
                    settlement = %settlement_id,
                    payer = %claim.payer_did,
                    option = %option.id,
                    "Issued payment receipt"
                );
                Ok(token)
            }
            Err(e) => {
                // Signing never reached the wire; release the identifier so
                // the payer can retry with the same proof.
                self.consumed.remove(&settlement_id);
                Err(e.into())
            }
        }
    }
}

/// A receipt that passed every verification check.
#[derive(Debug, Clone)]
pub struct VerifiedReceipt {
    /// The payer the receipt vouches for.
    pub payer: Did,
    /// The full claim set.
    pub claims: ReceiptClaims,
}

/// Verifies a receipt presented by a payer.
///
/// A receipt is never partially trusted: the signature must verify, the
/// issuer must be on `trusted_issuers`, the embedded request issuer must
/// match what the relying server originally issued, and the receipt must
/// not be expired.
///
/// # Errors
///
/// Returns the corresponding [`ReceiptError`] for each failed check.
pub fn verify_receipt(
    receipt: &str,
    resolver: &dyn KeyResolver,
    trusted_issuers: &[Did],
    expected_request_issuer: &Did,
) -> Result<VerifiedReceipt, ReceiptError> {
    verify_receipt_at(
        receipt,
        resolver,
        trusted_issuers,
        expected_request_issuer,
        UnixTimestamp::now(),
    )
}

/// [`verify_receipt`] with an explicit clock.
///
/// # Errors
///
/// Returns the corresponding [`ReceiptError`] for each failed check.
pub fn verify_receipt_at(
    receipt: &str,
    resolver: &dyn KeyResolver,
    trusted_issuers: &[Did],
    expected_request_issuer: &Did,
    now: UnixTimestamp,
) -> Result<VerifiedReceipt, ReceiptError> {
    let verified = verify_jwt_at(receipt, resolver, now)?;
    let claims: ReceiptClaims = serde_json::from_value(verified.payload)
        .map_err(|e| ReceiptError::InvalidPayload(e.to_string()))?;

    if !trusted_issuers.contains(&verified.issuer) {
        return Err(ReceiptError::UntrustedIssuer(verified.issuer));
    }
    if claims.request_issuer != *expected_request_issuer {
        return Err(ReceiptError::RequestIssuerMismatch);
    }

    Ok(VerifiedReceipt {
        payer: claims.payer_did.clone(),
        claims,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::caip::NetworkId;
    use crate::identity::DidDirectory;
    use crate::verify::ClaimMetadata;
    use std::sync::Arc;

    fn issuer() -> ReceiptIssuer {
        ReceiptIssuer::new(
            Did::parse("did:web:receipts.example").unwrap(),
            Keypair::from_seed(&[3; 32]),
            3600,
        )
    }

    fn fixtures() -> (SettlementClaim, PaymentRequest, Did, PaymentOption) {
        let option = PaymentOption {
            id: "usdc-base-sepolia".into(),
            network: NetworkId::new("eip155:84532"),
            amount: 40_000,
            decimals: 6,
            currency: "USDC".into(),
            recipient: "0x036CbD53842c5426634e7929541eC2318f3dCF7e".into(),
            receipt_service: "http://localhost:4568/receipts".parse().unwrap(),
            payment_service: None,
        };
        let request = PaymentRequest::with_id(
            "req-1".into(),
            vec![option.clone()],
            None,
        )
        .unwrap();
        let claim = SettlementClaim {
            payment_token: "h.p.s".into(),
            payment_option_id: option.id.clone(),
            metadata: ClaimMetadata {
                network: option.network.clone(),
                tx_ref: "0xdeadbeef".into(),
            },
            payer_did: Did::parse("did:pkh:eip155:84532:0x1111111111111111111111111111111111111111")
                .unwrap(),
        };
        let request_issuer = Did::parse("did:web:server.example").unwrap();
        (claim, request, request_issuer, option)
    }

    fn confirmation(claim: &SettlementClaim) -> Confirmation {
        Confirmation {
            payer: claim.payer_did.to_string(),
        }
    }

    #[test]
    fn test_issue_then_replay_rejected() {
        let issuer = issuer();
        let (claim, request, request_issuer, option) = fixtures();

        let receipt = issuer
            .issue(&claim, &request, &request_issuer, &option, &confirmation(&claim))
            .unwrap();
        assert_eq!(receipt.split('.').count(), 3);

        let err = issuer
            .issue(&claim, &request, &request_issuer, &option, &confirmation(&claim))
            .unwrap_err();
        assert!(matches!(err, ReceiptError::AlreadyIssued));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_concurrent_issuance_yields_exactly_one_receipt() {
        let issuer = Arc::new(issuer());
        let (claim, request, request_issuer, option) = fixtures();

        let mut handles = Vec::new();
        for _ in 0..16 {
            let issuer = Arc::clone(&issuer);
            let claim = claim.clone();
            let request = request.clone();
            let request_issuer = request_issuer.clone();
            let option = option.clone();
            handles.push(tokio::spawn(async move {
                issuer
                    .issue(&claim, &request, &request_issuer, &option, &confirmation(&claim))
                    .is_ok()
            }));
        }

        let mut successes = 0;
        for handle in handles {
            if handle.await.unwrap() {
                successes += 1;
            }
        }
        assert_eq!(successes, 1);
    }

    #[test]
    fn test_verify_receipt_full_chain() {
        let issuer = issuer();
        let (claim, request, request_issuer, option) = fixtures();
        let resolver = DidDirectory::new();
        resolver.register(
            issuer.did().clone(),
            Keypair::from_seed(&[3; 32]).verifying_key(),
        );

        let receipt = issuer
            .issue(&claim, &request, &request_issuer, &option, &confirmation(&claim))
            .unwrap();

        let verified = verify_receipt_at(
            &receipt,
            &resolver,
            &[issuer.did().clone()],
            &request_issuer,
            UnixTimestamp::now(),
        )
        .unwrap();
        assert_eq!(verified.payer, claim.payer_did);
        assert_eq!(verified.claims.payment_option_id, option.id);
        assert_eq!(verified.claims.payment_request_id, "req-1");
    }

    #[test]
    fn test_verify_receipt_rejects_untrusted_issuer() {
        let issuer = issuer();
        let (claim, request, request_issuer, option) = fixtures();
        let resolver = DidDirectory::new();
        resolver.register(
            issuer.did().clone(),
            Keypair::from_seed(&[3; 32]).verifying_key(),
        );

        let receipt = issuer
            .issue(&claim, &request, &request_issuer, &option, &confirmation(&claim))
            .unwrap();

        let other_issuer = Did::parse("did:web:other-receipts.example").unwrap();
        let err = verify_receipt_at(
            &receipt,
            &resolver,
            &[other_issuer],
            &request_issuer,
            UnixTimestamp::now(),
        )
        .unwrap_err();
        assert!(matches!(err, ReceiptError::UntrustedIssuer(_)));
    }

    #[test]
    fn test_verify_receipt_rejects_wrong_request_issuer() {
        let issuer = issuer();
        let (claim, request, request_issuer, option) = fixtures();
        let resolver = DidDirectory::new();
        resolver.register(
            issuer.did().clone(),
            Keypair::from_seed(&[3; 32]).verifying_key(),
        );

        let receipt = issuer
            .issue(&claim, &request, &request_issuer, &option, &confirmation(&claim))
            .unwrap();

        let other_server = Did::parse("did:web:unrelated.example").unwrap();
        let err = verify_receipt_at(
            &receipt,
            &resolver,
            &[issuer.did().clone()],
            &other_server,
            UnixTimestamp::now(),
        )
        .unwrap_err();
        assert!(matches!(err, ReceiptError::RequestIssuerMismatch));
    }

    #[test]
    fn test_verify_receipt_rejects_expired() {
        let issuer = issuer();
        let (claim, request, request_issuer, option) = fixtures();
        let resolver = DidDirectory::new();
        resolver.register(
            issuer.did().clone(),
            Keypair::from_seed(&[3; 32]).verifying_key(),
        );

        let receipt = issuer
            .issue(&claim, &request, &request_issuer, &option, &confirmation(&claim))
            .unwrap();

        let past_expiry = UnixTimestamp::now() + 3601;
        let err = verify_receipt_at(
            &receipt,
            &resolver,
            &[issuer.did().clone()],
            &request_issuer,
            past_expiry,
        )
        .unwrap_err();
        assert!(matches!(err, ReceiptError::Jwt(JwtError::ExpiredToken)));
    }
}
