//! The payment-token protocol.
//!
//! A payment token is a signed, time-boxed envelope around a
//! [`PaymentRequest`]: the demanding party issues it at challenge time, the
//! payer verifies it before paying, and the receipt issuer verifies it again
//! before minting a receipt. Tokens are never mutated.

use serde::{Deserialize, Serialize};

use crate::caip::NetworkId;
use crate::did::Did;
use crate::identity::{JwtError, Keypair, KeyResolver, sign_jwt, verify_jwt_at};
use crate::request::{PaymentOption, PaymentRequest};
use crate::timestamp::UnixTimestamp;

/// Options recognized when creating a payment challenge.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ChallengeConfig {
    /// Validity window of the demand, in seconds.
    pub ttl_seconds: u64,
}

impl Default for ChallengeConfig {
    fn default() -> Self {
        Self { ttl_seconds: 300 }
    }
}

/// The claims carried by a payment token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentTokenClaims {
    /// The demanding party.
    pub iss: Did,
    /// Issuance time.
    pub iat: UnixTimestamp,
    /// Expiry; tokens presented after this instant are rejected.
    pub exp: UnixTimestamp,
    /// The payment request being demanded.
    pub request: PaymentRequest,
}

/// The body of an HTTP 402 challenge.
///
/// Carries the compact token plus a decoded echo of the request so a client
/// can construct a valid payment without decoding the token first.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentRequired {
    /// The signed payment token.
    pub payment_token: String,
    /// Decoded copy of the demanded request.
    pub payment_request: PaymentRequest,
}

/// A successfully verified payment token.
#[derive(Debug, Clone)]
pub struct VerifiedPaymentToken {
    /// The demanded request.
    pub request: PaymentRequest,
    /// The demanding party, resolved and signature-checked.
    pub issuer: Did,
}

/// Errors from payment-token verification and option selection.
#[derive(Debug, thiserror::Error)]
pub enum TokenError {
    /// Signature, expiry, or resolution failure.
    #[error(transparent)]
    Jwt(#[from] JwtError),
    /// The token payload is not a payment-token claim set.
    #[error("Invalid payment token payload: {0}")]
    InvalidPayload(String),
}

/// Error returned when a request offers no option on the asked-for rail.
#[derive(Debug, thiserror::Error)]
#[error("No payment option for network {0}")]
pub struct UnknownNetworkError(pub NetworkId);

/// Signs a payment request into a compact payment token.
///
/// # Errors
///
/// Returns [`JwtError::Serialization`] if the request cannot be serialized.
pub fn issue_payment_token(
    request: PaymentRequest,
    issuer: &Did,
    keypair: &Keypair,
    config: &ChallengeConfig,
) -> Result<String, JwtError> {
    let now = UnixTimestamp::now();
    let claims = PaymentTokenClaims {
        iss: issuer.clone(),
        iat: now,
        exp: now + config.ttl_seconds,
        request,
    };
    sign_jwt(&claims, keypair)
}

/// Builds the 402 challenge body for a request.
///
/// # Errors
///
/// Returns [`JwtError::Serialization`] if the request cannot be serialized.
pub fn create_challenge(
    request: PaymentRequest,
    issuer: &Did,
    keypair: &Keypair,
    config: &ChallengeConfig,
) -> Result<PaymentRequired, JwtError> {
    let payment_token = issue_payment_token(request.clone(), issuer, keypair, config)?;
    Ok(PaymentRequired {
        payment_token,
        payment_request: request,
    })
}

/// Verifies a payment token's signature and expiry.
///
/// # Errors
///
/// Returns [`TokenError`] on signature mismatch, expiry, unknown issuer, or
/// a payload that is not a payment-token claim set.
pub fn verify_payment_token(
    token: &str,
    resolver: &dyn KeyResolver,
) -> Result<VerifiedPaymentToken, TokenError> {
    verify_payment_token_at(token, resolver, UnixTimestamp::now())
}

/// [`verify_payment_token`] with an explicit clock.
///
/// # Errors
///
/// Returns [`TokenError`] on signature mismatch, expiry, unknown issuer, or
/// a payload that is not a payment-token claim set.
pub fn verify_payment_token_at(
    token: &str,
    resolver: &dyn KeyResolver,
    now: UnixTimestamp,
) -> Result<VerifiedPaymentToken, TokenError> {
    let verified = verify_jwt_at(token, resolver, now)?;
    let claims: PaymentTokenClaims = serde_json::from_value(verified.payload)
        .map_err(|e| TokenError::InvalidPayload(e.to_string()))?;
    Ok(VerifiedPaymentToken {
        request: claims.request,
        issuer: verified.issuer,
    })
}

/// Selects the payment option settling on `network`.
///
/// Lookup is by exact rail match and fails closed: asking for an
/// unsupported rail yields [`UnknownNetworkError`], never a guess.
///
/// # Errors
///
/// Returns [`UnknownNetworkError`] if no option settles on `network`.
pub fn select_option<'a>(
    request: &'a PaymentRequest,
    network: &NetworkId,
) -> Result<&'a PaymentOption, UnknownNetworkError> {
    request
        .payment_options
        .iter()
        .find(|option| option.network == *network)
        .ok_or_else(|| UnknownNetworkError(network.clone()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::DidDirectory;

    fn fixtures() -> (Did, Keypair, DidDirectory) {
        let keypair = Keypair::from_seed(&[7; 32]);
        let did = Did::parse("did:web:server.example").unwrap();
        let directory = DidDirectory::new();
        directory.register(did.clone(), keypair.verifying_key());
        (did, keypair, directory)
    }

    fn request() -> PaymentRequest {
        PaymentRequest::new(
            vec![
                PaymentOption {
                    id: "usdc-base-sepolia".into(),
                    network: NetworkId::new("eip155:84532"),
                    amount: 40_000,
                    decimals: 6,
                    currency: "USDC".into(),
                    recipient: "0x036CbD53842c5426634e7929541eC2318f3dCF7e".into(),
                    receipt_service: "http://localhost:4568/receipts".parse().unwrap(),
                    payment_service: None,
                },
                PaymentOption {
                    id: "usd-stripe".into(),
                    network: NetworkId::new("stripe"),
                    amount: 25_000,
                    decimals: 2,
                    currency: "USD".into(),
                    recipient: "did:web:server.example".into(),
                    receipt_service: "http://localhost:4568/receipts".parse().unwrap(),
                    payment_service: Some("http://localhost:4569".parse().unwrap()),
                },
            ],
            Some("data access".into()),
        )
        .unwrap()
    }

    #[test]
    fn test_issue_and_verify() {
        let (did, keypair, directory) = fixtures();
        let token = issue_payment_token(
            request(),
            &did,
            &keypair,
            &ChallengeConfig { ttl_seconds: 60 },
        )
        .unwrap();

        let verified = verify_payment_token_at(&token, &directory, UnixTimestamp::now()).unwrap();
        assert_eq!(verified.issuer, did);
        assert_eq!(verified.request.payment_options.len(), 2);
    }

    #[test]
    fn test_expired_token_rejected() {
        let (did, keypair, directory) = fixtures();
        let token = issue_payment_token(
            request(),
            &did,
            &keypair,
            &ChallengeConfig { ttl_seconds: 60 },
        )
        .unwrap();

        let later = UnixTimestamp::now() + 61;
        let err = verify_payment_token_at(&token, &directory, later).unwrap_err();
        assert!(matches!(err, TokenError::Jwt(JwtError::ExpiredToken)));
    }

    #[test]
    fn test_select_option_exact_match() {
        let request = request();
        let option = select_option(&request, &NetworkId::new("stripe")).unwrap();
        assert_eq!(option.id, "usd-stripe");
    }

    #[test]
    fn test_select_option_fails_closed() {
        let request = request();
        // A near-miss rail id must not fuzzy-match.
        let err = select_option(&request, &NetworkId::new("eip155:8453")).unwrap_err();
        assert_eq!(err.0.as_str(), "eip155:8453");
    }

    #[test]
    fn test_challenge_echoes_request() {
        let (did, keypair, _) = fixtures();
        let challenge =
            create_challenge(request(), &did, &keypair, &ChallengeConfig::default()).unwrap();
        assert_eq!(challenge.payment_request.payment_options.len(), 2);
        assert_eq!(challenge.payment_token.split('.').count(), 3);
    }
}
