//! The identity substrate seam.
//!
//! Every ACK-Pay payload that crosses a trust boundary travels as a compact
//! three-part EdDSA JWT (`header.payload.signature`, base64url segments).
//! This module provides the `sign(payload) -> token` / `verify(token) ->
//! {issuer, payload}` contract the rest of the protocol is written against.
//!
//! DID-method document construction and resolution are external concerns:
//! callers supply key material through the [`KeyResolver`] trait, and the
//! in-memory [`DidDirectory`] is the reference implementation. Resolution
//! may involve network lookups in production resolvers, so callers must not
//! assume it is cache-free.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD as b64url;
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier};
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub use ed25519_dalek::VerifyingKey;

use crate::did::Did;
use crate::timestamp::UnixTimestamp;

/// An Ed25519 keypair used to sign ACK-Pay tokens.
#[derive(Clone)]
pub struct Keypair {
    signing: SigningKey,
}

impl std::fmt::Debug for Keypair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Keypair")
            .field("public", &self.verifying_key())
            .finish_non_exhaustive()
    }
}

impl Keypair {
    /// Derives a keypair from a 32-byte Ed25519 seed.
    #[must_use]
    pub fn from_seed(seed: &[u8; 32]) -> Self {
        Self {
            signing: SigningKey::from_bytes(seed),
        }
    }

    /// Returns the public verification key.
    #[must_use]
    pub fn verifying_key(&self) -> VerifyingKey {
        self.signing.verifying_key()
    }

    /// Signs a message, returning the raw 64-byte signature.
    #[must_use]
    pub fn sign(&self, message: &[u8]) -> Signature {
        self.signing.sign(message)
    }
}

/// Resolves a DID to its public key material.
///
/// Implementations may consult a remote directory; the reference
/// [`DidDirectory`] is an in-memory map.
pub trait KeyResolver: Send + Sync {
    /// Returns the verification key for `did`, or `None` if unknown.
    fn resolve(&self, did: &Did) -> Option<VerifyingKey>;
}

/// In-memory DID directory mapping DIDs to verification keys.
///
/// Keys are stored under the canonical DID form, so lookups succeed for any
/// textual encoding of the same identifier.
#[derive(Debug, Default)]
pub struct DidDirectory {
    keys: dashmap::DashMap<Did, VerifyingKey>,
}

impl DidDirectory {
    /// Creates an empty directory.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers (or replaces) the key for a DID.
    pub fn register(&self, did: Did, key: VerifyingKey) {
        self.keys.insert(did, key);
    }

    /// Returns the number of registered DIDs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// Returns `true` if no DIDs are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

impl KeyResolver for DidDirectory {
    fn resolve(&self, did: &Did) -> Option<VerifyingKey> {
        self.keys.get(did).map(|entry| *entry.value())
    }
}

impl<T: KeyResolver> KeyResolver for std::sync::Arc<T> {
    fn resolve(&self, did: &Did) -> Option<VerifyingKey> {
        (**self).resolve(did)
    }
}

/// Errors from JWT signing and verification.
#[derive(Debug, thiserror::Error)]
pub enum JwtError {
    /// The token is not a well-formed three-part compact JWT.
    #[error("Malformed token: {0}")]
    Malformed(String),
    /// The signature does not verify against the issuer's key.
    #[error("Invalid signature")]
    InvalidSignature,
    /// The token's `exp` claim is in the past.
    #[error("Expired token")]
    ExpiredToken,
    /// The issuer DID could not be resolved to key material.
    #[error("Unknown issuer: {0}")]
    UnknownIssuer(Did),
    /// Claim serialization failed.
    #[error("Claim serialization: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[derive(Serialize, Deserialize)]
struct JwtHeader {
    typ: String,
    alg: String,
}

/// A verified JWT: the resolved issuer plus the decoded claims.
#[derive(Debug, Clone)]
pub struct VerifiedJwt {
    /// The token's `iss` claim, canonicalized.
    pub issuer: Did,
    /// The decoded JSON payload.
    pub payload: Value,
}

/// Signs `claims` into a compact EdDSA JWT.
///
/// The claims are serialized as-is; callers embed `iss`, `iat`, and `exp`
/// in their claim structs.
///
/// # Errors
///
/// Returns [`JwtError::Serialization`] if the claims cannot be serialized.
pub fn sign_jwt<T: Serialize>(claims: &T, keypair: &Keypair) -> Result<String, JwtError> {
    let header = JwtHeader {
        typ: "JWT".to_owned(),
        alg: "EdDSA".to_owned(),
    };
    let header_b64 = b64url.encode(serde_json::to_vec(&header)?);
    let claims_b64 = b64url.encode(serde_json::to_vec(claims)?);
    let signing_input = format!("{header_b64}.{claims_b64}");
    let signature = keypair.sign(signing_input.as_bytes());
    let signature_b64 = b64url.encode(signature.to_bytes());
    Ok(format!("{signing_input}.{signature_b64}"))
}

/// Verifies a compact EdDSA JWT against the issuer's resolved key.
///
/// Checks, in order: token shape, `EdDSA` algorithm, issuer resolution,
/// signature, and (if present) the `exp` claim against the current time.
///
/// # Errors
///
/// Returns the corresponding [`JwtError`] for each failed check.
pub fn verify_jwt(token: &str, resolver: &dyn KeyResolver) -> Result<VerifiedJwt, JwtError> {
    verify_jwt_at(token, resolver, UnixTimestamp::now())
}

/// [`verify_jwt`] with an explicit clock, for deterministic expiry checks.
///
/// # Errors
///
/// Returns the corresponding [`JwtError`] for each failed check.
pub fn verify_jwt_at(
    token: &str,
    resolver: &dyn KeyResolver,
    now: UnixTimestamp,
) -> Result<VerifiedJwt, JwtError> {
    let mut parts = token.split('.');
    let (header_b64, claims_b64, signature_b64) = match (
        parts.next(),
        parts.next(),
        parts.next(),
        parts.next(),
    ) {
        (Some(h), Some(c), Some(s), None) => (h, c, s),
        _ => return Err(JwtError::Malformed("expected three segments".into())),
    };

    let header_bytes = b64url
        .decode(header_b64)
        .map_err(|e| JwtError::Malformed(e.to_string()))?;
    let header: JwtHeader =
        serde_json::from_slice(&header_bytes).map_err(|e| JwtError::Malformed(e.to_string()))?;
    if header.alg != "EdDSA" {
        return Err(JwtError::Malformed(format!(
            "unsupported algorithm {}",
            header.alg
        )));
    }

    let claims_bytes = b64url
        .decode(claims_b64)
        .map_err(|e| JwtError::Malformed(e.to_string()))?;
    let payload: Value =
        serde_json::from_slice(&claims_bytes).map_err(|e| JwtError::Malformed(e.to_string()))?;

    let issuer = payload
        .get("iss")
        .and_then(Value::as_str)
        .ok_or_else(|| JwtError::Malformed("missing iss claim".into()))
        .and_then(|s| {
            Did::parse(s).map_err(|e| JwtError::Malformed(e.to_string()))
        })?;

    let key = resolver
        .resolve(&issuer)
        .ok_or_else(|| JwtError::UnknownIssuer(issuer.clone()))?;

    let signature_bytes = b64url
        .decode(signature_b64)
        .map_err(|e| JwtError::Malformed(e.to_string()))?;
    let signature =
        Signature::from_slice(&signature_bytes).map_err(|_| JwtError::InvalidSignature)?;
    let signing_input = format!("{header_b64}.{claims_b64}");
    key.verify(signing_input.as_bytes(), &signature)
        .map_err(|_| JwtError::InvalidSignature)?;

    if let Some(exp) = payload.get("exp").and_then(Value::as_u64) {
        if UnixTimestamp::from_secs(exp) < now {
            return Err(JwtError::ExpiredToken);
        }
    }

    Ok(VerifiedJwt { issuer, payload })
}
