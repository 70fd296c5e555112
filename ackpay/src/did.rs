//! Canonical DID handling.
//!
//! Every actor in ACK-Pay is identified by a DID (`did:<method>:<id>`).
//! DIDs embedded in identifiers that themselves contain a reserved colon
//! (e.g. a `hostname:port` pair inside `did:web`) may appear with the colon
//! percent-encoded (`%3A`). The two textual encodings denote the same
//! identifier, so [`Did`] canonicalizes at construction: every lookup path
//! in the system compares canonical forms and never needs to re-try
//! alternate encodings.

use serde::{Deserialize, Deserializer, Serialize, Serializer, de};
use std::fmt;
use std::str::FromStr;

/// A canonicalized DID.
///
/// Construction normalizes percent-encoded colons, so two [`Did`]s compare
/// equal whenever they denote the same identifier regardless of the textual
/// encoding they arrived in.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Did(String);

/// Error returned when parsing a string that is not a DID.
#[derive(Debug, thiserror::Error)]
#[error("Invalid DID: {0}")]
pub struct DidParseError(String);

/// Decodes percent-encoded colons (`%3A` / `%3a`) back to `:`.
///
/// This is the single canonicalization applied at every boundary. It is
/// idempotent: once no `%3A` sequence remains, further application is a
/// no-op.
#[must_use]
pub fn canonicalize(s: &str) -> String {
    s.replace("%3A", ":").replace("%3a", ":")
}

impl Did {
    /// Parses and canonicalizes a DID string.
    ///
    /// # Errors
    ///
    /// Returns [`DidParseError`] if the string does not have the
    /// `did:<method>:<method-specific-id>` shape.
    pub fn parse(s: &str) -> Result<Self, DidParseError> {
        let canonical = canonicalize(s);
        let mut parts = canonical.splitn(3, ':');
        match (parts.next(), parts.next(), parts.next()) {
            (Some("did"), Some(method), Some(id)) if !method.is_empty() && !id.is_empty() => {
                Ok(Self(canonical))
            }
            _ => Err(DidParseError(s.to_owned())),
        }
    }

    /// Returns the canonical string form.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns the DID method name (e.g. `pkh` for `did:pkh:...`).
    #[must_use]
    pub fn method(&self) -> &str {
        self.0.split(':').nth(1).unwrap_or_default()
    }

    /// Extracts the `(namespace, chain reference, address)` triple from a
    /// `did:pkh:<namespace>:<reference>:<address>` identifier.
    ///
    /// Returns `None` for any other DID method or shape.
    #[must_use]
    pub fn pkh_parts(&self) -> Option<(&str, &str, &str)> {
        let rest = self.0.strip_prefix("did:pkh:")?;
        let mut parts = rest.splitn(3, ':');
        let namespace = parts.next()?;
        let reference = parts.next()?;
        let address = parts.next()?;
        if namespace.is_empty() || reference.is_empty() || address.is_empty() {
            return None;
        }
        Some((namespace, reference, address))
    }

    /// Returns the account address of an `eip155` `did:pkh` identifier.
    #[must_use]
    pub fn eip155_address(&self) -> Option<&str> {
        match self.pkh_parts() {
            Some(("eip155", _, address)) => Some(address),
            _ => None,
        }
    }

    /// Returns the base58 public key of a `solana` `did:pkh` identifier.
    #[must_use]
    pub fn solana_address(&self) -> Option<&str> {
        match self.pkh_parts() {
            Some(("solana", _, address)) => Some(address),
            _ => None,
        }
    }
}

impl fmt::Display for Did {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Did {
    type Err = DidParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for Did {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for Did {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Self::parse(&s).map_err(de::Error::custom)
    }
}
