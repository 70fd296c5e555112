//! Payment request and payment option wire types.

use serde::{Deserialize, Serialize};
use url::Url;

use crate::caip::NetworkId;

/// One alternative way to satisfy a payment request.
///
/// Amounts are always integer subunits of the named currency; the display
/// value is `amount / 10^decimals`. All comparison logic operates on the
/// integer form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentOption {
    /// Identifier of this option, unique within its request.
    pub id: String,
    /// The settlement rail this option settles on.
    pub network: NetworkId,
    /// Amount due, in integer subunits.
    pub amount: u64,
    /// Number of subunit decimals of the currency.
    pub decimals: u8,
    /// Currency symbol (display only, never used for comparison).
    pub currency: String,
    /// Recipient: an on-chain address or a DID, depending on the rail.
    pub recipient: String,
    /// Where to exchange settlement proof for a receipt.
    pub receipt_service: Url,
    /// Off-ledger rails only: where to execute the payment itself.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payment_service: Option<Url>,
}

/// A demand for payment, offering one or more settlement options.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentRequest {
    /// Unique request identifier.
    pub id: String,
    /// The alternatives; at least one, with unique ids.
    pub payment_options: Vec<PaymentOption>,
    /// Optional human-readable description.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Error returned when constructing an invalid payment request.
#[derive(Debug, thiserror::Error)]
pub enum PaymentRequestError {
    /// A request must offer at least one option.
    #[error("Payment request has no payment options")]
    NoOptions,
    /// Option ids must be unique within a request.
    #[error("Duplicate payment option id: {0}")]
    DuplicateOptionId(String),
}

impl PaymentRequest {
    /// Creates a request with a fresh id, validating its invariants.
    ///
    /// # Errors
    ///
    /// Returns [`PaymentRequestError`] if no options are given or option
    /// ids collide.
    pub fn new(
        payment_options: Vec<PaymentOption>,
        description: Option<String>,
    ) -> Result<Self, PaymentRequestError> {
        Self::with_id(uuid::Uuid::new_v4().to_string(), payment_options, description)
    }

    /// Creates a request with a caller-chosen id, validating its invariants.
    ///
    /// # Errors
    ///
    /// Returns [`PaymentRequestError`] if no options are given or option
    /// ids collide.
    pub fn with_id(
        id: String,
        payment_options: Vec<PaymentOption>,
        description: Option<String>,
    ) -> Result<Self, PaymentRequestError> {
        if payment_options.is_empty() {
            return Err(PaymentRequestError::NoOptions);
        }
        let mut seen = std::collections::HashSet::new();
        for option in &payment_options {
            if !seen.insert(option.id.as_str()) {
                return Err(PaymentRequestError::DuplicateOptionId(option.id.clone()));
            }
        }
        Ok(Self {
            id,
            payment_options,
            description,
        })
    }

    /// Looks up an option by its id.
    #[must_use]
    pub fn option_by_id(&self, id: &str) -> Option<&PaymentOption> {
        self.payment_options.iter().find(|o| o.id == id)
    }
}
