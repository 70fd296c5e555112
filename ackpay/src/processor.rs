//! Off-ledger payment-processor rail.
//!
//! For processor rails (card networks and similar), settlement verification
//! is delegated to a trusted out-of-band signal: the processor notifies the
//! receipt service of completed events, and verification checks the claimed
//! event id against that record. This reference implementation keeps the
//! acknowledged-event set in memory; production deployments must
//! independently corroborate the event id against the processor's
//! authoritative record.

use async_trait::async_trait;
use dashmap::DashSet;

use crate::request::PaymentOption;
use crate::verify::{Confirmation, SettlementClaim, SettlementVerifier, Verification};

/// Verifier for an off-ledger processor rail.
///
/// Events arrive out of band via [`ProcessorVerifier::acknowledge`]; a
/// claim for an event that has not (yet) arrived times out rather than
/// failing, since processor notifications are asynchronous.
#[derive(Debug, Default)]
pub struct ProcessorVerifier {
    acknowledged: DashSet<String>,
}

impl ProcessorVerifier {
    /// Creates a verifier with no acknowledged events.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a completed processor event.
    pub fn acknowledge<S: Into<String>>(&self, event_id: S) {
        self.acknowledged.insert(event_id.into());
    }
}

#[async_trait]
impl SettlementVerifier for ProcessorVerifier {
    async fn verify(&self, claim: &SettlementClaim, _option: &PaymentOption) -> Verification {
        if self.acknowledged.contains(&claim.metadata.tx_ref) {
            Verification::Confirmed(Confirmation {
                payer: claim.payer_did.to_string(),
            })
        } else {
            Verification::TimedOut
        }
    }
}
