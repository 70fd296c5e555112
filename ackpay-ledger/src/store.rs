//! The authoritative in-memory ledger.
//!
//! The store is an explicit object owned by the service instance and
//! injected where needed; there is no process-wide singleton. Per-key state
//! (accounts, pending demands, settled transfers) lives in concurrent maps
//! whose single-key operations are atomic; the two-sided balance mutation
//! runs under one lock so a balance check and the corresponding debit can
//! never observe different balances, and no intermediate
//! debited-but-not-credited state is observable.

use dashmap::DashMap;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use ackpay::caip::{AssetId, NetworkId};
use ackpay::did::Did;
use ackpay::identity::{DidDirectory, JwtError, KeyResolver, Keypair, VerifyingKey, verify_jwt};
use ackpay::policy::{AgentMetadata, AgentPolicy};
use ackpay::request::{PaymentOption, PaymentRequest};
use ackpay::timestamp::UnixTimestamp;
use ackpay::token::{
    ChallengeConfig, TokenError, issue_payment_token, select_option, verify_payment_token,
};
use ackpay::verify::{ClaimMetadata, SettlementClaim, sign_settlement_claim};
use url::Url;

/// The rail id of the reference ledger.
pub const LEDGER_NETWORK: &str = "ledger";

/// Option id used in ledger payment demands.
pub const LEDGER_OPTION_ID: &str = "ledger-transfer";

/// Validity window of payer-signed settlement claims.
const CLAIM_TTL_SECONDS: u64 = 3600;

/// Errors from ledger operations.
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    /// The DID is not a registered account.
    #[error("Unknown account: {0}")]
    UnknownAccount(Did),
    /// The payer's balance does not cover the demanded amount.
    #[error("Insufficient balance")]
    InsufficientBalance,
    /// The payment demand expired before the transfer executed.
    #[error("Payment demand expired")]
    DemandExpired,
    /// The payment demand does not exist (or was already consumed).
    #[error("Unknown payment demand: {0}")]
    UnknownDemand(String),
    /// The demand token does not offer a ledger payment option.
    #[error("Demand token has no ledger payment option")]
    NotALedgerDemand,
    /// Demand token verification failed.
    #[error(transparent)]
    Token(TokenError),
    /// Signing failed.
    #[error(transparent)]
    Jwt(#[from] JwtError),
}

impl From<TokenError> for LedgerError {
    fn from(err: TokenError) -> Self {
        match err {
            // An expired demand token and an expired demand are the same
            // condition from the payer's point of view.
            TokenError::Jwt(JwtError::ExpiredToken) => Self::DemandExpired,
            TokenError::Jwt(JwtError::UnknownIssuer(did)) => Self::UnknownAccount(did),
            other => Self::Token(other),
        }
    }
}

/// A demand for payment awaiting a matching transfer.
#[derive(Debug, Clone)]
pub struct PendingDemand {
    /// Demand (and payment request) id.
    pub id: String,
    /// Who gets paid.
    pub recipient: Did,
    /// Amount due, in subunits.
    pub amount: u64,
    /// When the demand lapses.
    pub expires_at: UnixTimestamp,
}

/// An executed transfer, recorded for settlement verification.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SettledTransfer {
    /// The ledger-assigned payment id (the demand id).
    pub payment_id: String,
    /// The debited account.
    pub payer: Did,
    /// The credited account.
    pub recipient: Did,
    /// Transferred subunits.
    pub amount: u64,
    /// The asset that moved.
    pub asset: AssetId,
    /// When the transfer executed.
    pub settled_at: UnixTimestamp,
}

/// A freshly created payment demand.
#[derive(Debug)]
pub struct CreatedDemand {
    /// The demand id.
    pub demand_id: String,
    /// The signed payment token the recipient hands to a payer.
    pub payment_token: String,
    /// Decoded copy of the demanded request.
    pub request: PaymentRequest,
}

/// The result of an executed transfer.
#[derive(Debug)]
pub struct ExecutedTransfer {
    /// The ledger-assigned payment id.
    pub payment_id: String,
    /// The payer-signed settlement claim JWT.
    pub claim: String,
    /// The claim body, for callers that want the decoded form.
    pub body: SettlementClaim,
}

struct AccountEntry {
    keypair: Keypair,
    metadata: AgentMetadata,
    initial_balances: HashMap<AssetId, u128>,
}

/// The in-memory double-entry balance store and agent directory.
pub struct LedgerStore {
    asset: AssetId,
    decimals: u8,
    currency: String,
    demand_ttl_seconds: u64,
    receipt_service: Url,
    accounts: DashMap<Did, AccountEntry>,
    balances: Mutex<HashMap<Did, HashMap<AssetId, u128>>>,
    demands: DashMap<String, PendingDemand>,
    settled: DashMap<String, SettledTransfer>,
    directory: Arc<DidDirectory>,
}

impl std::fmt::Debug for LedgerStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LedgerStore")
            .field("asset", &self.asset)
            .field("accounts", &self.accounts.len())
            .field("demands", &self.demands.len())
            .field("settled", &self.settled.len())
            .finish_non_exhaustive()
    }
}

impl LedgerStore {
    /// Creates an empty ledger settling `asset`.
    ///
    /// Registered account keys are also published into `directory` so
    /// receipt-service flows can resolve them.
    #[must_use]
    pub fn new(
        asset: AssetId,
        decimals: u8,
        currency: String,
        demand_ttl_seconds: u64,
        receipt_service: Url,
        directory: Arc<DidDirectory>,
    ) -> Self {
        Self {
            asset,
            decimals,
            currency,
            demand_ttl_seconds,
            receipt_service,
            accounts: DashMap::new(),
            balances: Mutex::new(HashMap::new()),
            demands: DashMap::new(),
            settled: DashMap::new(),
            directory,
        }
    }

    /// The asset this ledger settles.
    #[must_use]
    pub fn asset(&self) -> &AssetId {
        &self.asset
    }

    /// Registers (or re-seeds) an account. Idempotent upsert.
    pub fn register_account(
        &self,
        did: Did,
        seed: &[u8; 32],
        initial_balances: HashMap<AssetId, u128>,
        policy: AgentPolicy,
        credential: Option<String>,
    ) {
        let keypair = Keypair::from_seed(seed);
        self.directory.register(did.clone(), keypair.verifying_key());
        self.balances
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(did.clone(), initial_balances.clone());
        tracing::info!(did = %did, "Registered ledger account");
        self.accounts.insert(
            did.clone(),
            AccountEntry {
                keypair,
                metadata: AgentMetadata {
                    did,
                    credential,
                    policy,
                },
                initial_balances,
            },
        );
    }

    /// Authenticates a bearer token: a short-lived self-signed JWT whose
    /// issuer must be a registered account. Unknown issuers fail closed.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::UnknownAccount`] for unregistered issuers and
    /// propagates signature/expiry failures.
    pub fn authenticate(&self, bearer: &str) -> Result<Did, LedgerError> {
        match verify_jwt(bearer, self) {
            Ok(verified) => Ok(verified.issuer),
            Err(JwtError::UnknownIssuer(did)) => Err(LedgerError::UnknownAccount(did)),
            Err(other) => Err(other.into()),
        }
    }

    /// Creates a payment demand: a pending-demand record plus a signed
    /// payment token the recipient hands to a payer.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::UnknownAccount`] if the recipient is not
    /// registered.
    pub fn create_demand(&self, recipient: &Did, amount: u64) -> Result<CreatedDemand, LedgerError> {
        let entry = self
            .accounts
            .get(recipient)
            .ok_or_else(|| LedgerError::UnknownAccount(recipient.clone()))?;

        let demand_id = uuid::Uuid::new_v4().to_string();
        let option = PaymentOption {
            id: LEDGER_OPTION_ID.to_owned(),
            network: NetworkId::new(LEDGER_NETWORK),
            amount,
            decimals: self.decimals,
            currency: self.currency.clone(),
            recipient: recipient.to_string(),
            receipt_service: self.receipt_service.clone(),
            payment_service: None,
        };
        let request = PaymentRequest::with_id(demand_id.clone(), vec![option], None)
            .map_err(|e| LedgerError::Jwt(JwtError::Malformed(e.to_string())))?;

        let payment_token = issue_payment_token(
            request.clone(),
            recipient,
            &entry.keypair,
            &ChallengeConfig {
                ttl_seconds: self.demand_ttl_seconds,
            },
        )?;

        self.demands.insert(
            demand_id.clone(),
            PendingDemand {
                id: demand_id.clone(),
                recipient: recipient.clone(),
                amount,
                expires_at: UnixTimestamp::now() + self.demand_ttl_seconds,
            },
        );
        tracing::info!(demand = %demand_id, recipient = %recipient, amount, "Created payment demand");

        Ok(CreatedDemand {
            demand_id,
            payment_token,
            request,
        })
    }

    /// Executes the transfer a demand token asks for.
    ///
    /// The demand is consumed exactly once: it is atomically removed before
    /// the balance mutation, and re-armed only if the payer's balance turns
    /// out to be insufficient. The debit and credit happen under a single
    /// lock, so either both apply or neither does.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError`] for unknown payers, unknown or expired
    /// demands, and insufficient balances.
    pub fn execute_transfer(
        &self,
        payer: &Did,
        payment_token: &str,
    ) -> Result<ExecutedTransfer, LedgerError> {
        let payer_entry = self
            .accounts
            .get(payer)
            .ok_or_else(|| LedgerError::UnknownAccount(payer.clone()))?;

        let verified = verify_payment_token(payment_token, self)?;
        let option = select_option(&verified.request, &NetworkId::new(LEDGER_NETWORK))
            .map_err(|_| LedgerError::NotALedgerDemand)?;

        // Atomic consumption: whoever removes the demand owns the transfer.
        let (_, demand) = self
            .demands
            .remove(&verified.request.id)
            .ok_or_else(|| LedgerError::UnknownDemand(verified.request.id.clone()))?;

        if demand.expires_at < UnixTimestamp::now() {
            return Err(LedgerError::DemandExpired);
        }

        {
            let mut balances = self.balances.lock().unwrap_or_else(PoisonError::into_inner);
            let payer_balance = balances
                .get(payer)
                .and_then(|assets| assets.get(&self.asset))
                .copied()
                .unwrap_or(0);
            if payer_balance < u128::from(demand.amount) {
                // The demand was not satisfied; put it back so the payer
                // can retry after funding the account.
                self.demands.insert(demand.id.clone(), demand);
                return Err(LedgerError::InsufficientBalance);
            }

            if let Some(assets) = balances.get_mut(payer) {
                assets.insert(self.asset.clone(), payer_balance - u128::from(demand.amount));
            }
            let recipient_assets = balances.entry(demand.recipient.clone()).or_default();
            let recipient_balance = recipient_assets.get(&self.asset).copied().unwrap_or(0);
            recipient_assets.insert(
                self.asset.clone(),
                recipient_balance + u128::from(demand.amount),
            );
        }

        let settled = SettledTransfer {
            payment_id: demand.id.clone(),
            payer: payer.clone(),
            recipient: demand.recipient.clone(),
            amount: demand.amount,
            asset: self.asset.clone(),
            settled_at: UnixTimestamp::now(),
        };
        self.settled.insert(demand.id.clone(), settled);
        tracing::info!(
            payment = %demand.id,
            payer = %payer,
            recipient = %demand.recipient,
            amount = demand.amount,
            "Executed ledger transfer"
        );

        let body = SettlementClaim {
            payment_token: payment_token.to_owned(),
            payment_option_id: option.id.clone(),
            metadata: ClaimMetadata {
                network: NetworkId::new(LEDGER_NETWORK),
                tx_ref: demand.id.clone(),
            },
            payer_did: payer.clone(),
        };
        let claim = sign_settlement_claim(&body, &payer_entry.keypair, CLAIM_TTL_SECONDS)?;

        Ok(ExecutedTransfer {
            payment_id: demand.id,
            claim,
            body,
        })
    }

    /// The caller's per-asset balances.
    #[must_use]
    pub fn balances_of(&self, did: &Did) -> HashMap<AssetId, u128> {
        self.balances
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(did)
            .cloned()
            .unwrap_or_default()
    }

    /// Looks up a settled transfer by payment id.
    #[must_use]
    pub fn settled(&self, payment_id: &str) -> Option<SettledTransfer> {
        self.settled.get(payment_id).map(|entry| entry.value().clone())
    }

    /// Directory lookup: an agent's metadata.
    #[must_use]
    pub fn metadata(&self, did: &Did) -> Option<AgentMetadata> {
        self.accounts.get(did).map(|entry| entry.metadata.clone())
    }

    /// Directory listing: every registered agent's metadata.
    #[must_use]
    pub fn all_agents(&self) -> Vec<AgentMetadata> {
        self.accounts
            .iter()
            .map(|entry| entry.metadata.clone())
            .collect()
    }

    /// Replaces an agent's policy. Returns `false` for unknown agents.
    pub fn update_policy(&self, did: &Did, policy: AgentPolicy) -> bool {
        match self.accounts.get_mut(did) {
            Some(mut entry) => {
                entry.metadata.policy = policy;
                tracing::info!(did = %did, "Updated agent policy");
                true
            }
            None => false,
        }
    }

    /// Demo operation: reinitializes every account to its registered
    /// starting balances, under the same lock discipline as transfers.
    pub fn reset_balances(&self) {
        let mut balances = self.balances.lock().unwrap_or_else(PoisonError::into_inner);
        for entry in self.accounts.iter() {
            balances.insert(entry.key().clone(), entry.initial_balances.clone());
        }
        tracing::info!("Reset all account balances");
    }

    /// Demo operation: increases one account's settlement-asset balance.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::UnknownAccount`] for unregistered accounts.
    pub fn top_up(&self, did: &Did, amount: u64) -> Result<u128, LedgerError> {
        if !self.accounts.contains_key(did) {
            return Err(LedgerError::UnknownAccount(did.clone()));
        }
        let mut balances = self.balances.lock().unwrap_or_else(PoisonError::into_inner);
        let assets = balances.entry(did.clone()).or_default();
        let next = assets.get(&self.asset).copied().unwrap_or(0) + u128::from(amount);
        assets.insert(self.asset.clone(), next);
        tracing::info!(did = %did, amount, balance = next, "Topped up account");
        Ok(next)
    }

    /// Signing access to a custodial account key (demo custody, as in the
    /// reference platform: the service holds agent keypairs).
    #[must_use]
    pub fn account_keypair(&self, did: &Did) -> Option<Keypair> {
        self.accounts.get(did).map(|entry| entry.keypair.clone())
    }
}

/// Resolution restricted to registered accounts; used for bearer
/// authentication and demand-token verification, both of which must fail
/// closed on unknown DIDs.
impl KeyResolver for LedgerStore {
    fn resolve(&self, did: &Did) -> Option<VerifyingKey> {
        self.accounts.get(did).map(|entry| entry.keypair.verifying_key())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ackpay::identity::sign_jwt;
    use serde_json::json;
    use std::str::FromStr;

    fn test_asset() -> AssetId {
        AssetId::from_str("eip155:1/erc20:0xA0b86991c6218b36c1d19D4a2e9Eb0cE3606eB48").unwrap()
    }

    fn store() -> LedgerStore {
        LedgerStore::new(
            test_asset(),
            6,
            "USDC".to_owned(),
            300,
            "http://localhost:4568/receipts".parse().unwrap(),
            Arc::new(DidDirectory::new()),
        )
    }

    fn seeded_store() -> (LedgerStore, Did, Did) {
        let store = store();
        let payer = Did::parse("did:web:localhost:5678").unwrap();
        let recipient = Did::parse("did:web:localhost:5679").unwrap();
        store.register_account(
            payer.clone(),
            &[1; 32],
            HashMap::from([(test_asset(), 1_000_000_000u128)]),
            AgentPolicy::default(),
            None,
        );
        store.register_account(
            recipient.clone(),
            &[2; 32],
            HashMap::from([(test_asset(), 0u128)]),
            AgentPolicy::default(),
            None,
        );
        (store, payer, recipient)
    }

    fn auth_jwt(store: &LedgerStore, did: &Did) -> String {
        let keypair = store.account_keypair(did).unwrap();
        let now = UnixTimestamp::now();
        sign_jwt(
            &json!({
                "iss": did.as_str(),
                "iat": now.as_secs(),
                "exp": (now + 300).as_secs(),
            }),
            &keypair,
        )
        .unwrap()
    }

    #[test]
    fn test_seeded_transfer_scenario() {
        let (store, payer, recipient) = seeded_store();

        let demand = store.create_demand(&recipient, 60_000_000).unwrap();
        let executed = store.execute_transfer(&payer, &demand.payment_token).unwrap();
        assert_eq!(executed.payment_id, demand.demand_id);
        assert_eq!(executed.body.metadata.tx_ref, demand.demand_id);

        assert_eq!(
            store.balances_of(&payer).get(&test_asset()),
            Some(&940_000_000u128)
        );
        assert_eq!(
            store.balances_of(&recipient).get(&test_asset()),
            Some(&60_000_000u128)
        );

        // The demand is consumed; paying it again must fail, not repeat
        // the transfer.
        let err = store
            .execute_transfer(&payer, &demand.payment_token)
            .unwrap_err();
        assert!(matches!(err, LedgerError::UnknownDemand(_)));
        assert_eq!(
            store.balances_of(&payer).get(&test_asset()),
            Some(&940_000_000u128)
        );
    }

    #[test]
    fn test_insufficient_balance_mutates_nothing_and_rearms_demand() {
        let (store, payer, recipient) = seeded_store();

        let demand = store.create_demand(&recipient, 2_000_000_000).unwrap();
        let err = store
            .execute_transfer(&payer, &demand.payment_token)
            .unwrap_err();
        assert!(matches!(err, LedgerError::InsufficientBalance));

        assert_eq!(
            store.balances_of(&payer).get(&test_asset()),
            Some(&1_000_000_000u128)
        );
        assert_eq!(store.balances_of(&recipient).get(&test_asset()), Some(&0u128));

        // The demand survived the failed attempt; funding the account makes
        // it payable.
        store.top_up(&payer, 1_000_000_000).unwrap();
        assert!(store.execute_transfer(&payer, &demand.payment_token).is_ok());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_concurrent_transfers_conserve_balances() {
        let (store, payer, recipient) = seeded_store();
        let store = Arc::new(store);

        // Payer holds 1_000, demands total 1_600: some must fail, and the
        // payer+recipient sum must be invariant throughout.
        let mut tokens = Vec::new();
        for _ in 0..8 {
            tokens.push(
                store
                    .create_demand(&recipient, 200_000_000)
                    .unwrap()
                    .payment_token,
            );
        }

        let mut handles = Vec::new();
        for token in tokens {
            let store = Arc::clone(&store);
            let payer = payer.clone();
            handles.push(tokio::spawn(async move {
                store.execute_transfer(&payer, &token).is_ok()
            }));
        }
        let mut successes = 0;
        for handle in handles {
            if handle.await.unwrap() {
                successes += 1;
            }
        }

        assert_eq!(successes, 5);
        let payer_balance = store.balances_of(&payer).get(&test_asset()).copied().unwrap();
        let recipient_balance = store
            .balances_of(&recipient)
            .get(&test_asset())
            .copied()
            .unwrap();
        assert_eq!(payer_balance, 0);
        assert_eq!(recipient_balance, 1_000_000_000);
    }

    #[test]
    fn test_authenticate_accepts_registered_account() {
        let (store, payer, _) = seeded_store();
        let jwt = auth_jwt(&store, &payer);
        assert_eq!(store.authenticate(&jwt).unwrap(), payer);
    }

    #[test]
    fn test_authenticate_rejects_unknown_issuer() {
        let (store, _, _) = seeded_store();
        let outsider = Did::parse("did:web:outsider.example").unwrap();
        let keypair = Keypair::from_seed(&[9; 32]);
        let jwt = sign_jwt(
            &json!({ "iss": outsider.as_str(), "exp": 4_000_000_000u64 }),
            &keypair,
        )
        .unwrap();
        let err = store.authenticate(&jwt).unwrap_err();
        assert!(matches!(err, LedgerError::UnknownAccount(_)));
    }

    #[test]
    fn test_authenticate_normalizes_did_encoding() {
        let (store, _, _) = seeded_store();
        // The account was registered with the decoded form; the bearer
        // token carries the percent-encoded one.
        let decoded = Did::parse("did:web:localhost:5678").unwrap();
        let keypair = store.account_keypair(&decoded).unwrap();
        let jwt = sign_jwt(
            &json!({ "iss": "did:web:localhost%3A5678", "exp": 4_000_000_000u64 }),
            &keypair,
        )
        .unwrap();
        assert_eq!(store.authenticate(&jwt).unwrap(), decoded);
    }

    #[test]
    fn test_demand_for_unknown_recipient_fails() {
        let (store, _, _) = seeded_store();
        let ghost = Did::parse("did:web:ghost.example").unwrap();
        let err = store.create_demand(&ghost, 1).unwrap_err();
        assert!(matches!(err, LedgerError::UnknownAccount(_)));
    }

    #[test]
    fn test_reset_restores_initial_balances() {
        let (store, payer, recipient) = seeded_store();
        let demand = store.create_demand(&recipient, 60_000_000).unwrap();
        store.execute_transfer(&payer, &demand.payment_token).unwrap();

        store.reset_balances();
        assert_eq!(
            store.balances_of(&payer).get(&test_asset()),
            Some(&1_000_000_000u128)
        );
        assert_eq!(store.balances_of(&recipient).get(&test_asset()), Some(&0u128));
    }

    #[test]
    fn test_settled_record_for_rail_verification() {
        let (store, payer, recipient) = seeded_store();
        let demand = store.create_demand(&recipient, 60_000_000).unwrap();
        let executed = store.execute_transfer(&payer, &demand.payment_token).unwrap();

        let settled = store.settled(&executed.payment_id).unwrap();
        assert_eq!(settled.payer, payer);
        assert_eq!(settled.recipient, recipient);
        assert_eq!(settled.amount, 60_000_000);
        assert_eq!(settled.asset, test_asset());
    }

    #[test]
    fn test_update_policy() {
        let (store, payer, _) = seeded_store();
        let updated = store.update_policy(
            &payer,
            AgentPolicy {
                max_transaction_size: 5,
                ..AgentPolicy::default()
            },
        );
        assert!(updated);
        assert_eq!(store.metadata(&payer).unwrap().policy.max_transaction_size, 5);

        let ghost = Did::parse("did:web:ghost.example").unwrap();
        assert!(!store.update_policy(&ghost, AgentPolicy::default()));
    }
}
