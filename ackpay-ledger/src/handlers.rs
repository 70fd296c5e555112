//! Axum route handlers for the ledger and receipt service.
//!
//! Endpoints:
//!
//! - `POST /payment-request` — create a payment demand (authenticated)
//! - `POST /payment` — execute a transfer against a demand (authenticated)
//! - `GET /balance` — the caller's per-asset balances (authenticated)
//! - `GET /metadata?did=` — agent directory lookup
//! - `GET /agents` — agent directory listing
//! - `PUT /agents/{did}/policies` — replace an agent's policy
//! - `POST /receipts` — the network-agnostic receipt endpoint
//! - `GET /resource` — pay-gated demo resource (402 challenge / 200 with receipt)
//! - `POST /admin/reset-balances`, `POST /admin/topup` — demo operations
//! - `GET /health`

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;

use ackpay::did::Did;
use ackpay::identity::{DidDirectory, verify_jwt};
use ackpay::policy::AgentPolicy;
use ackpay::receipt::ReceiptIssuer;
use ackpay::receipt::verify_receipt;
use ackpay::token::{PaymentRequired, verify_payment_token};
use ackpay::verify::{SettlementClaim, Verification, VerifierRegistry};

use crate::auth::bearer_token;
use crate::error::ServiceError;
use crate::store::{LEDGER_OPTION_ID, LedgerStore};

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    /// The ledger.
    pub store: Arc<LedgerStore>,
    /// Settlement verifiers, one per configured rail.
    pub registry: Arc<VerifierRegistry>,
    /// The receipt issuer.
    pub issuer: Arc<ReceiptIssuer>,
    /// Full key resolver: accounts, the receipt issuer, and the service.
    pub directory: Arc<DidDirectory>,
    /// The DID behind `GET /resource`. Must be a registered ledger account
    /// so it can be paid.
    pub server_did: Did,
    /// Price of the demo resource, in settlement-asset subunits.
    pub resource_price: u64,
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState").field("server_did", &self.server_did).finish_non_exhaustive()
    }
}

fn authenticate(state: &AppState, headers: &HeaderMap) -> Result<Did, ServiceError> {
    let token = bearer_token(headers).ok_or(ServiceError::MissingAuthorization)?;
    state
        .store
        .authenticate(token)
        .map_err(ServiceError::Unauthorized)
}

/// `GET /health`
async fn get_health() -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

#[derive(Debug, Deserialize)]
struct PaymentRequestBody {
    amount: u64,
}

/// `POST /payment-request` — the caller demands payment to itself.
async fn post_payment_request(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<PaymentRequestBody>,
) -> Result<Json<serde_json::Value>, ServiceError> {
    let recipient = authenticate(&state, &headers)?;
    let demand = state.store.create_demand(&recipient, body.amount)?;
    Ok(Json(json!({
        "demandId": demand.demand_id,
        "paymentToken": demand.payment_token,
    })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PaymentBody {
    payment_token: String,
}

/// `POST /payment` — the caller pays a demand token.
async fn post_payment(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<PaymentBody>,
) -> Result<Json<serde_json::Value>, ServiceError> {
    let payer = authenticate(&state, &headers)?;
    let executed = state.store.execute_transfer(&payer, &body.payment_token)?;
    Ok(Json(json!({
        "paymentId": executed.payment_id,
        "settlementClaim": executed.claim,
    })))
}

/// `GET /balance` — the caller's per-asset balances, in subunits.
async fn get_balance(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<serde_json::Value>, ServiceError> {
    let did = authenticate(&state, &headers)?;
    let balances: serde_json::Map<String, serde_json::Value> = state
        .store
        .balances_of(&did)
        .into_iter()
        .map(|(asset, amount)| (asset.to_string(), json!(amount.to_string())))
        .collect();
    Ok(Json(serde_json::Value::Object(balances)))
}

#[derive(Debug, Deserialize)]
struct MetadataQuery {
    did: String,
}

/// `GET /metadata?did=` — directory lookup for policy enforcement.
async fn get_metadata(
    State(state): State<AppState>,
    Query(query): Query<MetadataQuery>,
) -> Result<Json<serde_json::Value>, ServiceError> {
    let did = Did::parse(&query.did).map_err(|e| ServiceError::BadRequest(e.to_string()))?;
    let metadata = state.store.metadata(&did).ok_or(ServiceError::AgentNotFound)?;
    Ok(Json(serde_json::to_value(metadata).map_err(|e| {
        ServiceError::BadRequest(e.to_string())
    })?))
}

/// `GET /agents` — every registered agent, for policy management.
async fn get_agents(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!(state.store.all_agents()))
}

/// `PUT /agents/{did}/policies` — replace an agent's policy.
async fn put_agent_policies(
    State(state): State<AppState>,
    Path(did): Path<String>,
    Json(policy): Json<AgentPolicy>,
) -> Result<Json<serde_json::Value>, ServiceError> {
    let did = Did::parse(&did).map_err(|e| ServiceError::BadRequest(e.to_string()))?;
    if !state.store.update_policy(&did, policy) {
        return Err(ServiceError::AgentNotFound);
    }
    Ok(Json(json!({ "success": true })))
}

#[derive(Debug, Deserialize)]
struct ReceiptRequestBody {
    payload: String,
}

/// `POST /receipts` — the network-agnostic receipt endpoint.
///
/// `payload` is a payer-signed JWT whose body is a [`SettlementClaim`]. The
/// claim's payment token is re-verified, the named option is looked up, the
/// rail verifier asserts the settlement, and on confirmation a receipt is
/// minted (consuming the settlement proof).
async fn post_receipts(
    State(state): State<AppState>,
    Json(body): Json<ReceiptRequestBody>,
) -> Result<Json<serde_json::Value>, ServiceError> {
    let resolver = state.directory.as_ref();

    let verified = verify_jwt(&body.payload, resolver)?;
    let claim: SettlementClaim = serde_json::from_value(verified.payload)
        .map_err(|e| ServiceError::BadRequest(format!("invalid settlement claim: {e}")))?;
    if claim.payer_did != verified.issuer {
        return Err(ServiceError::BadRequest(
            "settlement claim signer does not match payerDid".to_owned(),
        ));
    }

    let token = verify_payment_token(&claim.payment_token, resolver)?;
    let option = token
        .request
        .option_by_id(&claim.payment_option_id)
        .ok_or_else(|| {
            ServiceError::BadRequest(format!(
                "payment option {} not present in payment token",
                claim.payment_option_id
            ))
        })?;

    match state.registry.verify(&claim, option).await {
        Verification::Confirmed(confirmation) => {
            let receipt =
                state
                    .issuer
                    .issue(&claim, &token.request, &token.issuer, option, &confirmation)?;
            let details = verify_receipt(
                &receipt,
                resolver,
                std::slice::from_ref(state.issuer.did()),
                &token.issuer,
            )?;
            Ok(Json(json!({
                "receipt": receipt,
                "details": details.claims,
            })))
        }
        Verification::Failed(failure) => Err(ServiceError::Verification(failure)),
        Verification::TimedOut => Err(ServiceError::VerificationTimedOut),
    }
}

/// `GET /resource` — the pay-gated demo resource.
///
/// With a valid receipt for this server's demand, returns the resource;
/// otherwise answers 402 with a fresh payment challenge.
async fn get_resource(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Response, ServiceError> {
    if let Some(receipt) = bearer_token(&headers) {
        let verified = verify_receipt(
            receipt,
            state.directory.as_ref(),
            std::slice::from_ref(state.issuer.did()),
            &state.server_did,
        );
        match verified {
            Ok(receipt) if receipt.claims.payment_option_id == LEDGER_OPTION_ID => {
                return Ok(Json(json!({
                    "report": "premium market data",
                    "payer": receipt.payer,
                }))
                .into_response());
            }
            Ok(_) | Err(_) => {
                // An invalid or mismatched receipt is the same as no
                // receipt: answer with a fresh challenge.
                tracing::debug!("Presented receipt not accepted; issuing challenge");
            }
        }
    }

    let demand = state
        .store
        .create_demand(&state.server_did, state.resource_price)?;
    let challenge = PaymentRequired {
        payment_token: demand.payment_token,
        payment_request: demand.request,
    };
    Ok((StatusCode::PAYMENT_REQUIRED, Json(challenge)).into_response())
}

/// `POST /admin/reset-balances` — demo: restore initial balances.
async fn post_reset_balances(State(state): State<AppState>) -> Json<serde_json::Value> {
    state.store.reset_balances();
    Json(json!({ "success": true }))
}

#[derive(Debug, Deserialize)]
struct TopUpBody {
    did: String,
    amount: u64,
}

/// `POST /admin/topup` — demo: credit one account.
async fn post_topup(
    State(state): State<AppState>,
    Json(body): Json<TopUpBody>,
) -> Result<Json<serde_json::Value>, ServiceError> {
    let did = Did::parse(&body.did).map_err(|e| ServiceError::BadRequest(e.to_string()))?;
    let balance = state.store.top_up(&did, body.amount)?;
    Ok(Json(json!({
        "success": true,
        "balance": balance.to_string(),
    })))
}

/// Builds the service router.
pub fn service_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(get_health))
        .route("/payment-request", post(post_payment_request))
        .route("/payment", post(post_payment))
        .route("/balance", get(get_balance))
        .route("/metadata", get(get_metadata))
        .route("/agents", get(get_agents))
        .route("/agents/{did}/policies", put(put_agent_policies))
        .route("/receipts", post(post_receipts))
        .route("/resource", get(get_resource))
        .route("/admin/reset-balances", post(post_reset_balances))
        .route("/admin/topup", post(post_topup))
        .with_state(state)
}
