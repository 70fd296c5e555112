//! Error types for the ledger and receipt service.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

use ackpay::identity::JwtError;
use ackpay::receipt::ReceiptError;
use ackpay::token::TokenError;
use ackpay::verify::VerificationFailure;

use crate::store::LedgerError;

/// Errors surfaced by the HTTP layer.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    /// No bearer token was presented on an authenticated route.
    #[error("Missing authorization")]
    MissingAuthorization,
    /// Bearer authentication failed.
    #[error("Unauthorized: {0}")]
    Unauthorized(LedgerError),
    /// A ledger operation failed.
    #[error(transparent)]
    Ledger(LedgerError),
    /// Settlement-claim or payment-token verification failed.
    #[error(transparent)]
    Token(#[from] TokenError),
    /// A signed payload failed verification.
    #[error(transparent)]
    Jwt(#[from] JwtError),
    /// Receipt issuance or verification failed.
    #[error(transparent)]
    Receipt(#[from] ReceiptError),
    /// Settlement verification terminally failed.
    #[error("Verification failed: {0}")]
    Verification(VerificationFailure),
    /// Settlement verification exhausted its retry budget; the caller may
    /// retry with the same proof.
    #[error("Verification timed out; retry with the same proof")]
    VerificationTimedOut,
    /// The requested agent is not registered.
    #[error("Agent not found")]
    AgentNotFound,
    /// The request body or parameters are invalid.
    #[error("Invalid request: {0}")]
    BadRequest(String),
}

impl From<LedgerError> for ServiceError {
    fn from(err: LedgerError) -> Self {
        Self::Ledger(err)
    }
}

impl ServiceError {
    fn status(&self) -> StatusCode {
        match self {
            Self::MissingAuthorization | Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::AgentNotFound => StatusCode::NOT_FOUND,
            Self::Receipt(ReceiptError::AlreadyIssued) => StatusCode::CONFLICT,
            Self::VerificationTimedOut => StatusCode::GATEWAY_TIMEOUT,
            Self::Ledger(_)
            | Self::Token(_)
            | Self::Jwt(_)
            | Self::Receipt(_)
            | Self::Verification(_)
            | Self::BadRequest(_) => StatusCode::BAD_REQUEST,
        }
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = self.status();
        let retryable = matches!(self, Self::VerificationTimedOut);
        let body = serde_json::json!({
            "error": self.to_string(),
            "retryable": retryable,
        });
        (status, axum::Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            ServiceError::MissingAuthorization.status(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            ServiceError::Receipt(ReceiptError::AlreadyIssued).status(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            ServiceError::VerificationTimedOut.status(),
            StatusCode::GATEWAY_TIMEOUT
        );
        assert_eq!(
            ServiceError::Ledger(LedgerError::InsufficientBalance).status(),
            StatusCode::BAD_REQUEST
        );
    }
}
