//! Directory client for payer-side policy decisions.
//!
//! Policy state is mutable and owned by the agent's operator, so this
//! client fetches it from the directory immediately before every decision;
//! nothing is cached between evaluations.

use url::Url;

use ackpay::did::Did;
use ackpay::identity::KeyResolver;
use ackpay::policy::{AgentMetadata, AgentPolicy, PolicyViolation, evaluate};

/// Errors from directory lookups and policy authorization.
#[derive(Debug, thiserror::Error)]
pub enum DirectoryError {
    /// Transport-level failure talking to the directory.
    #[error(transparent)]
    Http(#[from] reqwest::Error),
    /// The directory does not know the DID.
    #[error("Agent not found in directory: {0}")]
    NotFound(Did),
    /// The policy gate denied the transaction.
    #[error("Policy denied: {0}")]
    Denied(#[from] PolicyViolation),
}

/// HTTP client for the agent directory.
#[derive(Debug, Clone)]
pub struct DirectoryClient {
    base: Url,
    http: reqwest::Client,
}

impl DirectoryClient {
    /// Creates a client for the directory at `base`.
    #[must_use]
    pub fn new(base: Url) -> Self {
        Self {
            base,
            http: reqwest::Client::new(),
        }
    }

    /// Fetches an agent's directory metadata.
    ///
    /// # Errors
    ///
    /// Returns [`DirectoryError::NotFound`] for unknown agents and
    /// propagates transport failures.
    pub async fn metadata(&self, did: &Did) -> Result<AgentMetadata, DirectoryError> {
        let mut url = self.base.clone();
        url.set_path("/metadata");
        let response = self
            .http
            .get(url)
            .query(&[("did", did.as_str())])
            .send()
            .await?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(DirectoryError::NotFound(did.clone()));
        }
        Ok(response.error_for_status()?.json().await?)
    }

    /// Fetches an agent's current policy, fresh from the directory.
    ///
    /// # Errors
    ///
    /// Same failure modes as [`DirectoryClient::metadata`].
    pub async fn fresh_policy(&self, did: &Did) -> Result<AgentPolicy, DirectoryError> {
        Ok(self.metadata(did).await?.policy)
    }

    /// Runs the policy gate for a prospective payment: refetches the
    /// payer's own policy and the counterparty's metadata, then evaluates.
    ///
    /// # Errors
    ///
    /// Returns [`DirectoryError::Denied`] with the structured reason when
    /// the gate denies, lookups failures otherwise.
    pub async fn authorize_payment(
        &self,
        own_did: &Did,
        counterparty: &Did,
        amount: u64,
        resolver: &dyn KeyResolver,
    ) -> Result<(), DirectoryError> {
        let policy = self.fresh_policy(own_did).await?;
        let counterparty = self.metadata(counterparty).await?;
        evaluate(&policy, &counterparty, amount, resolver)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ackpay::identity::DidDirectory;
    use serde_json::json;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn metadata_json(did: &str, max: u64) -> serde_json::Value {
        json!({
            "did": did,
            "policy": {
                "requireTrustedCredential": false,
                "trustedCredentialIssuers": [],
                "maxTransactionSize": max,
                "trustedCounterparties": [],
            },
        })
    }

    #[tokio::test]
    async fn test_metadata_lookup() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/metadata"))
            .and(query_param("did", "did:web:alice.example"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(metadata_json("did:web:alice.example", 7)),
            )
            .mount(&server)
            .await;

        let client = DirectoryClient::new(server.uri().parse().unwrap());
        let did = Did::parse("did:web:alice.example").unwrap();
        let metadata = client.metadata(&did).await.unwrap();
        assert_eq!(metadata.policy.max_transaction_size, 7);
    }

    #[tokio::test]
    async fn test_unknown_agent_is_not_found() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/metadata"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let client = DirectoryClient::new(server.uri().parse().unwrap());
        let did = Did::parse("did:web:ghost.example").unwrap();
        assert!(matches!(
            client.metadata(&did).await.unwrap_err(),
            DirectoryError::NotFound(_)
        ));
    }

    #[tokio::test]
    async fn test_authorize_payment_denies_over_limit() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/metadata"))
            .and(query_param("did", "did:web:payer.example"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(metadata_json("did:web:payer.example", 1_000)),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/metadata"))
            .and(query_param("did", "did:web:merchant.example"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(metadata_json("did:web:merchant.example", 0)),
            )
            .mount(&server)
            .await;

        let client = DirectoryClient::new(server.uri().parse().unwrap());
        let payer = Did::parse("did:web:payer.example").unwrap();
        let merchant = Did::parse("did:web:merchant.example").unwrap();
        let resolver = DidDirectory::new();

        assert!(
            client
                .authorize_payment(&payer, &merchant, 1_000, &resolver)
                .await
                .is_ok()
        );
        let err = client
            .authorize_payment(&payer, &merchant, 1_001, &resolver)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            DirectoryError::Denied(PolicyViolation::ExceedsTransactionLimit)
        ));
    }

    #[tokio::test]
    async fn test_policy_is_refetched_per_decision() {
        let server = MockServer::start().await;
        let payer = Did::parse("did:web:payer.example").unwrap();
        let merchant = Did::parse("did:web:merchant.example").unwrap();

        // First decision sees a permissive policy, second a tightened one;
        // a caching client would wrongly allow both.
        Mock::given(method("GET"))
            .and(path("/metadata"))
            .and(query_param("did", payer.as_str()))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(metadata_json(payer.as_str(), 1_000_000)),
            )
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/metadata"))
            .and(query_param("did", payer.as_str()))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(metadata_json(payer.as_str(), 10)),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/metadata"))
            .and(query_param("did", merchant.as_str()))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(metadata_json(merchant.as_str(), 1_000_000)),
            )
            .mount(&server)
            .await;

        let client = DirectoryClient::new(server.uri().parse().unwrap());
        let resolver = DidDirectory::new();

        assert!(
            client
                .authorize_payment(&payer, &merchant, 500, &resolver)
                .await
                .is_ok()
        );
        let err = client
            .authorize_payment(&payer, &merchant, 500, &resolver)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            DirectoryError::Denied(PolicyViolation::ExceedsTransactionLimit)
        ));
    }
}
