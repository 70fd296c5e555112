//! RPC client abstraction for Solana transaction lookups.

use solana_client::client_error::ClientError;
use solana_client::nonblocking::rpc_client::RpcClient;
use solana_client::rpc_config::RpcTransactionConfig;
use solana_signature::Signature;
use solana_transaction_status_client_types::EncodedConfirmedTransactionWithStatusMeta;
use std::future::Future;

/// The slice of RPC surface settlement verification needs.
///
/// Lets tests substitute canned transaction lookups for a live node.
pub trait SolanaRpcLike: Send + Sync {
    /// Fetches a confirmed transaction by signature.
    fn get_transaction_with_config(
        &self,
        signature: &Signature,
        config: RpcTransactionConfig,
    ) -> impl Future<Output = Result<EncodedConfirmedTransactionWithStatusMeta, ClientError>> + Send;
}

impl<Container: AsRef<RpcClient> + Send + Sync> SolanaRpcLike for Container {
    fn get_transaction_with_config(
        &self,
        signature: &Signature,
        config: RpcTransactionConfig,
    ) -> impl Future<Output = Result<EncodedConfirmedTransactionWithStatusMeta, ClientError>> + Send
    {
        RpcClient::get_transaction_with_config(self.as_ref(), signature, config)
    }
}
