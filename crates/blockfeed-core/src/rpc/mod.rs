//! Bitcoin Core JSON-RPC access for the block cache.
//!
//! [`Transport`] performs one request/response exchange; [`HttpTransport`]
//! implements it over HTTP. [`RpcClient`] layers the retry policy on top so
//! that callers only ever see successful results (or shutdown).

mod client;
mod endpoint;
mod http;
#[cfg(test)]
pub mod mock;
mod parsing;
pub mod protocol;
pub(crate) mod retry;

pub use client::RpcClient;
pub use endpoint::{RpcAuth, RpcEndpoint};
pub use http::HttpTransport;
pub use protocol::{DaemonError, JsonRpcRequest, JsonRpcResponse, RPC_IN_WARMUP};
pub use retry::RetryPolicy;

use async_trait::async_trait;

use crate::error::RpcError;

/// A single attempt at a JSON-RPC exchange with the daemon.
///
/// Implementations report transport-level failures (connection problems,
/// undecodable bodies, unmatched batch ids) as errors and pass daemon-level
/// errors through untouched inside the response objects.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: &JsonRpcRequest) -> Result<JsonRpcResponse, RpcError>;

    /// Send `requests` as one batch. The returned responses line up
    /// index-for-index with `requests`.
    async fn send_batch(
        &self,
        requests: &[JsonRpcRequest],
    ) -> Result<Vec<JsonRpcResponse>, RpcError>;
}
