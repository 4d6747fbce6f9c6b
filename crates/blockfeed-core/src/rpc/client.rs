use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use bitcoin::BlockHash;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::error::RpcError;
use crate::types::RawBlock;

use super::parsing::{parse_block_count, parse_block_hash, parse_raw_block};
use super::protocol::{DaemonError, JsonRpcRequest, JsonRpcResponse};
use super::retry::{pause, retry_fixed, RetryPolicy};
use super::Transport;

/// Retrying JSON-RPC client.
///
/// Two nested loops absorb every failure:
/// - transport failures are retried after [`RetryPolicy::transport_backoff`];
/// - daemon errors are retried after [`RetryPolicy::warmup_backoff`] when the
///   node reports warm-up, otherwise after [`RetryPolicy::error_backoff`].
///
/// A batch is all-or-nothing: one failed element resends the whole batch.
/// The only error callers can observe is [`RpcError::Shutdown`], once the
/// shutdown token has fired.
pub struct RpcClient<T> {
    transport: T,
    policy: RetryPolicy,
    shutdown: CancellationToken,
    next_id: AtomicU64,
}

impl<T: Transport> RpcClient<T> {
    pub fn new(transport: T, policy: RetryPolicy, shutdown: CancellationToken) -> Self {
        Self {
            transport,
            policy,
            shutdown,
            next_id: AtomicU64::new(initial_request_id()),
        }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn shutdown_token(&self) -> &CancellationToken {
        &self.shutdown
    }

    /// Atomically reserve `count` consecutive request IDs for batch calls.
    fn reserve_request_ids(&self, count: u64) -> u64 {
        self.next_id.fetch_add(count, Ordering::Relaxed)
    }

    // ==========================================================================
    // Generic calls
    // ==========================================================================

    /// Call `method` once and return its `result`.
    pub async fn call(
        &self,
        method: &str,
        params: Vec<serde_json::Value>,
    ) -> Result<serde_json::Value, RpcError> {
        self.call_as(method, params, Ok::<_, String>).await
    }

    /// Call `method` with each parameter list in one batch. Results come back
    /// in the order of `param_lists`.
    pub async fn batch_call(
        &self,
        method: &str,
        param_lists: Vec<Vec<serde_json::Value>>,
    ) -> Result<Vec<serde_json::Value>, RpcError> {
        self.batch_call_as(method, param_lists, Ok::<_, String>)
            .await
    }

    /// Like [`call`](Self::call), decoding the result with `decode`. A result
    /// that fails to decode is retried like a daemon error.
    pub async fn call_as<R, D>(
        &self,
        method: &str,
        params: Vec<serde_json::Value>,
        decode: D,
    ) -> Result<R, RpcError>
    where
        D: Fn(serde_json::Value) -> Result<R, String>,
    {
        let request = JsonRpcRequest::new(self.reserve_request_ids(1), method, params);
        loop {
            let response = retry_fixed(
                &self.shutdown,
                self.policy.transport_backoff,
                || self.transport.send(&request),
                |err| self.log_transport_failure(method, err),
            )
            .await?;

            let errors = match response.daemon_error() {
                Some(err) => vec![err],
                None => match decode(response.result.unwrap_or(serde_json::Value::Null)) {
                    Ok(value) => return Ok(value),
                    Err(message) => vec![DaemonError {
                        code: None,
                        message,
                    }],
                },
            };
            self.back_off(method, &errors).await?;
        }
    }

    /// Like [`batch_call`](Self::batch_call), decoding every result with
    /// `decode`. One undecodable result resends the whole batch.
    pub async fn batch_call_as<R, D>(
        &self,
        method: &str,
        param_lists: Vec<Vec<serde_json::Value>>,
        decode: D,
    ) -> Result<Vec<R>, RpcError>
    where
        D: Fn(serde_json::Value) -> Result<R, String>,
    {
        if param_lists.is_empty() {
            return Ok(Vec::new());
        }

        let start_id = self.reserve_request_ids(param_lists.len() as u64);
        let requests: Vec<JsonRpcRequest> = param_lists
            .into_iter()
            .enumerate()
            .map(|(offset, params)| JsonRpcRequest::new(start_id + offset as u64, method, params))
            .collect();

        loop {
            let responses = retry_fixed(
                &self.shutdown,
                self.policy.transport_backoff,
                || self.transport.send_batch(&requests),
                |err| self.log_transport_failure(method, err),
            )
            .await?;

            let errors: Vec<DaemonError> = responses
                .iter()
                .filter_map(JsonRpcResponse::daemon_error)
                .collect();
            let errors = if errors.is_empty() {
                match responses
                    .into_iter()
                    .map(|response| decode(response.result.unwrap_or(serde_json::Value::Null)))
                    .collect::<Result<Vec<R>, String>>()
                {
                    Ok(results) => return Ok(results),
                    Err(message) => vec![DaemonError {
                        code: None,
                        message,
                    }],
                }
            } else {
                errors
            };
            self.back_off(method, &errors).await?;
        }
    }

    fn log_transport_failure(&self, method: &str, err: &RpcError) {
        error!(rpc.method = method, error = %err, "daemon call failed");
        info!(
            backoff_secs = self.policy.transport_backoff.as_secs_f64(),
            "sleeping and trying again..."
        );
    }

    async fn back_off(&self, method: &str, errors: &[DaemonError]) -> Result<(), RpcError> {
        let delay = self.policy.daemon_backoff(errors);
        if errors.iter().any(DaemonError::is_warmup) {
            warn!(rpc.method = method, "daemon still warming up...");
        } else {
            let joined = errors
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join("; ");
            error!(rpc.method = method, errors = %joined, "daemon returned errors");
        }
        info!(backoff_secs = delay.as_secs_f64(), "sleeping and trying again...");
        pause(&self.shutdown, delay).await
    }

    // ==========================================================================
    // Daemon methods used by the block cache
    // ==========================================================================

    /// Height of the daemon's best chain (`getblockcount`).
    pub async fn get_block_count(&self) -> Result<u64, RpcError> {
        self.call_as("getblockcount", Vec::new(), parse_block_count)
            .await
    }

    /// Hashes of the `count` blocks starting at height `first`
    /// (`getblockhash`, batched).
    pub async fn get_block_hashes(&self, first: u64, count: u64) -> Result<Vec<BlockHash>, RpcError> {
        let param_lists = (first..first + count)
            .map(|height| vec![serde_json::json!(height)])
            .collect();
        self.batch_call_as("getblockhash", param_lists, parse_block_hash)
            .await
    }

    /// Serialized blocks for `hashes`, in the same order (`getblock` with
    /// verbosity `false`, batched).
    pub async fn get_raw_blocks(&self, hashes: &[BlockHash]) -> Result<Vec<RawBlock>, RpcError> {
        let param_lists = hashes
            .iter()
            .map(|hash| vec![serde_json::json!(hash.to_string()), serde_json::json!(false)])
            .collect();
        self.batch_call_as("getblock", param_lists, parse_raw_block)
            .await
    }
}

fn initial_request_id() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(1)
}
