#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("invalid configuration: {0}")]
    Config(String),
}

/// Failure of a single JSON-RPC exchange with the daemon.
///
/// Everything except [`RpcError::Shutdown`] is absorbed by the retry layer in
/// [`crate::rpc::RpcClient`]; callers of the client only ever observe
/// `Shutdown`, and only after the shutdown signal has fired.
#[derive(Debug, thiserror::Error)]
pub enum RpcError {
    #[error("HTTP transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("invalid JSON-RPC response: {0}")]
    InvalidResponse(String),

    #[error("missing JSON-RPC batch item id={id}")]
    MissingBatchItem { id: u64 },

    #[error("daemon rejected rpc credentials")]
    Unauthorized,

    #[error("shutdown requested")]
    Shutdown,
}
