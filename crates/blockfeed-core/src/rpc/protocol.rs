use std::collections::HashMap;
use std::fmt;

use crate::error::RpcError;

/// Error code Bitcoin Core returns while it is still loading the block index
/// or verifying blocks at startup.
pub const RPC_IN_WARMUP: i64 = -28;

#[derive(Debug, Clone, serde::Serialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: &'static str,
    pub id: u64,
    pub method: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub params: Vec<serde_json::Value>,
}

impl JsonRpcRequest {
    pub fn new(id: u64, method: &str, params: Vec<serde_json::Value>) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            method: method.to_owned(),
            params,
        }
    }
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct JsonRpcResponse {
    #[serde(default)]
    pub id: serde_json::Value,
    pub result: Option<serde_json::Value>,
    pub error: Option<serde_json::Value>,
}

impl JsonRpcResponse {
    /// The daemon-side error carried by this response, if any.
    pub fn daemon_error(&self) -> Option<DaemonError> {
        self.error.as_ref().and_then(DaemonError::from_value)
    }
}

/// Error object reported by the daemon inside an otherwise well-formed
/// response.
///
/// JSON-RPC defines errors as `{"code": <int>, "message": <string>}`, but the
/// retry policy only depends on `code`, so both fields are read leniently.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DaemonError {
    pub code: Option<i64>,
    pub message: String,
}

impl DaemonError {
    pub fn from_value(err: &serde_json::Value) -> Option<Self> {
        if err.is_null() {
            return None;
        }
        let code = err.get("code").and_then(serde_json::Value::as_i64);
        let message = match err.get("message").and_then(serde_json::Value::as_str) {
            Some(message) => message.to_owned(),
            None => err.to_string(),
        };
        Some(Self { code, message })
    }

    pub fn is_warmup(&self) -> bool {
        self.code == Some(RPC_IN_WARMUP)
    }
}

impl fmt::Display for DaemonError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.code {
            Some(code) => write!(f, "{} (code {code})", self.message),
            None => f.write_str(&self.message),
        }
    }
}

pub(crate) fn parse_batch_id(id: &serde_json::Value) -> Result<u64, RpcError> {
    if let Some(n) = id.as_u64() {
        return Ok(n);
    }

    if let Some(s) = id.as_str() {
        return s.parse::<u64>().map_err(|e| {
            RpcError::InvalidResponse(format!("invalid batch response id string: {e}"))
        });
    }

    Err(RpcError::InvalidResponse(format!(
        "invalid batch response id: {id}"
    )))
}

/// Match batch responses back to their requests by id.
///
/// Daemons may answer a batch in any order; callers rely on the output
/// lining up index-for-index with `requests`.
pub(crate) fn order_batch_responses(
    requests: &[JsonRpcRequest],
    responses: Vec<JsonRpcResponse>,
) -> Result<Vec<JsonRpcResponse>, RpcError> {
    let mut by_id: HashMap<u64, JsonRpcResponse> = HashMap::with_capacity(responses.len());
    for item in responses {
        let id = parse_batch_id(&item.id)?;
        by_id.insert(id, item);
    }

    requests
        .iter()
        .map(|request| {
            by_id
                .remove(&request.id)
                .ok_or(RpcError::MissingBatchItem { id: request.id })
        })
        .collect()
}
