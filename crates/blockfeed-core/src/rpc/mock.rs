use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use bitcoin::hex::DisplayHex;
use bitcoin::BlockHash;
use serde_json::json;
use tokio_util::sync::CancellationToken;

use crate::error::RpcError;
use crate::test_util::{height_from_hash, mock_block, mock_block_hash};

use super::protocol::{JsonRpcRequest, JsonRpcResponse};
use super::Transport;

/// Scripted misbehaviour, consumed one per `send`/`send_batch` call.
#[derive(Debug, Clone)]
pub enum Fault {
    /// The exchange fails before any response is decoded.
    Transport,
    /// Response `index` of the call carries a daemon error with `code`.
    DaemonError { index: usize, code: i64 },
    /// Response `index` of the call carries a result of the wrong shape.
    Garbage { index: usize },
}

/// What the mock saw on the wire for one `send`/`send_batch` call.
#[derive(Debug, Clone, PartialEq)]
pub struct Sent {
    pub batch: bool,
    pub requests: Vec<SentRequest>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SentRequest {
    pub id: u64,
    pub method: String,
    pub params: Vec<serde_json::Value>,
}

/// An in-memory daemon for testing. Serves a deterministic chain where the
/// block at height `h` is [`mock_block`]`(h, block_size)`, and answers the
/// three methods the cache uses.
pub struct MockTransport {
    tip: AtomicU64,
    block_size: usize,
    faults: Mutex<VecDeque<Fault>>,
    sent: Mutex<Vec<Sent>>,
    cancel_on: Option<(String, CancellationToken)>,
}

impl MockTransport {
    pub fn builder() -> MockTransportBuilder {
        MockTransportBuilder {
            tip: 100,
            block_size: 80,
            faults: VecDeque::new(),
            cancel_on: None,
        }
    }

    pub fn set_tip(&self, tip: u64) {
        self.tip.store(tip, Ordering::SeqCst);
    }

    pub fn sent(&self) -> Vec<Sent> {
        self.sent.lock().expect("mock lock poisoned").clone()
    }

    /// Methods of every call seen so far; a batch contributes its first
    /// method once.
    pub fn methods(&self) -> Vec<String> {
        self.sent()
            .into_iter()
            .filter_map(|sent| sent.requests.first().map(|r| r.method.clone()))
            .collect()
    }

    fn record(&self, batch: bool, requests: &[JsonRpcRequest]) {
        let requests = requests
            .iter()
            .map(|r| SentRequest {
                id: r.id,
                method: r.method.clone(),
                params: r.params.clone(),
            })
            .collect();
        self.sent
            .lock()
            .expect("mock lock poisoned")
            .push(Sent { batch, requests });
    }

    fn answer(&self, request: &JsonRpcRequest) -> JsonRpcResponse {
        let tip = self.tip.load(Ordering::SeqCst);
        let outcome = match request.method.as_str() {
            "getblockcount" => Ok(json!(tip)),
            "getblockhash" => match request.params.first().and_then(serde_json::Value::as_u64) {
                Some(height) if height <= tip => Ok(json!(mock_block_hash(height).to_string())),
                _ => Err((-8, "Block height out of range")),
            },
            "getblock" => match request
                .params
                .first()
                .and_then(serde_json::Value::as_str)
                .and_then(|s| s.parse::<BlockHash>().ok())
            {
                Some(hash) => {
                    let block = mock_block(height_from_hash(&hash), self.block_size);
                    Ok(json!(block.as_bytes().to_lower_hex_string()))
                }
                None => Err((-5, "Block not found")),
            },
            _ => Err((-32601, "Method not found")),
        };

        match outcome {
            Ok(result) => JsonRpcResponse {
                id: json!(request.id),
                result: Some(result),
                error: None,
            },
            Err((code, message)) => error_response(request.id, code, message),
        }
    }

    fn finish(&self, requests: &[JsonRpcRequest]) -> Result<Vec<JsonRpcResponse>, RpcError> {
        let fault = self.faults.lock().expect("mock lock poisoned").pop_front();
        let mut responses: Vec<JsonRpcResponse> = requests.iter().map(|r| self.answer(r)).collect();

        match fault {
            None => {}
            Some(Fault::Transport) => {
                return Err(RpcError::InvalidResponse("injected transport failure".into()));
            }
            Some(Fault::DaemonError { index, code }) => {
                responses[index] = error_response(requests[index].id, code, "injected");
            }
            Some(Fault::Garbage { index }) => {
                responses[index].result = Some(json!({"unexpected": true}));
            }
        }

        if let Some((method, token)) = &self.cancel_on {
            if requests.iter().any(|r| &r.method == method) {
                token.cancel();
            }
        }
        Ok(responses)
    }
}

fn error_response(id: u64, code: i64, message: &str) -> JsonRpcResponse {
    JsonRpcResponse {
        id: json!(id),
        result: None,
        error: Some(json!({"code": code, "message": message})),
    }
}

pub struct MockTransportBuilder {
    tip: u64,
    block_size: usize,
    faults: VecDeque<Fault>,
    cancel_on: Option<(String, CancellationToken)>,
}

impl MockTransportBuilder {
    pub fn tip(mut self, tip: u64) -> Self {
        self.tip = tip;
        self
    }

    pub fn block_size(mut self, size: usize) -> Self {
        self.block_size = size;
        self
    }

    pub fn fault(mut self, fault: Fault) -> Self {
        self.faults.push_back(fault);
        self
    }

    /// Fire `token` while answering a call to `method`, as if a signal
    /// arrived while that request was in flight.
    pub fn cancel_on(mut self, method: &str, token: CancellationToken) -> Self {
        self.cancel_on = Some((method.to_owned(), token));
        self
    }

    pub fn build(self) -> MockTransport {
        MockTransport {
            tip: AtomicU64::new(self.tip),
            block_size: self.block_size,
            faults: Mutex::new(self.faults),
            sent: Mutex::new(Vec::new()),
            cancel_on: self.cancel_on,
        }
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&self, request: &JsonRpcRequest) -> Result<JsonRpcResponse, RpcError> {
        self.record(false, std::slice::from_ref(request));
        let mut responses = self.finish(std::slice::from_ref(request))?;
        Ok(responses.remove(0))
    }

    async fn send_batch(
        &self,
        requests: &[JsonRpcRequest],
    ) -> Result<Vec<JsonRpcResponse>, RpcError> {
        self.record(true, requests);
        self.finish(requests)
    }
}

#[cfg(test)]
mod tests {
    use bitcoin::hex::FromHex;

    use super::*;
    use crate::test_util::block_height;
    use crate::types::RawBlock;

    #[tokio::test]
    async fn serves_deterministic_chain() {
        let mock = MockTransport::builder().tip(3).block_size(16).build();

        let hash = mock
            .send(&JsonRpcRequest::new(1, "getblockhash", vec![json!(2)]))
            .await
            .expect("hash");
        let hash = hash.result.expect("result");
        assert_eq!(hash, json!(mock_block_hash(2).to_string()));

        let block = mock
            .send(&JsonRpcRequest::new(2, "getblock", vec![hash, json!(false)]))
            .await
            .expect("block");
        let hex = block.result.expect("result");
        let bytes = Vec::<u8>::from_hex(hex.as_str().expect("hex")).expect("decode");
        assert_eq!(block_height(&RawBlock::new(bytes)), 2);
    }

    #[tokio::test]
    async fn height_past_tip_is_out_of_range() {
        let mock = MockTransport::builder().tip(3).build();
        let response = mock
            .send(&JsonRpcRequest::new(1, "getblockhash", vec![json!(4)]))
            .await
            .expect("response");
        assert_eq!(response.daemon_error().and_then(|e| e.code), Some(-8));
    }
}
