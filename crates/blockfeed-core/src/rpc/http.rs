use std::num::NonZeroU32;
use std::time::Duration;

use async_trait::async_trait;
use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use reqwest::{header, StatusCode, Url};
use tracing::{debug, info, trace, warn};

use crate::error::{CoreError, RpcError};

use super::endpoint::{parse_url, redact, Authenticator, RpcEndpoint};
use super::protocol::{order_batch_responses, JsonRpcRequest, JsonRpcResponse};
use super::Transport;

type DirectRateLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

// ==============================================================================
// HttpTransport — JSON-RPC over HTTP(S) to a single daemon endpoint
// ==============================================================================

/// One-shot JSON-RPC exchanges with a Bitcoin Core compatible daemon.
///
/// Each [`Transport`] call is a single attempt; retrying is the job of
/// [`RpcClient`](super::RpcClient). Correctness does not depend on the
/// underlying connection surviving between attempts.
pub struct HttpTransport {
    client: reqwest::Client,
    url: Url,
    auth: Authenticator,
    limiter: Option<DirectRateLimiter>,
}

impl HttpTransport {
    /// Create a transport for `endpoint`. The URL must be `http://` or
    /// `https://`, and a cookie file must be readable now.
    ///
    /// With `requests_per_second` set, outbound HTTP requests are
    /// rate-limited (a batch counts as one request).
    pub fn new(endpoint: RpcEndpoint) -> Result<Self, CoreError> {
        let url = parse_url(&endpoint.url)?;
        let auth = Authenticator::new(endpoint.auth)?;

        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(120))
            .tcp_nodelay(true)
            .build()
            .map_err(|e| CoreError::Config(format!("build HTTP client: {e}")))?;

        let limiter = match endpoint.requests_per_second {
            None => None,
            Some(limit) => {
                let limit = NonZeroU32::new(limit).ok_or_else(|| {
                    CoreError::Config("requests_per_second must be at least 1".to_owned())
                })?;
                Some(RateLimiter::direct(Quota::per_second(limit)))
            }
        };

        info!(rpc.url = %redact(&url), "using RPC URL");

        Ok(Self {
            client,
            url,
            auth,
            limiter,
        })
    }

    async fn wait_for_rate_limit(&self) {
        if let Some(limiter) = &self.limiter {
            limiter.until_ready().await;
        }
    }

    async fn post<B: serde::Serialize + ?Sized>(&self, body: &B) -> Result<String, RpcError> {
        self.wait_for_rate_limit().await;

        let builder = self
            .client
            .post(self.url.clone())
            .header(header::CONTENT_TYPE, "application/json")
            .json(body);
        let response = self.auth.apply(builder).send().await?;
        let status = response.status();

        // A restarted daemon has a new cookie; the next attempt uses it.
        if status == StatusCode::UNAUTHORIZED {
            if !self.auth.reload() {
                warn!("daemon rejected rpc credentials");
            }
            return Err(RpcError::Unauthorized);
        }

        // Bitcoin Core answers daemon errors with non-2xx statuses but a
        // JSON-RPC body, so other statuses are logged rather than rejected.
        let body = response.text().await?;
        debug!(%status, body_len = body.len(), "rpc response");
        Ok(body)
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, request: &JsonRpcRequest) -> Result<JsonRpcResponse, RpcError> {
        debug!(
            rpc.id = request.id,
            rpc.method = %request.method,
            rpc.params = request.params.len(),
            "rpc call"
        );
        let body = self.post(request).await?;
        trace!(rpc.id = request.id, rpc.method = %request.method, body = %body, "rpc response body");

        serde_json::from_str(&body).map_err(|e| {
            RpcError::InvalidResponse(format!("decode JSON-RPC response: {e}; body={body}"))
        })
    }

    async fn send_batch(
        &self,
        requests: &[JsonRpcRequest],
    ) -> Result<Vec<JsonRpcResponse>, RpcError> {
        let Some(first) = requests.first() else {
            return Ok(Vec::new());
        };
        debug!(
            rpc.batch_start_id = first.id,
            rpc.method = %first.method,
            rpc.batch_size = requests.len(),
            "rpc batch call"
        );
        let body = self.post(requests).await?;
        trace!(
            rpc.batch_start_id = first.id,
            rpc.batch_size = requests.len(),
            body_len = body.len(),
            "rpc batch response body"
        );

        let decoded: Vec<JsonRpcResponse> = serde_json::from_str(&body).map_err(|e| {
            RpcError::InvalidResponse(format!("decode JSON-RPC batch response: {e}"))
        })?;
        order_batch_responses(requests, decoded)
    }
}
