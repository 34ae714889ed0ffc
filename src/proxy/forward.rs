//! Buffered reverse-proxy forwarding.
//!
//! The request body is collected before the call (bounded by the server's
//! request size limit); the response body is relayed as it arrives.

use axum::body::Body;
use axum::http::{HeaderMap, Method};
use axum::response::Response;
use bytes::Bytes;
use std::net::SocketAddr;
use metrics::counter;
use tracing::{debug, instrument, warn};

use crate::core::error::{GatewayError, GatewayResult};
use crate::proxy::cache::ProxyTarget;
use crate::proxy::headers::{buffered_request_headers, buffered_response_headers};

/// Everything a forwarder needs from the inbound request
#[derive(Debug, Clone)]
pub struct ForwardRequest {
    pub method: Method,
    /// Rewritten path plus the original query string
    pub path_and_query: String,
    /// Inbound headers as received; each forwarder applies its own filtering
    pub headers: HeaderMap,
    pub body: Bytes,
    /// Peer address of the inbound connection, when the server recorded it
    pub client_addr: Option<SocketAddr>,
}

/// Record an upstream failure and turn it into a 502
pub(crate) fn upstream_failure(service: &str, url: &str, err: reqwest::Error) -> GatewayError {
    counter!("gateway_upstream_errors_total", "service" => service.to_string()).increment(1);
    warn!(service = %service, url = %url, error = %err, "Upstream request failed");
    GatewayError::upstream(url, err.to_string())
}

/// Forwards through the target's pooled client
#[derive(Debug, Clone, Default)]
pub struct BufferedForwarder;

impl BufferedForwarder {
    pub fn new() -> Self {
        Self
    }

    #[instrument(skip_all, fields(service = %target.service, method = %request.method))]
    pub async fn forward(
        &self,
        target: &ProxyTarget,
        request: ForwardRequest,
    ) -> GatewayResult<Response> {
        let url = target.upstream_url(&request.path_and_query);
        let headers = buffered_request_headers(
            &request.headers,
            request.client_addr.map(|addr| addr.ip()),
        );

        let upstream = target
            .client
            .request(request.method, &url)
            .headers(headers)
            .body(request.body)
            .send()
            .await
            .map_err(|e| upstream_failure(&target.service, &url, e))?;

        let status = upstream.status();
        debug!(url = %url, status = %status, "Upstream responded");

        let headers = buffered_response_headers(upstream.headers());
        let mut response = Response::new(Body::from_stream(upstream.bytes_stream()));
        *response.status_mut() = status;
        *response.headers_mut() = headers;

        Ok(response)
    }
}
