//! # Streaming Proxy Module
//!
//! Forwards long-lived incremental responses (token-by-token model output,
//! server-sent events). The backend body is relayed in frames of at most
//! `STREAM_CHUNK_SIZE` bytes and each frame is handed to the HTTP layer as soon
//! as it is read, so the client sees data with minimal added latency.
//!
//! The outbound call has no timeout. When the client goes away the response
//! body is dropped, which drops the upstream byte stream and aborts the
//! backend call.

use axum::body::Body;
use axum::response::Response;
use bytes::Bytes;
use futures::stream::{self, Stream, StreamExt};
use std::fmt::Display;
use std::pin::Pin;
use tracing::{debug, info, instrument};

use crate::core::error::{GatewayError, GatewayResult};
use crate::proxy::cache::ProxyTarget;
use crate::proxy::forward::{upstream_failure, ForwardRequest};
use crate::proxy::headers::{streaming_request_headers, streaming_response_headers};
use crate::routing::Route;

/// Largest body frame written to the client on the streaming path
pub const STREAM_CHUNK_SIZE: usize = 256;

/// Decides which requests take the streaming path
#[derive(Debug, Clone)]
pub struct StreamingPolicy {
    prefixes: Vec<String>,
}

impl StreamingPolicy {
    pub fn new(prefixes: Vec<String>) -> Self {
        Self { prefixes }
    }

    /// A route flagged `streaming`, or a request path under a streaming prefix
    pub fn is_streaming(&self, route: &Route, path: &str) -> bool {
        route.streaming || self.prefixes.iter().any(|p| path.starts_with(p.as_str()))
    }

    pub fn prefixes(&self) -> &[String] {
        &self.prefixes
    }
}

impl Default for StreamingPolicy {
    fn default() -> Self {
        Self::new(vec!["/api/agent".to_string()])
    }
}

struct RechunkState<S> {
    upstream: Pin<Box<S>>,
    pending: Bytes,
    written: usize,
    done: bool,
}

/// Split an upstream byte stream into frames of at most `chunk_size` bytes
///
/// Upstream chunks are never merged, so a short chunk is emitted as soon as it
/// arrives. An upstream error ends the stream without surfacing an error:
/// headers are already committed and the usual cause is a dropped connection.
pub fn rechunk<S, E>(
    upstream: S,
    chunk_size: usize,
) -> impl Stream<Item = Result<Bytes, std::io::Error>> + Send + 'static
where
    S: Stream<Item = Result<Bytes, E>> + Send + 'static,
    E: Display + Send + 'static,
{
    let chunk_size = chunk_size.max(1);
    let state = RechunkState {
        upstream: Box::pin(upstream),
        pending: Bytes::new(),
        written: 0,
        done: false,
    };

    stream::unfold(state, move |mut state| async move {
        loop {
            if !state.pending.is_empty() {
                let n = state.pending.len().min(chunk_size);
                let frame = state.pending.split_to(n);
                state.written += n;
                return Some((Ok(frame), state));
            }

            if state.done {
                return None;
            }

            match state.upstream.next().await {
                Some(Ok(bytes)) => state.pending = bytes,
                Some(Err(e)) => {
                    debug!(error = %e, bytes = state.written, "Upstream stream ended with error");
                    state.done = true;
                }
                None => {
                    debug!(bytes = state.written, "Upstream stream completed");
                    state.done = true;
                }
            }
        }
    })
}

/// Forwards with a dedicated client and relays the body frame by frame
#[derive(Debug, Clone)]
pub struct StreamingForwarder {
    client: reqwest::Client,
    chunk_size: usize,
}

impl StreamingForwarder {
    pub fn new() -> GatewayResult<Self> {
        Self::with_chunk_size(STREAM_CHUNK_SIZE)
    }

    pub fn with_chunk_size(chunk_size: usize) -> GatewayResult<Self> {
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| GatewayError::StreamingUnsupported {
                reason: format!("failed to build streaming client: {}", e),
            })?;

        Ok(Self { client, chunk_size })
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    #[instrument(skip_all, fields(service = %target.service, method = %request.method))]
    pub async fn forward(
        &self,
        target: &ProxyTarget,
        request: ForwardRequest,
    ) -> GatewayResult<Response> {
        let url = target.upstream_url(&request.path_and_query);
        let headers = streaming_request_headers(&request.headers);

        let upstream = self
            .client
            .request(request.method, &url)
            .headers(headers)
            .body(request.body)
            .send()
            .await
            .map_err(|e| upstream_failure(&target.service, &url, e))?;

        let status = upstream.status();
        info!(url = %url, status = %status, "Streaming response from upstream");

        let headers = streaming_response_headers(upstream.headers());
        let body = Body::from_stream(rechunk(upstream.bytes_stream(), self.chunk_size));

        let mut response = Response::new(body);
        *response.status_mut() = status;
        *response.headers_mut() = headers;

        Ok(response)
    }
}
