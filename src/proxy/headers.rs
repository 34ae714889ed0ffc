//! Header handling shared by both forwarders.

use axum::http::header::{self, HeaderMap, HeaderName, HeaderValue};
use std::net::IpAddr;

pub const X_FORWARDED_FOR: HeaderName = HeaderName::from_static("x-forwarded-for");
pub const X_FORWARDED_HOST: HeaderName = HeaderName::from_static("x-forwarded-host");
pub const X_FORWARDED_PROTO: HeaderName = HeaderName::from_static("x-forwarded-proto");
pub const X_ACCEL_BUFFERING: HeaderName = HeaderName::from_static("x-accel-buffering");

/// Check if a header is a hop-by-hop header that should not be forwarded
pub fn is_hop_by_hop(name: &HeaderName) -> bool {
    matches!(
        name.as_str(),
        "connection"
            | "keep-alive"
            | "proxy-authenticate"
            | "proxy-authorization"
            | "proxy-connection"
            | "te"
            | "trailer"
            | "trailers"
            | "transfer-encoding"
            | "upgrade"
    )
}

/// Scheme the client used to reach the gateway
///
/// Plain-HTTP listeners only learn the scheme from an upstream proxy's
/// `X-Forwarded-Proto`; absent that it is `http`.
pub fn request_scheme(headers: &HeaderMap) -> &str {
    headers
        .get(&X_FORWARDED_PROTO)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .unwrap_or("http")
}

/// Set `X-Forwarded-Host` and `X-Forwarded-Proto` from the inbound request
pub fn apply_forwarding_headers(outbound: &mut HeaderMap, inbound: &HeaderMap) {
    if let Some(host) = inbound.get(header::HOST) {
        outbound.insert(X_FORWARDED_HOST, host.clone());
    }

    let scheme = request_scheme(inbound);
    if let Ok(value) = HeaderValue::from_str(scheme) {
        outbound.insert(X_FORWARDED_PROTO, value);
    }
}

/// Append the client IP to any `X-Forwarded-For` chain already present
///
/// Multiple inbound `X-Forwarded-For` headers are folded into one
/// comma-separated value ending with `client`.
pub fn append_forwarded_for(outbound: &mut HeaderMap, client: IpAddr) {
    let mut chain: Vec<String> = outbound
        .get_all(&X_FORWARDED_FOR)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .map(str::to_string)
        .collect();
    chain.push(client.to_string());

    if let Ok(value) = HeaderValue::from_str(&chain.join(", ")) {
        outbound.insert(X_FORWARDED_FOR, value);
    }
}

/// Request headers for the buffered path: no hop-by-hop headers and no `Host`
///
/// The connecting client's IP, when known, is appended to `X-Forwarded-For`.
pub fn buffered_request_headers(inbound: &HeaderMap, client: Option<IpAddr>) -> HeaderMap {
    let mut outbound = HeaderMap::with_capacity(inbound.len() + 3);
    for (name, value) in inbound {
        if name != header::HOST && !is_hop_by_hop(name) {
            outbound.append(name.clone(), value.clone());
        }
    }
    apply_forwarding_headers(&mut outbound, inbound);
    if let Some(client) = client {
        append_forwarded_for(&mut outbound, client);
    }
    outbound
}

/// Request headers for the streaming path: everything except `Host`
pub fn streaming_request_headers(inbound: &HeaderMap) -> HeaderMap {
    let mut outbound = inbound.clone();
    outbound.remove(header::HOST);
    apply_forwarding_headers(&mut outbound, inbound);
    outbound
}

/// Response headers relayed on the buffered path
pub fn buffered_response_headers(upstream: &HeaderMap) -> HeaderMap {
    let mut headers = HeaderMap::with_capacity(upstream.len());
    for (name, value) in upstream {
        if !is_hop_by_hop(name) {
            headers.append(name.clone(), value.clone());
        }
    }
    headers
}

/// Response headers relayed on the streaming path
///
/// The body is re-framed by the gateway, so upstream encoding and framing
/// headers no longer describe it.
pub fn streaming_response_headers(upstream: &HeaderMap) -> HeaderMap {
    let mut headers = HeaderMap::with_capacity(upstream.len() + 3);
    for (name, value) in upstream {
        if name != header::CONTENT_ENCODING
            && name != header::TRANSFER_ENCODING
            && name != header::CONTENT_LENGTH
        {
            headers.append(name.clone(), value.clone());
        }
    }
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    headers.insert(header::CONNECTION, HeaderValue::from_static("keep-alive"));
    headers.insert(X_ACCEL_BUFFERING, HeaderValue::from_static("no"));
    headers
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inbound() -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(header::HOST, HeaderValue::from_static("gateway.example.com"));
        headers.insert(header::CONNECTION, HeaderValue::from_static("keep-alive"));
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer token"));
        headers.insert("x-custom-header", HeaderValue::from_static("value"));
        headers
    }

    #[test]
    fn test_hop_by_hop_headers() {
        assert!(is_hop_by_hop(&header::CONNECTION));
        assert!(is_hop_by_hop(&header::TRANSFER_ENCODING));
        assert!(is_hop_by_hop(&header::UPGRADE));
        assert!(is_hop_by_hop(&header::PROXY_AUTHORIZATION));

        assert!(!is_hop_by_hop(&header::CONTENT_TYPE));
        assert!(!is_hop_by_hop(&header::AUTHORIZATION));
        assert!(!is_hop_by_hop(&header::HOST));
    }

    #[test]
    fn test_request_scheme() {
        let mut headers = HeaderMap::new();
        assert_eq!(request_scheme(&headers), "http");

        headers.insert(X_FORWARDED_PROTO, HeaderValue::from_static("https"));
        assert_eq!(request_scheme(&headers), "https");
    }

    #[test]
    fn test_buffered_request_headers() {
        let headers = buffered_request_headers(&inbound(), None);

        assert!(headers.get(header::HOST).is_none());
        assert!(headers.get(header::CONNECTION).is_none());
        assert_eq!(headers[header::AUTHORIZATION], "Bearer token");
        assert_eq!(headers[X_FORWARDED_HOST], "gateway.example.com");
        assert_eq!(headers[X_FORWARDED_PROTO], "http");
        assert!(headers.get(X_FORWARDED_FOR).is_none());
    }

    #[test]
    fn test_buffered_request_headers_append_client_ip() {
        let client: IpAddr = "192.168.1.5".parse().unwrap();

        let headers = buffered_request_headers(&inbound(), Some(client));
        assert_eq!(headers[X_FORWARDED_FOR], "192.168.1.5");

        let mut chained = inbound();
        chained.append(X_FORWARDED_FOR, HeaderValue::from_static("203.0.113.7"));
        chained.append(X_FORWARDED_FOR, HeaderValue::from_static("10.0.0.1"));
        let headers = buffered_request_headers(&chained, Some(client));

        assert_eq!(headers.get_all(X_FORWARDED_FOR).iter().count(), 1);
        assert_eq!(headers[X_FORWARDED_FOR], "203.0.113.7, 10.0.0.1, 192.168.1.5");
    }

    #[test]
    fn test_streaming_request_headers_keep_everything_but_host() {
        let headers = streaming_request_headers(&inbound());

        assert!(headers.get(header::HOST).is_none());
        assert_eq!(headers[header::CONNECTION], "keep-alive");
        assert_eq!(headers["x-custom-header"], "value");
        assert_eq!(headers[X_FORWARDED_HOST], "gateway.example.com");
    }

    #[test]
    fn test_streaming_response_headers() {
        let mut upstream = HeaderMap::new();
        upstream.insert(header::CONTENT_TYPE, HeaderValue::from_static("text/event-stream"));
        upstream.insert(header::CONTENT_ENCODING, HeaderValue::from_static("gzip"));
        upstream.insert(header::TRANSFER_ENCODING, HeaderValue::from_static("chunked"));
        upstream.insert(header::CACHE_CONTROL, HeaderValue::from_static("max-age=60"));

        let headers = streaming_response_headers(&upstream);

        assert_eq!(headers[header::CONTENT_TYPE], "text/event-stream");
        assert!(headers.get(header::CONTENT_ENCODING).is_none());
        assert!(headers.get(header::TRANSFER_ENCODING).is_none());
        assert_eq!(headers[header::CACHE_CONTROL], "no-cache");
        assert_eq!(headers[header::CONNECTION], "keep-alive");
        assert_eq!(headers[X_ACCEL_BUFFERING], "no");
    }
}
