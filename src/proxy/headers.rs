//! Header transformation for forwarded requests and returned responses.
//!
//! # Responsibilities
//! - Copy each header once: first occurrence wins, later duplicates dropped
//! - Strip hop-by-hop headers in both directions
//! - Force `origin`/`referer` on forwarded requests
//! - Drop framing restrictions from returned responses

use axum::http::header::{self, HeaderMap, HeaderName, HeaderValue};

/// Connection-scoped headers that must not be forwarded.
static HOP_BY_HOP: [HeaderName; 7] = [
    header::CONNECTION,
    header::PROXY_AUTHENTICATE,
    header::PROXY_AUTHORIZATION,
    header::TE,
    header::TRAILER,
    header::TRANSFER_ENCODING,
    header::UPGRADE,
];

fn is_hop_by_hop(name: &HeaderName) -> bool {
    HOP_BY_HOP.contains(name) || name.as_str() == "keep-alive" || name.as_str() == "proxy-connection"
}

/// Insert `value` under `name` unless the name is already present.
fn insert_if_absent(map: &mut HeaderMap, name: &HeaderName, value: HeaderValue) {
    if !map.contains_key(name) {
        map.insert(name.clone(), value);
    }
}

/// Headers for the upstream request.
///
/// `origin` and `referer` are forced to the given values. `host` is left to
/// the transport, `accept-encoding` is dropped so bodies arrive decodable,
/// and `http://` inside values becomes `https://`.
pub fn forward_request_headers(inbound: &HeaderMap, origin: &str, referer: &str) -> HeaderMap {
    let mut out = HeaderMap::with_capacity(inbound.keys_len() + 2);
    if let Ok(value) = HeaderValue::from_str(origin) {
        out.insert(header::ORIGIN, value);
    }
    if let Ok(value) = HeaderValue::from_str(referer) {
        out.insert(header::REFERER, value);
    }

    for (name, value) in inbound {
        if *name == header::HOST || *name == header::ACCEPT_ENCODING || is_hop_by_hop(name) {
            continue;
        }
        insert_if_absent(&mut out, name, upgrade_scheme(value));
    }
    out
}

/// Headers for the response returned to the client.
///
/// `x-frame-options` and `content-security-policy` are dropped, and when the
/// body is about to be rewritten so is `content-length`.
pub fn response_headers(upstream: &HeaderMap, body_rewritten: bool) -> HeaderMap {
    let mut out = HeaderMap::with_capacity(upstream.keys_len());
    for (name, value) in upstream {
        if *name == header::X_FRAME_OPTIONS
            || *name == header::CONTENT_SECURITY_POLICY
            || is_hop_by_hop(name)
            || (body_rewritten && *name == header::CONTENT_LENGTH)
        {
            continue;
        }
        insert_if_absent(&mut out, name, value.clone());
    }
    out
}

fn upgrade_scheme(value: &HeaderValue) -> HeaderValue {
    match value.to_str() {
        Ok(text) if text.contains("http://") => {
            HeaderValue::from_str(&text.replace("http://", "https://")).unwrap_or_else(|_| value.clone())
        }
        _ => value.clone(),
    }
}
