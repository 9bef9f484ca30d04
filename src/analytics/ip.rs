//! Client IP extraction from proxy headers
//!
//! Tries the common forwarding headers in order of preference and falls back
//! to the socket peer address. The result feeds the unique-visitor set, so a
//! stable string per visitor matters more than spoof-resistance here.

use axum::http::HeaderMap;
use std::net::IpAddr;

const FORWARD_HEADERS: &[&str] = &["x-real-ip", "cf-connecting-ip", "x-client-ip"];

/// Extract the client IP as a string.
///
/// `x-forwarded-for` may carry a comma-separated chain; the first (leftmost)
/// entry is the originating client.
pub fn extract_client_ip(headers: &HeaderMap, socket_addr: IpAddr) -> String {
    if let Some(forwarded) = headers.get("x-forwarded-for").and_then(|h| h.to_str().ok()) {
        if let Some(first) = forwarded.split(',').next() {
            let first = first.trim();
            if !first.is_empty() {
                return first.to_string();
            }
        }
    }

    for name in FORWARD_HEADERS {
        if let Some(value) = headers.get(*name).and_then(|h| h.to_str().ok()) {
            let value = value.trim();
            if !value.is_empty() {
                return value.to_string();
            }
        }
    }

    socket_addr.to_string()
}
