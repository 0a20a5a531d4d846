//! Turns an inbound request's `HeaderMap` into the string→string mapping
//! persisted on a webhook, per spec §4.4 step 3: hop-by-hop headers are
//! dropped and the set is capped so one request can't blow up the queue
//! store's header column. Names are already RFC 7230 tokens by
//! construction (`axum::http::HeaderName` enforces this), so there is
//! nothing left for this module to validate beyond size and count.

use std::collections::HashMap;

use axum::http::HeaderMap;
use thiserror::Error;

/// Maximum number of headers allowed
const MAX_HEADERS: usize = 100;
/// Maximum size of a single header (name + value) in bytes
const MAX_HEADER_SIZE: usize = 8192; // 8KB
/// Maximum total size of all headers in bytes
const MAX_TOTAL_HEADERS_SIZE: usize = 65536; // 64KB

const HOP_BY_HOP_EXACT: &[&str] = &["connection", "keep-alive", "transfer-encoding", "upgrade"];
const HOP_BY_HOP_PREFIXES: &[&str] = &["proxy-"];

#[derive(Debug, Error)]
pub enum SanitizeError {
    #[error("Too many headers: {count} (max: {max})")]
    TooManyHeaders { count: usize, max: usize },

    #[error("Header too large: {name} ({size} bytes, max: {max} bytes)")]
    HeaderTooLarge {
        name: String,
        size: usize,
        max: usize,
    },

    #[error("Total headers too large: {size} bytes (max: {max} bytes)")]
    TotalHeadersTooLarge { size: usize, max: usize },
}

/// Copies `headers` into a `string → string` mapping suitable for
/// `Store::create_webhook`, excluding hop-by-hop headers (`Connection`,
/// `Keep-Alive`, `Proxy-*`, `Transfer-Encoding`, `Upgrade` — spec §4.4
/// step 3) and non-UTF8 values, and enforcing count/size caps.
pub fn sanitize_headers(headers: &HeaderMap) -> Result<HashMap<String, String>, SanitizeError> {
    if headers.len() > MAX_HEADERS {
        return Err(SanitizeError::TooManyHeaders {
            count: headers.len(),
            max: MAX_HEADERS,
        });
    }

    let mut sanitized = HashMap::with_capacity(headers.len());
    let mut total_size: usize = 0;

    for (name, value) in headers {
        let name = name.as_str();
        let lower = name.to_ascii_lowercase();
        if is_hop_by_hop(&lower) {
            continue;
        }
        // Skip headers with non-UTF8 values instead of rejecting the whole request.
        let Ok(value) = value.to_str() else { continue };

        let size = name.len() + value.len();
        if size > MAX_HEADER_SIZE {
            return Err(SanitizeError::HeaderTooLarge {
                name: name.to_string(),
                size,
                max: MAX_HEADER_SIZE,
            });
        }

        total_size += size;
        if total_size > MAX_TOTAL_HEADERS_SIZE {
            return Err(SanitizeError::TotalHeadersTooLarge {
                size: total_size,
                max: MAX_TOTAL_HEADERS_SIZE,
            });
        }

        sanitized.insert(name.to_string(), value.to_string());
    }

    Ok(sanitized)
}

fn is_hop_by_hop(lower_name: &str) -> bool {
    HOP_BY_HOP_EXACT.contains(&lower_name)
        || HOP_BY_HOP_PREFIXES.iter().any(|prefix| lower_name.starts_with(prefix))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers(pairs: &[(&str, &str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.insert(
                axum::http::HeaderName::from_bytes(name.as_bytes()).unwrap(),
                value.parse().unwrap(),
            );
        }
        map
    }

    #[test]
    fn drops_hop_by_hop_headers() {
        let sanitized = sanitize_headers(&headers(&[
            ("Connection", "keep-alive"),
            ("Proxy-Authorization", "secret"),
            ("X-Forwarded-For", "1.2.3.4"),
        ]))
        .unwrap();
        assert_eq!(sanitized.len(), 1);
        assert!(sanitized.contains_key("x-forwarded-for"));
    }

    #[test]
    fn rejects_too_many_headers() {
        let mut map = HeaderMap::new();
        for i in 0..MAX_HEADERS + 1 {
            map.insert(
                axum::http::HeaderName::from_bytes(format!("x-header-{i}").as_bytes()).unwrap(),
                "v".parse().unwrap(),
            );
        }
        assert!(matches!(sanitize_headers(&map), Err(SanitizeError::TooManyHeaders { .. })));
    }

    #[test]
    fn rejects_oversized_header() {
        let sanitized = sanitize_headers(&headers(&[("X-Big", &"a".repeat(MAX_HEADER_SIZE))]));
        assert!(matches!(sanitized, Err(SanitizeError::HeaderTooLarge { .. })));
    }
}
