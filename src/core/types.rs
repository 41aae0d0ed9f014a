//! # Core Types
//!
//! Unified request view and dispatch outcome types. The dispatcher and the
//! predicate factories only ever read an [`IncomingRequest`]; building one from
//! the hosting framework's request type is the job of the middleware adapter.

use axum::http::{HeaderMap, Method, Uri, Version};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

/// Represents an incoming request before route matching
///
/// This abstracts away framework-specific request details while preserving the
/// parts route predicates can test: method, URI (path + query), headers, and
/// the client address. Cloning is cheap; header maps are shared via `Arc`.
#[derive(Debug, Clone)]
pub struct IncomingRequest {
    /// HTTP method (GET, POST, etc.)
    pub method: Method,

    /// Request URI including path and query parameters
    pub uri: Uri,

    /// HTTP version (1.0, 1.1, 2.0)
    pub version: Version,

    /// Request headers
    pub headers: Arc<HeaderMap>,

    /// Client's remote address, if known
    pub remote_addr: Option<SocketAddr>,

    /// Timestamp when the request was received
    pub received_at: Instant,
}

impl IncomingRequest {
    /// Create a new incoming request
    pub fn new(
        method: Method,
        uri: Uri,
        version: Version,
        headers: HeaderMap,
        remote_addr: Option<SocketAddr>,
    ) -> Self {
        Self {
            method,
            uri,
            version,
            headers: Arc::new(headers),
            remote_addr,
            received_at: Instant::now(),
        }
    }

    /// Get the request path without query parameters
    pub fn path(&self) -> &str {
        self.uri.path()
    }

    /// Get the raw query string, if present
    pub fn query(&self) -> Option<&str> {
        self.uri.query()
    }

    /// Get the first value of a header by name (case-insensitive)
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|value| value.to_str().ok())
    }

    /// Get all values of a header by name, splitting comma-separated lists
    ///
    /// HTTP allows a header to appear multiple times and each occurrence to
    /// carry a comma-separated list; predicates match against the flattened
    /// values.
    pub fn header_values(&self, name: &str) -> Vec<&str> {
        self.headers
            .get_all(name)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .flat_map(|value| value.split(','))
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .collect()
    }

    /// Decoded query parameters as (name, value) pairs, in declaration order
    ///
    /// A key without `=` yields an empty value (e.g. `?flag`). Pairs that fail
    /// percent-decoding are skipped.
    pub fn query_pairs(&self) -> Vec<(String, String)> {
        let Some(query) = self.query() else {
            return Vec::new();
        };
        let mut pairs = Vec::new();
        for pair in query.split('&') {
            let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
            if let (Ok(key), Ok(value)) = (urlencoding::decode(key), urlencoding::decode(value)) {
                pairs.push((key.into_owned(), value.into_owned()));
            }
        }
        pairs
    }
}

/// Outcome of dispatching a request through the route/admission layer
///
/// `Pass` covers both "no route matched" and "matched and admitted"; in either
/// case the request proceeds untouched and carries the downstream value.
/// `Blocked` means the admission check denied the matched route's resource and
/// the request was short-circuited with the fixed too-many-requests response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DispatchOutcome<T> {
    /// The request proceeded; carries the downstream result
    Pass(T),
    /// The request was denied admission for the named resource
    Blocked {
        /// Synthetic resource id of the route that denied the request
        resource: String,
    },
}

impl<T> DispatchOutcome<T> {
    /// True if the request was short-circuited by admission control
    pub fn is_blocked(&self) -> bool {
        matches!(self, Self::Blocked { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(uri: &str, headers: HeaderMap) -> IncomingRequest {
        IncomingRequest::new(
            Method::GET,
            uri.parse().unwrap(),
            Version::HTTP_11,
            headers,
            None,
        )
    }

    #[test]
    fn test_path_and_query() {
        let req = request("/api/users?limit=10", HeaderMap::new());
        assert_eq!(req.path(), "/api/users");
        assert_eq!(req.query(), Some("limit=10"));
    }

    #[test]
    fn test_header_values_split_commas() {
        let mut headers = HeaderMap::new();
        headers.append("x-canary", "a, b".parse().unwrap());
        headers.append("x-canary", "c".parse().unwrap());
        let req = request("/", headers);
        assert_eq!(req.header_values("X-Canary"), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_query_pairs_decode() {
        let req = request("/search?q=hello%20world&flag", HeaderMap::new());
        let pairs = req.query_pairs();
        assert_eq!(pairs[0], ("q".to_string(), "hello world".to_string()));
        assert_eq!(pairs[1], ("flag".to_string(), String::new()));
    }
}
