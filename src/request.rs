//! # Request Model
//!
//! Matchers, limit keys, and limits all operate on this small,
//! transport-independent view of an HTTP request rather than on an
//! `axum::http::Request` directly — the same shape the original
//! implementation's `common.Request` map served, minus the
//! `interface{}`-typed indirection.

use axum::http::{HeaderMap, Method};

/// A request, reduced to the fields rate limiting cares about.
#[derive(Debug, Clone)]
pub struct Request {
    pub path: String,
    pub headers: HeaderMap,
    pub remote_addr: Option<String>,
    pub method: Method,
}

impl Request {
    pub fn new(path: String, headers: HeaderMap, remote_addr: Option<String>, method: Method) -> Self {
        Self { path, headers, remote_addr, method }
    }

    /// Joins a header's values (there may be more than one) with `;`,
    /// matching the original's `strings.Join(values, ";")`.
    pub fn header_values_joined(&self, name: &str) -> Option<String> {
        let values: Vec<&str> = self
            .headers
            .get_all(name)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .collect();
        if values.is_empty() {
            None
        } else {
            Some(values.join(";"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers_with(name: &str, values: &[&str]) -> HeaderMap {
        let mut headers = HeaderMap::new();
        for v in values {
            headers.append(
                axum::http::HeaderName::from_bytes(name.as_bytes()).unwrap(),
                axum::http::HeaderValue::from_str(v).unwrap(),
            );
        }
        headers
    }

    #[test]
    fn joins_multi_value_headers_with_semicolon() {
        let req = Request::new(
            "/foo".to_string(),
            headers_with("x-test", &["a", "b"]),
            None,
            Method::GET,
        );
        assert_eq!(req.header_values_joined("x-test"), Some("a;b".to_string()));
    }

    #[test]
    fn missing_header_is_none() {
        let req = Request::new("/foo".to_string(), HeaderMap::new(), None, Method::GET);
        assert_eq!(req.header_values_joined("x-test"), None);
    }
}
