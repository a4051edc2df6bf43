//! Normalized view of one incoming HTTP request.
//!
//! The SigV4 authenticator works on this struct instead of axum types so
//! signature verification can be exercised directly in unit tests. The
//! raw query string is kept verbatim — canonicalization re-parses it —
//! while the decoded pair list serves routing-style lookups.

use axum::http::request::Parts;

/// Listener identity, used for scheme detection and host-candidate
/// fallbacks.
#[derive(Debug, Clone)]
pub struct ServerInfo {
    pub server_name: String,
    pub server_port: u16,
    pub tls: bool,
}

#[derive(Debug, Clone)]
pub struct RequestContext {
    method: String,
    path: String,
    raw_query: String,
    query: Vec<(String, String)>,
    headers: Vec<(String, String)>,
    host: Option<String>,
    scheme: &'static str,
    server_name: String,
    server_port: u16,
}

impl RequestContext {
    /// Core constructor. `path` and `raw_query` are taken exactly as they
    /// appeared on the request line; header names are lowercased, values
    /// kept as received.
    pub fn new(
        method: &str,
        path: &str,
        raw_query: &str,
        headers: Vec<(String, String)>,
        server: &ServerInfo,
    ) -> Self {
        let headers: Vec<(String, String)> = headers
            .into_iter()
            .map(|(name, value)| (name.to_ascii_lowercase(), value))
            .collect();

        let host = headers
            .iter()
            .find(|(name, _)| name == "host")
            .map(|(_, value)| value.clone());

        let forwarded_https = headers
            .iter()
            .find(|(name, _)| name == "x-forwarded-proto")
            .map(|(_, value)| value.trim().eq_ignore_ascii_case("https"))
            .unwrap_or(false);
        let scheme = if server.tls || forwarded_https {
            "https"
        } else {
            "http"
        };

        Self {
            method: method.to_ascii_uppercase(),
            path: path.to_string(),
            raw_query: raw_query.to_string(),
            query: parse_query_pairs(raw_query),
            headers,
            host,
            scheme,
            server_name: server.server_name.clone(),
            server_port: server.server_port,
        }
    }

    /// Build from axum request parts.
    ///
    /// HTTP/2 carries the authority in the URI instead of a Host header;
    /// fold it back in so signing code sees a single host notion.
    pub fn from_parts(parts: &Parts, server: &ServerInfo) -> Self {
        let headers: Vec<(String, String)> = parts
            .headers
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();

        let mut ctx = Self::new(
            parts.method.as_str(),
            parts.uri.path(),
            parts.uri.query().unwrap_or(""),
            headers,
            server,
        );
        if ctx.host.is_none() {
            ctx.host = parts.uri.authority().map(|a| a.to_string());
        }
        ctx
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    /// Request path exactly as received (still percent-encoded).
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Query string exactly as received — canonicalization input.
    pub fn raw_query(&self) -> &str {
        &self.raw_query
    }

    /// First decoded value for a query key.
    pub fn query_param(&self, name: &str) -> Option<&str> {
        self.query
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn has_query_param(&self, name: &str) -> bool {
        self.query.iter().any(|(k, _)| k == name)
    }

    /// First value of a header (name matched case-insensitively), exactly
    /// as received. Whitespace normalization is canonicalization's job.
    pub fn header(&self, name: &str) -> Option<&str> {
        let name = name.to_ascii_lowercase();
        self.headers
            .iter()
            .find(|(k, _)| *k == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn host(&self) -> Option<&str> {
        self.host.as_deref()
    }

    pub fn scheme(&self) -> &str {
        self.scheme
    }

    pub fn server_name(&self) -> &str {
        &self.server_name
    }

    pub fn server_port(&self) -> u16 {
        self.server_port
    }
}

/// Split a raw query string into decoded (key, value) pairs, preserving
/// wire order. A bare `key` with no `=` decodes to an empty value.
fn parse_query_pairs(raw: &str) -> Vec<(String, String)> {
    raw.split('&')
        .filter(|s| !s.is_empty())
        .map(|pair| match pair.split_once('=') {
            Some((k, v)) => (percent_decode(k), percent_decode(v)),
            None => (percent_decode(pair), String::new()),
        })
        .collect()
}

/// Percent-decode a URI component (e.g. `%2F` → `/`). `+` is left alone:
/// S3 canonicalization treats it as a literal plus.
pub(crate) fn percent_decode(input: &str) -> String {
    let mut result = Vec::with_capacity(input.len());
    let bytes = input.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            if let Ok(byte) = u8::from_str_radix(&input[i + 1..i + 3], 16) {
                result.push(byte);
                i += 3;
                continue;
            }
        }
        result.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&result).into_owned()
}
