//! AWS chunked transfer encoding decoder
//!
//! AWS SDKs and the CLI often send PUT bodies in the `aws-chunked`
//! framing — either the signed variant (`x-amz-content-sha256:
//! STREAMING-AWS4-HMAC-SHA256-PAYLOAD`) or the unsigned-with-trailer
//! variant modern SDKs use for checksummed uploads:
//!
//! ```text
//! <hex-chunk-size>[;chunk-signature=<signature>]\r\n
//! <chunk-data>\r\n
//! ...
//! 0[;chunk-signature=<signature>]\r\n
//! [trailer-header:value\r\n]*
//! ```
//!
//! This module strips that framing to recover the actual payload. Chunk
//! signatures and trailing checksums are not verified — the payload hash
//! policy lives in the authenticator.

use axum::body::Bytes;
use axum::http::HeaderMap;
use tracing::{debug, warn};

/// Check whether the request body uses AWS chunked framing.
pub fn is_aws_chunked(headers: &HeaderMap) -> bool {
    let streaming_hash = headers
        .get("x-amz-content-sha256")
        .and_then(|v| v.to_str().ok())
        .map(|v| v.starts_with("STREAMING-"))
        .unwrap_or(false);
    let chunked_encoding = headers
        .get("content-encoding")
        .and_then(|v| v.to_str().ok())
        .map(|v| v.split(',').any(|e| e.trim() == "aws-chunked"))
        .unwrap_or(false);
    streaming_hash || chunked_encoding
}

/// The payload length the client declared before framing.
pub fn get_decoded_content_length(headers: &HeaderMap) -> Option<usize> {
    headers
        .get("x-amz-decoded-content-length")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse().ok())
}

/// Decode an aws-chunked body. Returns `None` if the framing is broken,
/// in which case the caller should fall back to the raw bytes.
pub fn decode_aws_chunked(body: &Bytes, expected_length: Option<usize>) -> Option<Bytes> {
    let mut result = Vec::with_capacity(expected_length.unwrap_or(body.len()));
    let mut pos = 0;

    while pos < body.len() {
        let header_end = find_crlf(&body[pos..])?;
        let header_line = &body[pos..pos + header_end];
        pos += header_end + 2;

        // "<hex-size>" or "<hex-size>;chunk-signature=..."
        let header_str = std::str::from_utf8(header_line).ok()?;
        let chunk_size_hex = header_str.split(';').next()?;
        let chunk_size = usize::from_str_radix(chunk_size_hex.trim(), 16).ok()?;

        // The zero chunk terminates the payload; anything after it is
        // trailer headers we deliberately ignore.
        if chunk_size == 0 {
            break;
        }

        if pos + chunk_size > body.len() {
            warn!(
                "aws-chunked: truncated chunk (need {}, have {})",
                chunk_size,
                body.len() - pos
            );
            return None;
        }
        result.extend_from_slice(&body[pos..pos + chunk_size]);
        pos += chunk_size;

        if pos + 2 <= body.len() && &body[pos..pos + 2] == b"\r\n" {
            pos += 2;
        }
    }

    if let Some(expected) = expected_length {
        if result.len() != expected {
            warn!(
                "aws-chunked: decoded {} bytes, client declared {}",
                result.len(),
                expected
            );
        }
    }

    debug!(
        "aws-chunked: decoded {} bytes from {} framed bytes",
        result.len(),
        body.len()
    );

    Some(Bytes::from(result))
}

/// Find the position of `\r\n` in a byte slice.
fn find_crlf(data: &[u8]) -> Option<usize> {
    (0..data.len().saturating_sub(1)).find(|&i| data[i] == b'\r' && data[i + 1] == b'\n')
}
