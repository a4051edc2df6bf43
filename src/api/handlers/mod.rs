//! S3 API request handlers
//!
//! Split into submodules by domain:
//! - `object` — GET, HEAD, PUT, DELETE for individual objects, bulk delete
//! - `bucket` — implicit-bucket compatibility surface and listing
//! - `multipart` — multipart upload lifecycle
//!
//! This module holds the shared application state, the pre-route check
//! middleware, and small helpers every handler uses.

mod bucket;
mod multipart;
mod object;

use super::context::percent_decode;
use super::errors::S3Error;
use super::validate::{valid_bucket_name, valid_object_key};
use crate::storage::{FsStore, ObjectMeta, StorageError};
use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use std::sync::Arc;
use tracing::{debug, error};

pub use bucket::{create_bucket, delete_bucket, head_bucket, list_objects, BucketGetQuery};
pub use multipart::{post_bucket, post_object, BucketPostQuery};
pub use object::{delete_object, get_object, head_object, put_object};

/// Application state shared across handlers
pub struct AppState {
    pub store: Arc<FsStore>,
    pub max_request_size: u64,
}

/// Query parameters for object-level operations (multipart upload)
#[derive(Debug, serde::Deserialize, Default)]
pub struct ObjectQuery {
    /// CreateMultipartUpload (POST with ?uploads)
    pub uploads: Option<String>,
    /// UploadPart / CompleteMultipartUpload / Abort (with ?uploadId)
    #[serde(rename = "uploadId")]
    pub upload_id: Option<String>,
    /// UploadPart (PUT with ?partNumber). Kept as a string so the strict
    /// part-number grammar applies instead of serde's integer parsing.
    #[serde(rename = "partNumber")]
    pub part_number: Option<String>,
}

// ---------------------------------------------------------------------------
// Pre-route middleware
// ---------------------------------------------------------------------------

/// Checks that run before authentication: path syntax and the declared
/// request size. A request with a malformed bucket or key is rejected
/// for that reason, not with an authentication error.
pub async fn pre_route_checks(
    State(state): State<Arc<AppState>>,
    request: Request<Body>,
    next: Next,
) -> Result<Response, S3Error> {
    let path = request.uri().path();
    if path != "/" {
        let trimmed = path.trim_start_matches('/');
        let (bucket_raw, key_raw) = trimmed.split_once('/').unwrap_or((trimmed, ""));
        let bucket = percent_decode(bucket_raw);
        let key = key_raw
            .split('/')
            .map(percent_decode)
            .collect::<Vec<_>>()
            .join("/");

        if !valid_bucket_name(&bucket) {
            return Err(S3Error::InvalidBucketName(format!("/{bucket}")));
        }
        if !valid_object_key(&key) {
            return Err(S3Error::InvalidObjectKey(format!("/{bucket}/{key}")));
        }
    }

    if let Some(declared) = request
        .headers()
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok())
    {
        // Exactly max_request_size is still acceptable.
        if declared > state.max_request_size {
            debug!(
                "Rejecting request: declared Content-Length {} > max {}",
                declared, state.max_request_size
            );
            return Err(S3Error::EntityTooLarge {
                size: declared,
                max: state.max_request_size,
            });
        }
    }

    Ok(next.run(request).await)
}

// ---------------------------------------------------------------------------
// Root and method fallbacks
// ---------------------------------------------------------------------------

/// HEAD / — unauthenticated connection probe, matching real S3.
pub async fn head_root() -> StatusCode {
    StatusCode::OK
}

/// GET / — the path grammar is `/<bucket>[/<key>]`; the bare root serves
/// nothing.
pub async fn root_get() -> S3Error {
    S3Error::InvalidRequest("Requests must address /<bucket>[/<key>]".to_string())
}

/// Shared fallback for methods outside the dispatch table.
pub async fn method_not_allowed() -> S3Error {
    S3Error::MethodNotAllowed
}

// ---------------------------------------------------------------------------
// Shared utility functions used across handler submodules
// ---------------------------------------------------------------------------

/// Build an XML response with correct Content-Type header.
fn xml_response(xml: impl Into<String>) -> Response {
    (
        StatusCode::OK,
        [("Content-Type", "application/xml")],
        xml.into(),
    )
        .into_response()
}

fn hval(s: &str) -> HeaderValue {
    HeaderValue::from_bytes(s.as_bytes()).unwrap_or_else(|_| HeaderValue::from_static(""))
}

/// Response headers common to GET and HEAD on an object.
fn object_headers(meta: &ObjectMeta) -> HeaderMap {
    let mut itoa_buf = itoa::Buffer::new();

    let mut headers = HeaderMap::new();
    headers.insert("Content-Type", hval("application/octet-stream"));
    headers.insert("Content-Length", hval(itoa_buf.format(meta.size)));
    headers.insert("Accept-Ranges", hval("bytes"));
    headers.insert(
        "Last-Modified",
        hval(
            &meta
                .modified
                .format("%a, %d %b %Y %H:%M:%S GMT")
                .to_string(),
        ),
    );
    headers
}

/// Parse request body as UTF-8, mapping errors to MalformedXML.
fn body_to_utf8(body: &axum::body::Bytes) -> Result<&str, S3Error> {
    std::str::from_utf8(body).map_err(|_| S3Error::MalformedXML)
}

/// Map a storage failure in an object context.
fn object_error(err: StorageError, bucket: &str, key: &str) -> S3Error {
    match err {
        StorageError::NotFound(_) => S3Error::NoSuchKey(format!("/{bucket}/{key}")),
        StorageError::InvalidPart(msg) => S3Error::InvalidPart(msg),
        StorageError::Io(e) => {
            error!("Storage IO error on {}/{}: {}", bucket, key, e);
            S3Error::InternalError
        }
    }
}

/// Map a storage failure in a multipart-session context: an absent
/// session is NoSuchUpload, not NoSuchKey.
fn upload_error(err: StorageError, bucket: &str, key: &str) -> S3Error {
    match err {
        StorageError::NotFound(_) => S3Error::NoSuchUpload(format!("/{bucket}/{key}")),
        StorageError::InvalidPart(msg) => S3Error::InvalidPart(msg),
        StorageError::Io(e) => {
            error!("Storage IO error on upload {}/{}: {}", bucket, key, e);
            S3Error::InternalError
        }
    }
}
