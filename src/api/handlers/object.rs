//! Object-level S3 handlers: GET (with Range), HEAD, PUT (object or
//! part), DELETE (object or abort), and bulk delete.

use super::{
    body_to_utf8, hval, object_error, object_headers, upload_error, xml_response, AppState,
    ObjectQuery, S3Error,
};
use crate::api::aws_chunked::{decode_aws_chunked, get_decoded_content_length, is_aws_chunked};
use crate::api::extractors::ValidatedPath;
use crate::api::validate::{parse_part_number, valid_object_key};
use crate::api::xml::{DeleteError, DeleteRequest, DeleteResult};
use axum::body::{Body, Bytes};
use axum::extract::{Query, State};
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use std::io::SeekFrom;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio_util::io::ReaderStream;
use tracing::{debug, info, instrument, warn};

/// Upper bound on one streamed chunk.
const STREAM_CHUNK_BYTES: u64 = 8 * 1024 * 1024;

/// MD5 of the empty byte string.
const EMPTY_MD5: &str = "d41d8cd98f00b204e9800998ecf8427e";

// ---------------------------------------------------------------------------
// PUT
// ---------------------------------------------------------------------------

/// PUT /{bucket}/{key} — PutObject, or UploadPart when both `uploadId`
/// and `partNumber` are present.
#[instrument(skip(state, headers, body))]
pub async fn put_object(
    State(state): State<Arc<AppState>>,
    ValidatedPath { bucket, key }: ValidatedPath,
    Query(query): Query<ObjectQuery>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, S3Error> {
    // Strip AWS chunked framing when the SDK applies it
    let body = if is_aws_chunked(&headers) {
        let expected_len = get_decoded_content_length(&headers);
        match decode_aws_chunked(&body, expected_len) {
            Some(decoded) => decoded,
            None => {
                warn!(
                    "Failed to decode aws-chunked payload, using raw body ({} bytes)",
                    body.len()
                );
                body
            }
        }
    } else {
        body
    };

    if let (Some(upload_id), Some(part_raw)) = (&query.upload_id, &query.part_number) {
        let part_number = parse_part_number(part_raw).ok_or_else(|| {
            S3Error::InvalidPart(format!("part number {part_raw:?} is not a positive integer"))
        })?;
        info!(
            "UploadPart {}/{} part={} uploadId={}",
            bucket, key, part_number, upload_id
        );

        let etag = state
            .store
            .upload_part(&bucket, &key, upload_id, part_number, body)
            .await
            .map_err(|e| upload_error(e, &bucket, &key))?;
        // Part ETags go out as bare hex
        return Ok((StatusCode::OK, [("ETag", etag)], "").into_response());
    }

    info!("PUT {}/{} ({} bytes)", bucket, key, body.len());

    // S3 directory marker: zero-byte object with trailing slash, used by
    // GUIs to model folders.
    if key.ends_with('/') && body.is_empty() {
        state
            .store
            .put_directory_marker(&bucket, &key)
            .await
            .map_err(|e| object_error(e, &bucket, &key))?;
        return Ok((
            StatusCode::OK,
            [("ETag", format!("\"{EMPTY_MD5}\""))],
            "",
        )
            .into_response());
    }

    let etag = state
        .store
        .put_object(&bucket, &key, body)
        .await
        .map_err(|e| object_error(e, &bucket, &key))?;

    Ok((StatusCode::OK, [("ETag", format!("\"{etag}\""))], "").into_response())
}

// ---------------------------------------------------------------------------
// GET / HEAD
// ---------------------------------------------------------------------------

/// GET /{bucket}/{key} — stream the object, honoring a `Range` header.
///
/// The body always streams from the file; the whole object is never
/// buffered. A disconnecting client simply drops the stream and with it
/// the file handle.
#[instrument(skip(state, headers))]
pub async fn get_object(
    State(state): State<Arc<AppState>>,
    ValidatedPath { bucket, key }: ValidatedPath,
    headers: HeaderMap,
) -> Result<Response, S3Error> {
    info!("GET {}/{}", bucket, key);

    let (mut file, meta) = state
        .store
        .open_object(&bucket, &key)
        .await
        .map_err(|e| object_error(e, &bucket, &key))?;

    let range_header = headers.get(header::RANGE).and_then(|v| v.to_str().ok());
    match evaluate_range(range_header, meta.size) {
        RangeOutcome::Unsatisfiable => {
            debug!("Unsatisfiable range {:?} for size {}", range_header, meta.size);
            let mut headers = HeaderMap::new();
            headers.insert("Content-Range", hval(&format!("bytes */{}", meta.size)));
            Ok((StatusCode::RANGE_NOT_SATISFIABLE, headers).into_response())
        }
        RangeOutcome::Full => {
            let mut resp_headers = object_headers(&meta);
            resp_headers.insert("Content-Disposition", content_disposition(&key));
            let body = if meta.size == 0 {
                Body::empty()
            } else {
                stream_body(file, meta.size)
            };
            Ok((StatusCode::OK, resp_headers, body).into_response())
        }
        RangeOutcome::Partial { start, end } => {
            let len = end - start + 1;
            debug!("Range {}-{}/{} on {}/{}", start, end, meta.size, bucket, key);

            file.seek(SeekFrom::Start(start)).await.map_err(|e| {
                warn!("Seek failed on {}/{}: {}", bucket, key, e);
                S3Error::InternalError
            })?;

            let mut itoa_buf = itoa::Buffer::new();
            let mut resp_headers = object_headers(&meta);
            resp_headers.insert("Content-Length", hval(itoa_buf.format(len)));
            resp_headers.insert(
                "Content-Range",
                hval(&format!("bytes {start}-{end}/{}", meta.size)),
            );
            resp_headers.insert("Content-Disposition", content_disposition(&key));
            Ok((StatusCode::PARTIAL_CONTENT, resp_headers, stream_body(file, len)).into_response())
        }
    }
}

/// HEAD /{bucket}/{key}
#[instrument(skip(state))]
pub async fn head_object(
    State(state): State<Arc<AppState>>,
    ValidatedPath { bucket, key }: ValidatedPath,
) -> Result<Response, S3Error> {
    info!("HEAD {}/{}", bucket, key);

    let meta = state
        .store
        .head_object(&bucket, &key)
        .await
        .map_err(|e| object_error(e, &bucket, &key))?;

    Ok((StatusCode::OK, object_headers(&meta)).into_response())
}

/// Stream up to `len` bytes from the file's current position.
fn stream_body(file: tokio::fs::File, len: u64) -> Body {
    let capacity = len.clamp(1, STREAM_CHUNK_BYTES) as usize;
    Body::from_stream(ReaderStream::with_capacity(file.take(len), capacity))
}

fn content_disposition(key: &str) -> HeaderValue {
    let basename = key
        .rsplit('/')
        .find(|s| !s.is_empty())
        .unwrap_or(key)
        .replace(['"', '\\'], "_");
    hval(&format!("attachment; filename=\"{basename}\""))
}

// ---------------------------------------------------------------------------
// Range header
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RangeOutcome {
    /// No usable range — serve the whole body with 200.
    Full,
    /// Serve `start..=end` with 206.
    Partial { start: u64, end: u64 },
    /// 416 with `Content-Range: bytes */size`.
    Unsatisfiable,
}

/// Interpret a `Range` header against an object of `size` bytes.
///
/// Understood forms are `bytes=N-`, `bytes=N-M`, and `bytes=-N`; any
/// other syntax is ignored and the full body served. A syntactically
/// valid range that cannot be satisfied (start past the end, inverted
/// bounds, zero-length suffix, or any range on an empty object) is 416.
fn evaluate_range(header: Option<&str>, size: u64) -> RangeOutcome {
    let Some(header) = header else {
        return RangeOutcome::Full;
    };
    let Some(spec) = header.trim().strip_prefix("bytes=") else {
        return RangeOutcome::Full;
    };
    let Some((start_raw, end_raw)) = spec.split_once('-') else {
        return RangeOutcome::Full;
    };

    let parse = |s: &str| s.parse::<u64>().ok();

    if start_raw.is_empty() {
        // Suffix form: last N bytes
        let Some(suffix_len) = parse(end_raw) else {
            return RangeOutcome::Full;
        };
        if size == 0 || suffix_len == 0 {
            return RangeOutcome::Unsatisfiable;
        }
        return RangeOutcome::Partial {
            start: size.saturating_sub(suffix_len),
            end: size - 1,
        };
    }

    let Some(start) = parse(start_raw) else {
        return RangeOutcome::Full;
    };

    if end_raw.is_empty() {
        // Open-ended form: from N to the end
        if start >= size {
            return RangeOutcome::Unsatisfiable;
        }
        return RangeOutcome::Partial {
            start,
            end: size - 1,
        };
    }

    let Some(end) = parse(end_raw) else {
        return RangeOutcome::Full;
    };
    if start > end || start >= size {
        return RangeOutcome::Unsatisfiable;
    }
    RangeOutcome::Partial {
        start,
        end: end.min(size - 1),
    }
}

// ---------------------------------------------------------------------------
// DELETE
// ---------------------------------------------------------------------------

/// DELETE /{bucket}/{key} — DeleteObject, or AbortMultipartUpload when
/// `uploadId` is present.
#[instrument(skip(state))]
pub async fn delete_object(
    State(state): State<Arc<AppState>>,
    ValidatedPath { bucket, key }: ValidatedPath,
    Query(query): Query<ObjectQuery>,
) -> Result<Response, S3Error> {
    if let Some(upload_id) = &query.upload_id {
        info!("AbortMultipartUpload {}/{} uploadId={}", bucket, key, upload_id);
        state
            .store
            .abort_multipart(&bucket, &key, upload_id)
            .await
            .map_err(|e| upload_error(e, &bucket, &key))?;
        return Ok(StatusCode::NO_CONTENT.into_response());
    }

    info!("DELETE {}/{}", bucket, key);
    state
        .store
        .delete_object(&bucket, &key)
        .await
        .map_err(|e| object_error(e, &bucket, &key))?;

    Ok(StatusCode::NO_CONTENT.into_response())
}

/// POST /{bucket}?delete — delete several objects in one request.
///
/// Keys that fail validation become `<Error>` entries; deleting an
/// absent key counts as success, per S3 semantics.
pub(super) async fn bulk_delete(
    state: &AppState,
    bucket: &str,
    body: &Bytes,
) -> Result<Response, S3Error> {
    let body_str = body_to_utf8(body)?;
    let delete_req = DeleteRequest::from_xml(body_str).map_err(|e| {
        warn!("Failed to parse DeleteObjects XML: {}", e);
        S3Error::MalformedXML
    })?;

    info!(
        "BulkDelete in {} ({} objects)",
        bucket,
        delete_req.objects.len()
    );

    let quiet = delete_req.quiet.unwrap_or(false);
    let mut result = DeleteResult::default();

    for obj in delete_req.objects {
        let key = obj.key.trim_start_matches('/');
        if !valid_object_key(key) {
            let err = S3Error::InvalidObjectKey(format!("/{bucket}/{key}"));
            result.errors.push(DeleteError {
                key: obj.key.clone(),
                code: err.code().to_string(),
                message: err.to_string(),
            });
            continue;
        }

        match state.store.delete_object(bucket, key).await {
            Ok(()) => {
                debug!("Deleted {}/{}", bucket, key);
                result.deleted.push(obj.key.clone());
            }
            Err(e) => {
                let s3_err = object_error(e, bucket, key);
                warn!("Failed to delete {}/{}: {}", bucket, key, s3_err);
                result.errors.push(DeleteError {
                    key: obj.key.clone(),
                    code: s3_err.code().to_string(),
                    message: s3_err.to_string(),
                });
            }
        }
    }

    Ok(xml_response(result.to_xml(quiet)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_range_absent_or_foreign_syntax_is_full() {
        assert_eq!(evaluate_range(None, 17), RangeOutcome::Full);
        assert_eq!(evaluate_range(Some("items=0-3"), 17), RangeOutcome::Full);
        assert_eq!(evaluate_range(Some("bytes=abc"), 17), RangeOutcome::Full);
        assert_eq!(evaluate_range(Some("bytes=1-2-3"), 17), RangeOutcome::Full);
        assert_eq!(evaluate_range(Some("bytes=x-5"), 17), RangeOutcome::Full);
        assert_eq!(evaluate_range(Some("bytes=-"), 17), RangeOutcome::Full);
    }

    #[test]
    fn test_range_bounded() {
        assert_eq!(
            evaluate_range(Some("bytes=0-3"), 17),
            RangeOutcome::Partial { start: 0, end: 3 }
        );
        // End clamped to the last byte
        assert_eq!(
            evaluate_range(Some("bytes=10-99999"), 17),
            RangeOutcome::Partial { start: 10, end: 16 }
        );
    }

    #[test]
    fn test_range_open_ended() {
        assert_eq!(
            evaluate_range(Some("bytes=5-"), 17),
            RangeOutcome::Partial { start: 5, end: 16 }
        );
        assert_eq!(evaluate_range(Some("bytes=17-"), 17), RangeOutcome::Unsatisfiable);
    }

    #[test]
    fn test_range_suffix() {
        assert_eq!(
            evaluate_range(Some("bytes=-5"), 17),
            RangeOutcome::Partial { start: 12, end: 16 }
        );
        // Suffix longer than the object: whole object
        assert_eq!(
            evaluate_range(Some("bytes=-100"), 17),
            RangeOutcome::Partial { start: 0, end: 16 }
        );
        assert_eq!(evaluate_range(Some("bytes=-0"), 17), RangeOutcome::Unsatisfiable);
    }

    #[test]
    fn test_range_unsatisfiable_combinations() {
        assert_eq!(
            evaluate_range(Some("bytes=99999-100000"), 17),
            RangeOutcome::Unsatisfiable
        );
        assert_eq!(
            evaluate_range(Some("bytes=5-2"), 17),
            RangeOutcome::Unsatisfiable
        );
    }

    #[test]
    fn test_range_on_empty_object() {
        assert_eq!(evaluate_range(None, 0), RangeOutcome::Full);
        assert_eq!(evaluate_range(Some("bytes=0-3"), 0), RangeOutcome::Unsatisfiable);
        assert_eq!(evaluate_range(Some("bytes=0-"), 0), RangeOutcome::Unsatisfiable);
        assert_eq!(evaluate_range(Some("bytes=-1"), 0), RangeOutcome::Unsatisfiable);
    }

    #[test]
    fn test_content_disposition_basename() {
        assert_eq!(
            content_disposition("deep/nested/report.pdf"),
            "attachment; filename=\"report.pdf\""
        );
        assert_eq!(
            content_disposition("plain.txt"),
            "attachment; filename=\"plain.txt\""
        );
        assert_eq!(
            content_disposition("weird\"name.txt"),
            "attachment; filename=\"weird_name.txt\""
        );
    }
}
