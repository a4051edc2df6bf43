//! Multipart upload S3 handlers: InitiateMultipartUpload and
//! CompleteMultipartUpload, plus the bucket-level POST dispatch.

use super::{
    body_to_utf8, object_error, upload_error, xml_response, AppState, ObjectQuery, S3Error,
};
use crate::api::extractors::{ValidatedBucket, ValidatedPath};
use crate::api::xml::{
    CompleteMultipartUploadRequest, CompleteMultipartUploadResult, InitiateMultipartUploadResult,
};
use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::response::Response;
use std::sync::Arc;
use tracing::{info, instrument, warn};

/// Query parameters for bucket-level POST operations
#[derive(Debug, serde::Deserialize, Default)]
pub struct BucketPostQuery {
    pub delete: Option<String>,
    pub uploads: Option<String>,
    #[serde(rename = "uploadId")]
    pub upload_id: Option<String>,
}

/// POST /{bucket}/{key} — dispatches multipart operations by query flag.
#[instrument(skip(state, body))]
pub async fn post_object(
    State(state): State<Arc<AppState>>,
    ValidatedPath { bucket, key }: ValidatedPath,
    Query(query): Query<ObjectQuery>,
    body: Bytes,
) -> Result<Response, S3Error> {
    if query.uploads.is_some() {
        initiate_multipart_upload(&state, &bucket, &key).await
    } else if let Some(upload_id) = &query.upload_id {
        complete_multipart_upload(&state, &bucket, &key, upload_id, &body).await
    } else {
        Err(S3Error::InvalidRequest(
            "POST on an object requires ?uploads or ?uploadId".to_string(),
        ))
    }
}

/// POST /{bucket} — bulk delete, or multipart operations addressed to
/// the empty key.
#[instrument(skip(state, body))]
pub async fn post_bucket(
    State(state): State<Arc<AppState>>,
    ValidatedBucket(bucket): ValidatedBucket,
    Query(query): Query<BucketPostQuery>,
    body: Bytes,
) -> Result<Response, S3Error> {
    if query.delete.is_some() {
        super::object::bulk_delete(&state, &bucket, &body).await
    } else if query.uploads.is_some() {
        initiate_multipart_upload(&state, &bucket, "").await
    } else if let Some(upload_id) = &query.upload_id {
        complete_multipart_upload(&state, &bucket, "", upload_id, &body).await
    } else {
        Err(S3Error::InvalidRequest(
            "POST requires ?delete, ?uploads, or ?uploadId".to_string(),
        ))
    }
}

/// POST ...?uploads — InitiateMultipartUpload
async fn initiate_multipart_upload(
    state: &AppState,
    bucket: &str,
    key: &str,
) -> Result<Response, S3Error> {
    info!("InitiateMultipartUpload {}/{}", bucket, key);

    let upload_id = state
        .store
        .initiate_multipart(bucket, key)
        .await
        .map_err(|e| object_error(e, bucket, key))?;

    let xml = InitiateMultipartUploadResult {
        bucket: bucket.to_string(),
        key: key.to_string(),
        upload_id,
    }
    .to_xml();
    Ok(xml_response(xml))
}

/// POST ...?uploadId=X — CompleteMultipartUpload
async fn complete_multipart_upload(
    state: &AppState,
    bucket: &str,
    key: &str,
    upload_id: &str,
    body: &Bytes,
) -> Result<Response, S3Error> {
    info!("CompleteMultipartUpload {}/{} uploadId={}", bucket, key, upload_id);

    let body_str = body_to_utf8(body)?;
    let complete_req = CompleteMultipartUploadRequest::from_xml(body_str).map_err(|e| {
        warn!("Failed to parse CompleteMultipartUpload XML: {}", e);
        S3Error::MalformedXML
    })?;

    let mut part_numbers = Vec::with_capacity(complete_req.parts.len());
    for part in &complete_req.parts {
        if !(1..=i64::from(u32::MAX)).contains(&part.part_number) {
            return Err(S3Error::InvalidPart(format!(
                "part number {} is out of range",
                part.part_number
            )));
        }
        part_numbers.push(part.part_number as u32);
    }

    state
        .store
        .complete_multipart(bucket, key, upload_id, &part_numbers)
        .await
        .map_err(|e| upload_error(e, bucket, key))?;

    let xml = CompleteMultipartUploadResult {
        location: format!("/{bucket}/{key}"),
        bucket: bucket.to_string(),
        key: key.to_string(),
        upload_id: upload_id.to_string(),
    }
    .to_xml();
    Ok(xml_response(xml))
}
