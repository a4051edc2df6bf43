//! Bucket-level S3 handlers: listing, plus the thin compatibility
//! surface for implicit buckets (create is a mkdir, delete best-effort).

use super::{xml_response, AppState, S3Error};
use crate::api::extractors::ValidatedBucket;
use crate::api::xml::{ListBucketResult, S3Object};
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use std::sync::Arc;
use tracing::{error, info, instrument};

/// Query parameters for bucket-level GET operations
#[derive(Debug, serde::Deserialize, Default)]
pub struct BucketGetQuery {
    pub prefix: Option<String>,
}

/// GET /{bucket}?prefix=... — ListObjects
///
/// MaxKeys is declared but not enforced: every match is returned in one
/// unpaginated response, sorted by key.
#[instrument(skip(state))]
pub async fn list_objects(
    State(state): State<Arc<AppState>>,
    ValidatedBucket(bucket): ValidatedBucket,
    Query(query): Query<BucketGetQuery>,
) -> Result<Response, S3Error> {
    let prefix = query.prefix.unwrap_or_default();
    info!("LIST {}/{}*", bucket, prefix);

    let objects = state
        .store
        .list_objects(&bucket, &prefix)
        .await
        .map_err(|e| {
            error!("Listing {} failed: {}", bucket, e);
            S3Error::InternalError
        })?;

    let contents: Vec<S3Object> = objects
        .into_iter()
        .map(|o| S3Object {
            key: o.key,
            size: o.size,
            last_modified: o.modified,
        })
        .collect();

    let xml = ListBucketResult {
        name: bucket,
        prefix,
        max_keys: 1000,
        is_truncated: false,
        contents,
    }
    .to_xml();

    Ok(xml_response(xml))
}

/// PUT /{bucket} — CreateBucket compatibility. Buckets are implicit, so
/// this only materializes the directory.
#[instrument(skip(state))]
pub async fn create_bucket(
    State(state): State<Arc<AppState>>,
    ValidatedBucket(bucket): ValidatedBucket,
) -> Result<Response, S3Error> {
    info!("CREATE bucket {}", bucket);

    state.store.create_bucket(&bucket).await.map_err(|e| {
        error!("Creating bucket {} failed: {}", bucket, e);
        S3Error::InternalError
    })?;

    Ok((StatusCode::OK, [("Location", format!("/{bucket}"))], "").into_response())
}

/// DELETE /{bucket} — best-effort removal of the (empty) bucket
/// directory. Like DeleteObject, absence is success.
#[instrument(skip(state))]
pub async fn delete_bucket(
    State(state): State<Arc<AppState>>,
    ValidatedBucket(bucket): ValidatedBucket,
) -> Response {
    info!("DELETE bucket {}", bucket);
    state.store.delete_bucket(&bucket).await;
    StatusCode::NO_CONTENT.into_response()
}

/// HEAD /{bucket} is outside the dispatch surface.
pub async fn head_bucket(ValidatedBucket(_bucket): ValidatedBucket) -> S3Error {
    S3Error::InvalidRequest("HEAD is not supported at bucket level".to_string())
}
