//! Custom Axum extractors for S3 API validation
//!
//! These extractors re-check bucket and key syntax at handler entry,
//! eliminating repetitive validation code from handlers. The pre-route
//! middleware performs the same checks earlier (before authentication);
//! here they guard handlers invoked through any other path.

use super::errors::S3Error;
use super::validate::{valid_bucket_name, valid_object_key};
use axum::{
    async_trait,
    extract::{FromRequestParts, Path},
    http::request::Parts,
};

/// Validated bucket extractor
///
/// Rejects with `InvalidBucketName` when the path's bucket segment fails
/// syntactic validation.
#[derive(Debug, Clone)]
pub struct ValidatedBucket(pub String);

impl std::ops::Deref for ValidatedBucket {
    type Target = str;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for ValidatedBucket
where
    S: Send + Sync,
{
    type Rejection = S3Error;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let Path(bucket): Path<String> = Path::from_request_parts(parts, state)
            .await
            .map_err(|_| S3Error::InvalidRequest("Invalid bucket path".to_string()))?;

        if !valid_bucket_name(&bucket) {
            return Err(S3Error::InvalidBucketName(format!("/{bucket}")));
        }

        Ok(ValidatedBucket(bucket))
    }
}

/// Validated bucket and key extractor
///
/// Validates the bucket name, normalizes the key by removing leading
/// slashes, and validates the key.
#[derive(Debug, Clone)]
pub struct ValidatedPath {
    pub bucket: String,
    pub key: String,
}

#[async_trait]
impl<S> FromRequestParts<S> for ValidatedPath
where
    S: Send + Sync,
{
    type Rejection = S3Error;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let Path((bucket, key)): Path<(String, String)> = Path::from_request_parts(parts, state)
            .await
            .map_err(|_| S3Error::InvalidRequest("Invalid bucket/key path".to_string()))?;

        if !valid_bucket_name(&bucket) {
            return Err(S3Error::InvalidBucketName(format!("/{bucket}")));
        }

        let key = key.trim_start_matches('/').to_string();
        if !valid_object_key(&key) {
            return Err(S3Error::InvalidObjectKey(format!("/{bucket}/{key}")));
        }

        Ok(ValidatedPath { bucket, key })
    }
}
