//! S3 error types and XML responses

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

use super::xml::escape_xml;

/// S3 API errors
///
/// Every failure the server can surface to a client, with its S3 error
/// code and HTTP status. Variants carry the `/bucket/key` resource scope
/// where one is known; internal detail (paths, io error text) stays in
/// the logs and never reaches the response body.
#[derive(Debug, Clone, Error)]
pub enum S3Error {
    #[error("Access Denied.")]
    AccessDenied,

    #[error("The AWS access key ID you provided does not exist in our records.")]
    InvalidAccessKeyId,

    #[error("The request signature we calculated does not match the signature you provided. Check your key and signing method.")]
    SignatureDoesNotMatch,

    #[error("Error parsing the authorization parameters: {0}")]
    AuthorizationQueryParametersError(String),

    #[error("The difference between the request time and the server's time is too large.")]
    RequestTimeTooSkewed,

    #[error("The provided token has expired.")]
    ExpiredToken,

    #[error("The specified bucket is not valid.")]
    InvalidBucketName(String),

    #[error("The specified object key is not valid.")]
    InvalidObjectKey(String),

    #[error("InvalidPart: {0}")]
    InvalidPart(String),

    #[error("The XML you provided was not well-formed or did not validate against our published schema.")]
    MalformedXML,

    #[error("InvalidRequest: {0}")]
    InvalidRequest(String),

    #[error("Your proposed upload exceeds the maximum allowed size.")]
    EntityTooLarge { size: u64, max: u64 },

    #[error("The specified method is not allowed against this resource.")]
    MethodNotAllowed,

    #[error("The specified key does not exist.")]
    NoSuchKey(String),

    #[error("The specified upload does not exist. The upload ID may be invalid, or the upload may have been aborted or completed.")]
    NoSuchUpload(String),

    #[error("We encountered an internal error. Please try again.")]
    InternalError,
}

impl S3Error {
    /// Get the S3 error code
    pub fn code(&self) -> &'static str {
        match self {
            S3Error::AccessDenied => "AccessDenied",
            S3Error::InvalidAccessKeyId => "InvalidAccessKeyId",
            S3Error::SignatureDoesNotMatch => "SignatureDoesNotMatch",
            S3Error::AuthorizationQueryParametersError(_) => "AuthorizationQueryParametersError",
            S3Error::RequestTimeTooSkewed => "RequestTimeTooSkewed",
            S3Error::ExpiredToken => "ExpiredToken",
            S3Error::InvalidBucketName(_) => "InvalidBucketName",
            S3Error::InvalidObjectKey(_) => "InvalidObjectKey",
            S3Error::InvalidPart(_) => "InvalidPart",
            S3Error::MalformedXML => "MalformedXML",
            S3Error::InvalidRequest(_) => "InvalidRequest",
            S3Error::EntityTooLarge { .. } => "EntityTooLarge",
            S3Error::MethodNotAllowed => "MethodNotAllowed",
            S3Error::NoSuchKey(_) => "NoSuchKey",
            S3Error::NoSuchUpload(_) => "NoSuchUpload",
            S3Error::InternalError => "InternalError",
        }
    }

    /// Get the HTTP status code
    pub fn status_code(&self) -> StatusCode {
        match self {
            S3Error::AccessDenied
            | S3Error::InvalidAccessKeyId
            | S3Error::SignatureDoesNotMatch
            | S3Error::RequestTimeTooSkewed
            | S3Error::ExpiredToken => StatusCode::FORBIDDEN,

            S3Error::AuthorizationQueryParametersError(_)
            | S3Error::InvalidBucketName(_)
            | S3Error::InvalidObjectKey(_)
            | S3Error::InvalidPart(_)
            | S3Error::MalformedXML
            | S3Error::InvalidRequest(_) => StatusCode::BAD_REQUEST,

            S3Error::EntityTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            S3Error::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,

            S3Error::NoSuchKey(_) | S3Error::NoSuchUpload(_) => StatusCode::NOT_FOUND,

            S3Error::InternalError => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// The `<Resource>` element: the bucket/key scope when one is known,
    /// otherwise `/`.
    fn resource(&self) -> &str {
        match self {
            S3Error::InvalidBucketName(r)
            | S3Error::InvalidObjectKey(r)
            | S3Error::NoSuchKey(r)
            | S3Error::NoSuchUpload(r) => r,
            _ => "/",
        }
    }

    /// Generate the XML error response body
    pub fn to_xml(&self) -> String {
        format!(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<Error>
    <Code>{}</Code>
    <Message>{}</Message>
    <Resource>{}</Resource>
</Error>"#,
            self.code(),
            escape_xml(&self.to_string()),
            escape_xml(self.resource()),
        )
    }
}

impl IntoResponse for S3Error {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = self.to_xml();

        (status, [("Content-Type", "application/xml")], body).into_response()
    }
}
