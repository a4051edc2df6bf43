//! S3 API implementation

mod aws_chunked;
mod errors;
mod extractors;
mod validate;
mod xml;

pub mod auth;
pub mod context;
pub mod handlers;

pub use errors::S3Error;
pub use extractors::{ValidatedBucket, ValidatedPath};
