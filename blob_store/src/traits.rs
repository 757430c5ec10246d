//! Core object storage client trait.

use std::fmt;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::{BlobError, BlobResult, PutResult};

/// Body of a streaming upload.
pub type BodyStream = BoxStream<'static, BlobResult<Bytes>>;

/// Where an object is written.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ObjectDestination {
    pub bucket: String,
    pub key: String,
}

impl ObjectDestination {
    pub fn new(bucket: &str, key: &str) -> Self {
        Self {
            bucket: bucket.to_string(),
            key: key.to_string(),
        }
    }
}

impl fmt::Display for ObjectDestination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.bucket, self.key)
    }
}

/// Outcome of [`ObjectStorageClient::ensure_bucket`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BucketStatus {
    Created,
    AlreadyExists,
}

/// An object-storage client that accepts a byte stream and stores it as one
/// object.
///
/// Implementations decide how the body is transmitted: a body smaller than
/// one part goes out as a single PUT, anything larger as a multipart upload
/// with part numbering, bounded concurrency and completion handled
/// internally. Callers only supply the destination and the stream.
#[async_trait]
pub trait ObjectStorageClient: Send + Sync {
    /// Upload everything `body` yields as the object at `destination`.
    ///
    /// `size_hint` is the expected total length when known. A body error
    /// aborts the upload and is returned as [`BlobError::BodyError`].
    async fn put_stream(
        &self,
        destination: &ObjectDestination,
        body: BodyStream,
        size_hint: Option<u64>,
    ) -> BlobResult<PutResult>;

    /// Whether `bucket` exists and is reachable with the configured
    /// credentials.
    async fn bucket_exists(&self, bucket: &str) -> BlobResult<bool>;

    /// Create `bucket`.
    ///
    /// Returns [`BlobError::BucketAlreadyExists`] when the bucket is already
    /// there.
    async fn create_bucket(&self, bucket: &str) -> BlobResult<()>;

    /// Make sure `bucket` exists, creating it when missing.
    ///
    /// Idempotent: an existing bucket, or one created concurrently between
    /// the check and the create, is reported as
    /// [`BucketStatus::AlreadyExists`].
    async fn ensure_bucket(&self, bucket: &str) -> BlobResult<BucketStatus> {
        if self.bucket_exists(bucket).await? {
            return Ok(BucketStatus::AlreadyExists);
        }
        match self.create_bucket(bucket).await {
            Ok(()) => {
                info!(bucket = %bucket, "created bucket");
                Ok(BucketStatus::Created)
            }
            Err(BlobError::BucketAlreadyExists { .. }) => Ok(BucketStatus::AlreadyExists),
            Err(err) => Err(err),
        }
    }
}
