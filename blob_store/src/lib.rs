//! Object storage client abstraction for r2-stream.
//!
//! The crate exposes one trait, [`ObjectStorageClient`], that accepts a byte
//! stream and stores it as a single object, plus the bucket operations an
//! uploader needs before it can write:
//!
//! - [`S3Storage`]: Cloudflare R2 (or any S3-compatible endpoint). Data goes
//!   through `object_store`'s multipart writer, bucket HEAD/CREATE through
//!   `aws-sdk-s3`.
//! - [`InMemoryStorage`]: buckets backed by `object_store`'s in-memory store,
//!   used as the mock backend in tests.
//!
//! Both backends share [`StreamingWriter`], which sends bodies smaller than
//! one part with a single PUT and everything else as a multipart upload,
//! hashing the body with SHA256 on the way.
//!
//! # Usage
//!
//! ```rust,no_run
//! use blob_store::{ObjectDestination, ObjectStorageClient, R2Credentials, S3Storage, S3StorageConfig};
//! use bytes::Bytes;
//! use futures::stream;
//!
//! # async fn example() -> Result<(), blob_store::BlobError> {
//! let config = S3StorageConfig::new(R2Credentials::new("account", "key-id", "secret"));
//! let storage = S3Storage::new(config).await?;
//!
//! storage.ensure_bucket("media").await?;
//! let body = Box::pin(stream::iter(vec![Ok(Bytes::from("hello world"))]));
//! let result = storage
//!     .put_stream(&ObjectDestination::new("media", "hello.txt"), body, Some(11))
//!     .await?;
//! assert_eq!(result.size_bytes, 11);
//! # Ok(())
//! # }
//! ```

mod backends;
mod config;
mod error;
mod metrics;
mod storage;
mod traits;

pub use backends::memory::InMemoryStorage;
#[cfg(feature = "aws")]
pub use backends::s3::S3Storage;
pub use config::{
    R2Credentials,
    S3StorageConfig,
    DEFAULT_MAX_CONCURRENT_PARTS,
    DEFAULT_PART_SIZE,
    MIN_PART_SIZE,
    R2_DOMAIN,
};
pub use error::{BlobError, BlobResult};
pub use metrics::BlobMetrics;
pub use storage::{PutResult, StreamUploadOptions, StreamingWriter};
pub use traits::{BodyStream, BucketStatus, ObjectDestination, ObjectStorageClient};
