//! In-memory object storage backend.
//!
//! Every bucket is an [`InMemory`] object store, created through
//! [`ObjectStorageClient::create_bucket`] like a real bucket. Uploads go
//! through the same [`StreamingWriter`] as the S3 backend, so single-put vs
//! multipart behavior is exercised without a network.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, PoisonError},
};

use async_trait::async_trait;
use bytes::Bytes;
use object_store::{memory::InMemory, path::Path, ObjectStore};

use crate::{
    BlobError,
    BlobResult,
    BodyStream,
    ObjectDestination,
    ObjectStorageClient,
    PutResult,
    StreamUploadOptions,
    StreamingWriter,
};

/// In-memory storage with a bucket registry.
pub struct InMemoryStorage {
    buckets: Mutex<HashMap<String, Arc<InMemory>>>,
    options: StreamUploadOptions,
}

impl InMemoryStorage {
    pub fn new(options: StreamUploadOptions) -> Self {
        Self {
            buckets: Mutex::new(HashMap::new()),
            options,
        }
    }

    /// Registers `bucket` up front.
    pub fn with_bucket(self, bucket: &str) -> Self {
        self.lock()
            .insert(bucket.to_string(), Arc::new(InMemory::new()));
        self
    }

    /// Reads back a stored object.
    pub async fn object(&self, destination: &ObjectDestination) -> BlobResult<Bytes> {
        let store = self.bucket(&destination.bucket)?;
        let result = store.get(&Path::from(destination.key.as_str())).await?;
        Ok(result.bytes().await?)
    }

    /// Number of buckets created so far.
    pub fn bucket_count(&self) -> usize {
        self.lock().len()
    }

    fn bucket(&self, bucket: &str) -> BlobResult<Arc<InMemory>> {
        self.lock()
            .get(bucket)
            .cloned()
            .ok_or_else(|| BlobError::NoSuchBucket {
                bucket: bucket.to_string(),
            })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Arc<InMemory>>> {
        self.buckets.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for InMemoryStorage {
    fn default() -> Self {
        Self::new(StreamUploadOptions::default())
    }
}

#[async_trait]
impl ObjectStorageClient for InMemoryStorage {
    async fn put_stream(
        &self,
        destination: &ObjectDestination,
        body: BodyStream,
        _size_hint: Option<u64>,
    ) -> BlobResult<PutResult> {
        let store = self.bucket(&destination.bucket)?;
        let writer = StreamingWriter::new(store, self.options);
        writer
            .put(
                &Path::from(destination.key.as_str()),
                format!("memory://{}", destination),
                body,
            )
            .await
    }

    async fn bucket_exists(&self, bucket: &str) -> BlobResult<bool> {
        Ok(self.lock().contains_key(bucket))
    }

    async fn create_bucket(&self, bucket: &str) -> BlobResult<()> {
        let mut buckets = self.lock();
        if buckets.contains_key(bucket) {
            return Err(BlobError::BucketAlreadyExists {
                bucket: bucket.to_string(),
            });
        }
        buckets.insert(bucket.to_string(), Arc::new(InMemory::new()));
        Ok(())
    }
}
