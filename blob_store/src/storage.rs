//! Streaming object writes through `object_store`.

use std::sync::Arc;

use bytes::BytesMut;
use futures::StreamExt;
use object_store::{path::Path, ObjectStore, PutPayload, WriteMultipart};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::{
    config::{DEFAULT_MAX_CONCURRENT_PARTS, DEFAULT_PART_SIZE},
    metrics::Operation,
    BlobMetrics,
    BlobResult,
    BodyStream,
};

/// Result of a PUT operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PutResult {
    /// The URL where the object was stored.
    pub url: String,

    /// Size in bytes.
    pub size_bytes: u64,

    /// SHA256 hash of the data.
    pub sha256_hash: String,

    /// ETag reported by the store, if any.
    pub e_tag: Option<String>,

    /// Number of parts the object was sent in; 1 for a single PUT.
    pub parts: u64,

    /// Whether the multipart protocol was used.
    pub multipart: bool,
}

/// How a body is split into parts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamUploadOptions {
    /// Size of every multipart part except the last one.
    pub part_size: usize,

    /// Parts allowed in flight before the body stops being polled.
    pub max_concurrent_parts: usize,
}

impl Default for StreamUploadOptions {
    fn default() -> Self {
        Self {
            part_size: DEFAULT_PART_SIZE,
            max_concurrent_parts: DEFAULT_MAX_CONCURRENT_PARTS,
        }
    }
}

/// Uploads body streams to an [`ObjectStore`] without buffering more than
/// `part_size * max_concurrent_parts` bytes.
#[derive(Clone)]
pub struct StreamingWriter {
    object_store: Arc<dyn ObjectStore>,
    options: StreamUploadOptions,
    metrics: Option<BlobMetrics>,
    /// Bucket label for metrics.
    bucket: String,
}

impl StreamingWriter {
    pub fn new(object_store: Arc<dyn ObjectStore>, options: StreamUploadOptions) -> Self {
        Self {
            object_store,
            options,
            metrics: None,
            bucket: String::new(),
        }
    }

    /// Records upload metrics labelled with `bucket`.
    pub fn with_metrics(mut self, metrics: Option<BlobMetrics>, bucket: &str) -> Self {
        self.metrics = metrics;
        self.bucket = bucket.to_string();
        self
    }

    /// Upload data from a stream.
    ///
    /// The first part is buffered before anything is sent: a body that ends
    /// within it is stored with a single PUT, anything longer switches to a
    /// multipart upload. The SHA256 of the body is computed along the way.
    /// Any failure after the multipart upload was created aborts it.
    pub async fn put(&self, path: &Path, url: String, body: BodyStream) -> BlobResult<PutResult> {
        let _timer = self
            .metrics
            .as_ref()
            .map(|m| m.start(Operation::Put, &self.bucket));

        let result = self.put_inner(path, url, body).await;
        if let Some(metrics) = &self.metrics {
            match &result {
                Ok(put) => metrics.record_upload(&self.bucket, put.size_bytes, put.multipart),
                Err(_) => metrics.record_failure(Operation::Put, &self.bucket),
            }
        }
        result
    }

    async fn put_inner(
        &self,
        path: &Path,
        url: String,
        mut body: BodyStream,
    ) -> BlobResult<PutResult> {
        let part_size = self.options.part_size.max(1);
        let mut hasher = Sha256::new();
        let mut size_bytes: u64 = 0;
        let mut head = BytesMut::new();

        while head.len() < part_size {
            let Some(chunk) = body.next().await else {
                let result = self
                    .object_store
                    .put(path, PutPayload::from(head.freeze()))
                    .await?;
                debug!(path = %path, size_bytes, "stored object with a single put");
                return Ok(PutResult {
                    url,
                    size_bytes,
                    sha256_hash: format!("{:x}", hasher.finalize()),
                    e_tag: result.e_tag,
                    parts: 1,
                    multipart: false,
                });
            };
            let chunk = chunk?;
            hasher.update(&chunk);
            size_bytes += chunk.len() as u64;
            head.extend_from_slice(&chunk);
        }

        let upload = self.object_store.put_multipart(path).await?;
        let mut writer = WriteMultipart::new_with_chunk_size(upload, part_size);
        writer.put(head.freeze());

        while let Some(chunk) = body.next().await {
            let chunk = match chunk {
                Ok(chunk) => chunk,
                Err(err) => {
                    abort(writer, path).await;
                    return Err(err);
                }
            };
            if let Err(err) = writer
                .wait_for_capacity(self.options.max_concurrent_parts)
                .await
            {
                abort(writer, path).await;
                return Err(err.into());
            }
            hasher.update(&chunk);
            size_bytes += chunk.len() as u64;
            writer.put(chunk);
        }

        let result = writer.finish().await?;
        let parts = size_bytes.div_ceil(part_size as u64);
        debug!(path = %path, size_bytes, parts, "completed multipart upload");

        Ok(PutResult {
            url,
            size_bytes,
            sha256_hash: format!("{:x}", hasher.finalize()),
            e_tag: result.e_tag,
            parts,
            multipart: true,
        })
    }
}

async fn abort(writer: WriteMultipart, path: &Path) {
    if let Err(err) = writer.abort().await {
        warn!(path = %path, error = %err, "failed to abort multipart upload");
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use futures::stream;
    use object_store::memory::InMemory;

    use super::*;
    use crate::BlobError;

    fn writer(part_size: usize) -> (Arc<InMemory>, StreamingWriter) {
        let store = Arc::new(InMemory::new());
        let writer = StreamingWriter::new(
            store.clone(),
            StreamUploadOptions {
                part_size,
                max_concurrent_parts: 1,
            },
        );
        (store, writer)
    }

    fn body(chunks: Vec<BlobResult<Bytes>>) -> BodyStream {
        Box::pin(stream::iter(chunks))
    }

    #[tokio::test]
    async fn test_small_body_uses_single_put() {
        let (store, writer) = writer(1024);
        let path = Path::from("small.txt");

        let result = writer
            .put(
                &path,
                "memory://bucket/small.txt".to_string(),
                body(vec![Ok(Bytes::from("hello ")), Ok(Bytes::from("world"))]),
            )
            .await
            .unwrap();

        assert_eq!(result.size_bytes, 11);
        assert!(!result.multipart);
        assert_eq!(result.parts, 1);
        let stored = store.get(&path).await.unwrap().bytes().await.unwrap();
        assert_eq!(stored, Bytes::from("hello world"));
    }

    #[tokio::test]
    async fn test_large_body_uses_multipart() {
        let (store, writer) = writer(100);
        let path = Path::from("large.bin");
        let chunks: Vec<BlobResult<Bytes>> =
            (0..10u8).map(|i| Ok(Bytes::from(vec![i; 64]))).collect();

        let result = writer
            .put(&path, "memory://bucket/large.bin".to_string(), body(chunks))
            .await
            .unwrap();

        assert_eq!(result.size_bytes, 640);
        assert!(result.multipart);
        assert_eq!(result.parts, 7);
        let stored = store.get(&path).await.unwrap().bytes().await.unwrap();
        assert_eq!(stored.len(), 640);
        assert_eq!(&stored[64..128], &[1u8; 64][..]);
    }

    #[tokio::test]
    async fn test_empty_body_stores_empty_object() {
        let (store, writer) = writer(100);
        let path = Path::from("empty");

        let result = writer
            .put(&path, "memory://bucket/empty".to_string(), body(vec![]))
            .await
            .unwrap();

        assert_eq!(result.size_bytes, 0);
        assert_eq!(
            result.sha256_hash,
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
        let meta = store.head(&path).await.unwrap();
        assert_eq!(meta.size, 0);
    }

    #[tokio::test]
    async fn test_body_error_aborts_without_object() {
        let (store, writer) = writer(10);
        let path = Path::from("broken");
        let chunks = vec![
            Ok(Bytes::from(vec![0u8; 16])),
            Err(BlobError::body(anyhow::anyhow!("source went away"))),
        ];

        let err = writer
            .put(&path, "memory://bucket/broken".to_string(), body(chunks))
            .await
            .unwrap_err();

        assert!(err.is_body_error());
        assert!(store.head(&path).await.is_err());
    }
}
