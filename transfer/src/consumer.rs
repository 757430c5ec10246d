//! Upload consumer: drains the read end of the bridge into the storage
//! client and reports the outcome through the session's completion signal.

use std::{
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};

use blob_store::{BlobError, BodyStream, BucketStatus, ObjectDestination, ObjectStorageClient};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn, Instrument};

use crate::{
    progress::ProgressTracker,
    BridgeReader,
    CompletionSignal,
    ProgressCallback,
    TransferError,
    TransferOutcome,
};

/// What a successful session produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadSummary {
    pub destination: ObjectDestination,
    pub url: String,
    pub size_bytes: u64,
    pub sha256_hash: String,
    pub e_tag: Option<String>,
    /// Parts the storage client sent the object in.
    pub parts: u64,
    pub multipart: bool,
    /// Chunks taken from the bridge.
    pub chunks: u64,
}

/// Drives one streaming upload from a [`BridgeReader`].
pub struct UploadConsumer {
    client: Arc<dyn ObjectStorageClient>,
    destination: ObjectDestination,
    cancel: CancellationToken,
    ensure_bucket: bool,
    size_hint: Option<u64>,
    progress: Option<ProgressCallback>,
}

impl UploadConsumer {
    pub fn new(
        client: Arc<dyn ObjectStorageClient>,
        destination: ObjectDestination,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            client,
            destination,
            cancel,
            ensure_bucket: true,
            size_hint: None,
            progress: None,
        }
    }

    /// Whether the bucket is created (if missing) before uploading.
    pub fn ensure_bucket(mut self, ensure_bucket: bool) -> Self {
        self.ensure_bucket = ensure_bucket;
        self
    }

    pub fn size_hint(mut self, size_hint: Option<u64>) -> Self {
        self.size_hint = size_hint;
        self
    }

    pub fn progress(mut self, progress: Option<ProgressCallback>) -> Self {
        self.progress = progress;
        self
    }

    /// Runs the upload on its own task and completes `signal` once the
    /// storage client has returned.
    pub fn spawn(
        self,
        reader: BridgeReader,
        signal: CompletionSignal,
        deadline: Option<Duration>,
    ) -> JoinHandle<()> {
        tokio::spawn(
            async move {
                let outcome = self.run_with_deadline(reader, deadline).await;
                match &outcome {
                    Ok(summary) => info!(
                        url = %summary.url,
                        size_bytes = summary.size_bytes,
                        parts = summary.parts,
                        "upload completed"
                    ),
                    Err(err) => warn!(error = %err, "upload failed"),
                }
                signal.complete(outcome);
            }
            .in_current_span(),
        )
    }

    async fn run_with_deadline(
        &self,
        reader: BridgeReader,
        deadline: Option<Duration>,
    ) -> TransferOutcome {
        let upload = self.run_upload(reader);
        let Some(deadline) = deadline else {
            return upload.await;
        };

        tokio::pin!(upload);
        tokio::select! {
            outcome = &mut upload => outcome,
            _ = tokio::time::sleep(deadline) => {
                warn!(?deadline, "transfer deadline exceeded, cancelling");
                self.cancel.cancel();
                // Do not report completion while the upload call is still running.
                let _ = upload.await;
                Err(TransferError::DeadlineExceeded { after: deadline })
            }
        }
    }

    /// Provisions the bucket if configured, then streams everything the
    /// reader yields into the storage client.
    ///
    /// The reader is closed when this returns, so a producer still writing
    /// fails with [`TransferError::ClosedPipe`] on its next write.
    pub async fn run_upload(&self, mut reader: BridgeReader) -> TransferOutcome {
        if self.ensure_bucket {
            if let Err(err) = self.provision_bucket().await {
                reader.close();
                return Err(err);
            }
        }

        let tracker = ProgressTracker::new(self.size_hint, self.progress.clone());
        let body_failure = Arc::new(Mutex::new(None));
        let body = body_stream(reader, tracker.clone(), body_failure.clone());

        debug!(destination = %self.destination, size_hint = ?self.size_hint, "uploading");
        let result = self
            .client
            .put_stream(&self.destination, body, self.size_hint)
            .await;

        match result {
            Ok(put) => Ok(UploadSummary {
                destination: self.destination.clone(),
                url: put.url,
                size_bytes: put.size_bytes,
                sha256_hash: put.sha256_hash,
                e_tag: put.e_tag,
                parts: put.parts,
                multipart: put.multipart,
                chunks: tracker.snapshot().chunks,
            }),
            Err(err) => {
                let failure = body_failure
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .take();
                Err(failure.unwrap_or_else(|| TransferError::upload_transport(err)))
            }
        }
    }

    async fn provision_bucket(&self) -> Result<(), TransferError> {
        let bucket = &self.destination.bucket;
        let status = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Err(TransferError::Cancelled),
            status = self.client.ensure_bucket(bucket) => status,
        };
        match status {
            Ok(BucketStatus::Created) => info!(bucket = %bucket, "created destination bucket"),
            Ok(BucketStatus::AlreadyExists) => {
                info!(bucket = %bucket, "bucket already exists, continuing")
            }
            Err(err) => {
                return Err(TransferError::BucketProvisioning {
                    bucket: bucket.clone(),
                    source: Arc::new(err),
                })
            }
        }
        Ok(())
    }
}

/// Adapts the reader into the body stream the storage client consumes.
///
/// A bridge error is recorded in `failure` before being yielded, so the
/// session reports it rather than the storage client's wrapped version.
fn body_stream(
    mut reader: BridgeReader,
    tracker: ProgressTracker,
    failure: Arc<Mutex<Option<TransferError>>>,
) -> BodyStream {
    Box::pin(async_stream::stream! {
        loop {
            match reader.read_chunk().await {
                Ok(Some(chunk)) => {
                    tracker.advance(chunk.len());
                    yield Ok(chunk);
                }
                Ok(None) => break,
                Err(err) => {
                    *failure.lock().unwrap_or_else(PoisonError::into_inner) = Some(err.clone());
                    yield Err(BlobError::body(err));
                    break;
                }
            }
        }
    })
}
