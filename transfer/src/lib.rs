//! Streams a local file into object storage as a single object.
//!
//! A [`ChunkProducer`] reads the file and pushes fixed-size chunks into a
//! [`bridge`]; an [`UploadConsumer`] running on its own task drains the
//! other end into an [`ObjectStorageClient`]. The bridge holds at most one
//! chunk, so the producer runs at the pace of the upload. The consumer
//! reports its outcome once through the [`TransferSession`].
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use blob_store::{InMemoryStorage, ObjectDestination};
//! use transfer::{run_transfer, TransferRequest};
//!
//! # async fn example() -> Result<(), transfer::TransferError> {
//! let client = Arc::new(InMemoryStorage::default());
//! let request = TransferRequest::new("video.mp4", ObjectDestination::new("media", "video.mp4"));
//! let summary = run_transfer(client, request, None).await?;
//! println!("uploaded {} bytes to {}", summary.size_bytes, summary.url);
//! # Ok(())
//! # }
//! ```

use std::{path::PathBuf, sync::Arc, time::Duration};

use blob_store::{ObjectDestination, ObjectStorageClient};
use tokio_util::sync::CancellationToken;
use tracing::{info, info_span, warn, Instrument};

mod bridge;
mod consumer;
mod error;
mod producer;
mod progress;
mod session;

pub use bridge::{bridge, BridgeReader, BridgeWriter};
pub use consumer::{UploadConsumer, UploadSummary};
pub use error::TransferError;
pub use producer::{ChunkProducer, ProducerReport, DEFAULT_CHUNK_SIZE};
pub use progress::{ProgressCallback, TransferProgress};
pub use session::{
    completion,
    CompletionSignal,
    CompletionWaiter,
    SessionOptions,
    TransferOutcome,
    TransferSession,
};

/// A file to upload and where to put it.
#[derive(Debug, Clone)]
pub struct TransferRequest {
    pub source: PathBuf,
    pub destination: ObjectDestination,
    pub chunk_size: usize,
    pub ensure_bucket: bool,
    pub deadline: Option<Duration>,
}

impl TransferRequest {
    pub fn new(source: impl Into<PathBuf>, destination: ObjectDestination) -> Self {
        Self {
            source: source.into(),
            destination,
            chunk_size: DEFAULT_CHUNK_SIZE,
            ensure_bucket: true,
            deadline: None,
        }
    }

    pub fn chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    pub fn ensure_bucket(mut self, ensure_bucket: bool) -> Self {
        self.ensure_bucket = ensure_bucket;
        self
    }

    pub fn deadline(mut self, deadline: Option<Duration>) -> Self {
        self.deadline = deadline;
        self
    }
}

/// Uploads `request.source` and returns once the upload has completed or
/// failed.
pub async fn run_transfer(
    client: Arc<dyn ObjectStorageClient>,
    request: TransferRequest,
    progress: Option<ProgressCallback>,
) -> TransferOutcome {
    run_transfer_with_cancel(client, request, progress, CancellationToken::new()).await
}

/// Like [`run_transfer`], aborting with [`TransferError::Cancelled`] when
/// `cancel` fires.
///
/// The transfer never cancels `cancel` itself, so one token can be shared by
/// several concurrent transfers.
pub async fn run_transfer_with_cancel(
    client: Arc<dyn ObjectStorageClient>,
    request: TransferRequest,
    progress: Option<ProgressCallback>,
    cancel: CancellationToken,
) -> TransferOutcome {
    let span = info_span!(
        "transfer",
        bucket = %request.destination.bucket,
        key = %request.destination.key,
    );
    transfer(client, request, progress, cancel)
        .instrument(span)
        .await
}

async fn transfer(
    client: Arc<dyn ObjectStorageClient>,
    request: TransferRequest,
    progress: Option<ProgressCallback>,
    cancel: CancellationToken,
) -> TransferOutcome {
    let file = tokio::fs::File::open(&request.source)
        .await
        .map_err(|err| TransferError::source_read(&request.source, err))?;
    let size_hint = file
        .metadata()
        .await
        .map_err(|err| TransferError::source_read(&request.source, err))?
        .len();

    info!(
        source = %request.source.display(),
        size_bytes = size_hint,
        chunk_size = request.chunk_size,
        "starting transfer"
    );

    // The session cancels its own token when the deadline passes; the
    // caller's token only cancels downwards.
    let session_cancel = cancel.child_token();
    let (mut writer, reader) = bridge(session_cancel.clone());
    let session = TransferSession::start(
        client,
        reader,
        session_cancel,
        SessionOptions {
            destination: request.destination,
            ensure_bucket: request.ensure_bucket,
            size_hint: Some(size_hint),
            deadline: request.deadline,
            progress,
        },
    );

    let producer = ChunkProducer::new(&request.source, request.chunk_size);
    match producer.run(file, &mut writer).await {
        Ok(report) => info!(
            chunks = report.chunks,
            bytes = report.bytes,
            "source fully handed to uploader"
        ),
        // The session outcome carries the cause; a write failure here only
        // says the consumer stopped reading.
        Err(err) => warn!(error = %err, "producer stopped early"),
    }
    drop(writer);

    session.wait().await
}
