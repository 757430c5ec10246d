use std::{path::PathBuf, sync::Arc, time::Duration};

use blob_store::BlobError;

/// Terminal errors of a transfer session.
///
/// The error is `Clone` so every waiter on a session's completion observes
/// the same value.
#[derive(Debug, Clone, thiserror::Error)]
#[non_exhaustive]
pub enum TransferError {
    #[error("failed to read source {}: {source}", .path.display())]
    SourceRead {
        path: PathBuf,
        source: Arc<std::io::Error>,
    },

    #[error("write on closed pipe")]
    ClosedPipe,

    #[error("transfer cancelled")]
    Cancelled,

    #[error("transfer did not finish within {after:?}")]
    DeadlineExceeded { after: Duration },

    #[error("failed to provision bucket {bucket}: {source}")]
    BucketProvisioning {
        bucket: String,
        source: Arc<BlobError>,
    },

    #[error("upload failed: {source}")]
    UploadTransport { source: Arc<BlobError> },

    #[error("upload consumer exited without completing the session")]
    ConsumerAborted,
}

impl TransferError {
    pub fn source_read(path: impl Into<PathBuf>, err: std::io::Error) -> Self {
        TransferError::SourceRead {
            path: path.into(),
            source: Arc::new(err),
        }
    }

    pub fn upload_transport(err: BlobError) -> Self {
        TransferError::UploadTransport {
            source: Arc::new(err),
        }
    }

    /// Cancellation or deadline, as opposed to a failure of one of the
    /// parties.
    pub fn is_cancellation(&self) -> bool {
        matches!(
            self,
            TransferError::Cancelled | TransferError::DeadlineExceeded { .. }
        )
    }
}
