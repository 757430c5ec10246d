use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

/// Callback invoked by the upload consumer after each chunk it accepts.
pub type ProgressCallback = Arc<dyn Fn(TransferProgress) + Send + Sync>;

/// Snapshot of how far a transfer got.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferProgress {
    pub bytes_transferred: u64,
    pub total_bytes: Option<u64>,
    pub chunks: u64,
}

impl TransferProgress {
    /// Completion percentage, when the total is known.
    pub fn percentage(&self) -> Option<f64> {
        match self.total_bytes {
            Some(0) => Some(100.0),
            Some(total) => Some(self.bytes_transferred as f64 / total as f64 * 100.0),
            None => None,
        }
    }
}

/// Counts the bytes handed to the storage client.
#[derive(Clone)]
pub(crate) struct ProgressTracker {
    bytes: Arc<AtomicU64>,
    chunks: Arc<AtomicU64>,
    total_bytes: Option<u64>,
    callback: Option<ProgressCallback>,
}

impl ProgressTracker {
    pub(crate) fn new(total_bytes: Option<u64>, callback: Option<ProgressCallback>) -> Self {
        Self {
            bytes: Arc::new(AtomicU64::new(0)),
            chunks: Arc::new(AtomicU64::new(0)),
            total_bytes,
            callback,
        }
    }

    pub(crate) fn advance(&self, len: usize) {
        self.bytes.fetch_add(len as u64, Ordering::Relaxed);
        self.chunks.fetch_add(1, Ordering::Relaxed);
        if let Some(callback) = &self.callback {
            callback(self.snapshot());
        }
    }

    pub(crate) fn snapshot(&self) -> TransferProgress {
        TransferProgress {
            bytes_transferred: self.bytes.load(Ordering::Relaxed),
            total_bytes: self.total_bytes,
            chunks: self.chunks.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    #[test]
    fn test_percentage() {
        let progress = TransferProgress {
            bytes_transferred: 512,
            total_bytes: Some(2048),
            chunks: 1,
        };
        assert_eq!(progress.percentage(), Some(25.0));

        let unknown = TransferProgress {
            total_bytes: None,
            ..progress
        };
        assert_eq!(unknown.percentage(), None);

        let empty = TransferProgress {
            bytes_transferred: 0,
            total_bytes: Some(0),
            chunks: 0,
        };
        assert_eq!(empty.percentage(), Some(100.0));
    }

    #[test]
    fn test_tracker_reports_every_chunk() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let tracker = ProgressTracker::new(
            Some(30),
            Some(Arc::new(move |p: TransferProgress| {
                sink.lock().unwrap().push(p.bytes_transferred)
            })),
        );

        tracker.advance(10);
        tracker.advance(20);

        assert_eq!(*seen.lock().unwrap(), vec![10, 30]);
        assert_eq!(tracker.snapshot().chunks, 2);
    }
}
