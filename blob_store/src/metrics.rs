//! Storage client metrics, labelled by operation and bucket.

use std::time::Instant;

use opentelemetry::{
    metrics::{Counter, Histogram, Meter},
    KeyValue,
};

/// Storage calls that are timed and counted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Operation {
    Put,
    HeadBucket,
    CreateBucket,
}

impl Operation {
    fn as_str(self) -> &'static str {
        match self {
            Operation::Put => "put",
            Operation::HeadBucket => "head_bucket",
            Operation::CreateBucket => "create_bucket",
        }
    }
}

fn labels(op: Operation, bucket: &str) -> [KeyValue; 2] {
    [
        KeyValue::new("op", op.as_str()),
        KeyValue::new("bucket", bucket.to_string()),
    ]
}

/// Instruments shared by every storage call of one client.
#[derive(Clone)]
pub struct BlobMetrics {
    durations: Histogram<f64>,
    failures: Counter<u64>,
    uploaded_bytes: Counter<u64>,
}

impl BlobMetrics {
    pub fn new(meter: &Meter) -> Self {
        Self {
            durations: meter
                .f64_histogram("blob_storage_operation_duration_seconds")
                .with_description("Duration of uploads and bucket calls in seconds")
                .build(),
            failures: meter
                .u64_counter("blob_storage_errors_total")
                .with_description("Failed uploads and bucket calls")
                .build(),
            uploaded_bytes: meter
                .u64_counter("blob_storage_uploaded_bytes_total")
                .with_description("Bytes stored by completed uploads")
                .build(),
        }
    }

    /// Starts timing `op`; the duration is recorded when the timer drops.
    pub(crate) fn start(&self, op: Operation, bucket: &str) -> OperationTimer {
        OperationTimer {
            start: Instant::now(),
            histogram: self.durations.clone(),
            labels: labels(op, bucket),
        }
    }

    pub(crate) fn record_failure(&self, op: Operation, bucket: &str) {
        self.failures.add(1, &labels(op, bucket));
    }

    pub(crate) fn record_upload(&self, bucket: &str, size_bytes: u64, multipart: bool) {
        self.uploaded_bytes.add(
            size_bytes,
            &[
                KeyValue::new("bucket", bucket.to_string()),
                KeyValue::new("multipart", multipart),
            ],
        );
    }
}

pub(crate) struct OperationTimer {
    start: Instant,
    histogram: Histogram<f64>,
    labels: [KeyValue; 2],
}

impl Drop for OperationTimer {
    fn drop(&mut self) {
        self.histogram
            .record(self.start.elapsed().as_secs_f64(), &self.labels);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_labels_name_operation_and_bucket() {
        let labels = labels(Operation::CreateBucket, "media");
        assert_eq!(labels[0], KeyValue::new("op", "create_bucket"));
        assert_eq!(labels[1], KeyValue::new("bucket", "media"));
    }

    #[test]
    fn test_recording_without_sdk_is_a_noop() {
        let meter = opentelemetry::global::meter("blob_store_test");
        let metrics = BlobMetrics::new(&meter);

        let timer = metrics.start(Operation::Put, "media");
        metrics.record_failure(Operation::HeadBucket, "media");
        metrics.record_upload("media", 1024, true);
        drop(timer);
    }
}
