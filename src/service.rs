use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

use anyhow::{Context, Result};
use blob_store::{ObjectStorageClient, S3Storage};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use transfer::{run_transfer_with_cancel, ProgressCallback, TransferProgress, UploadSummary};

use crate::config::UploaderConfig;

pub struct Service {
    pub config: UploaderConfig,
    pub storage: Arc<dyn ObjectStorageClient>,
}

impl Service {
    pub async fn new(config: UploaderConfig) -> Result<Self> {
        let meter = opentelemetry::global::meter("r2-stream");
        let storage = S3Storage::new_with_metrics(config.storage.clone(), &meter)
            .await
            .context("error initializing S3 storage client")?;
        Ok(Self {
            config,
            storage: Arc::new(storage),
        })
    }

    /// Uploads the configured file. Ctrl+C or SIGTERM cancels the upload.
    pub async fn start(&self) -> Result<UploadSummary> {
        let request = self.config.transfer_request()?;
        let cancel = CancellationToken::new();
        let signal_handle = tokio::spawn(cancel_on_signal(cancel.clone()));

        let outcome = run_transfer_with_cancel(
            self.storage.clone(),
            request,
            Some(progress_logger()),
            cancel,
        )
        .await;
        signal_handle.abort();

        let summary = outcome.context("transfer failed")?;
        info!(
            url = %summary.url,
            size_bytes = summary.size_bytes,
            sha256 = %summary.sha256_hash,
            "upload finished"
        );
        Ok(summary)
    }
}

/// Logs progress at every 10% step, or per chunk at debug level when the
/// size is unknown.
fn progress_logger() -> ProgressCallback {
    let last_step = AtomicU64::new(0);
    Arc::new(move |progress: TransferProgress| match progress.percentage() {
        Some(percentage) => {
            let step = (percentage / 10.0) as u64;
            if step > last_step.fetch_max(step, Ordering::Relaxed) {
                info!(
                    bytes = progress.bytes_transferred,
                    total = progress.total_bytes,
                    "{:.0}% uploaded",
                    percentage
                );
            }
        }
        None => tracing::debug!(bytes = progress.bytes_transferred, "chunk uploaded"),
    })
}

async fn cancel_on_signal(cancel: CancellationToken) {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            warn!("failed to install Ctrl+C handler: {:?}", err);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(err) => {
                warn!("failed to install signal handler: {:?}", err);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("signal received, cancelling upload");
    cancel.cancel();
}
