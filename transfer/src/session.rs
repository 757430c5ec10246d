use std::{sync::Arc, time::Duration};

use blob_store::{ObjectDestination, ObjectStorageClient};
use tokio::{sync::watch, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::{BridgeReader, ProgressCallback, TransferError, UploadConsumer, UploadSummary};

pub type TransferOutcome = Result<UploadSummary, TransferError>;

/// Creates a single-fire completion signal and its first waiter.
pub fn completion() -> (CompletionSignal, CompletionWaiter) {
    let (tx, rx) = watch::channel(None);
    (CompletionSignal { tx }, CompletionWaiter { rx })
}

/// Write side of a session's completion. Owned by the upload consumer.
///
/// Dropping it without completing wakes every waiter with
/// [`TransferError::ConsumerAborted`].
#[derive(Debug)]
pub struct CompletionSignal {
    tx: watch::Sender<Option<TransferOutcome>>,
}

impl CompletionSignal {
    /// Publishes the outcome. Returns `false` if the session had already
    /// completed, in which case the earlier outcome stands.
    pub fn complete(&self, outcome: TransferOutcome) -> bool {
        let mut outcome = Some(outcome);
        self.tx.send_if_modified(|current| {
            if current.is_some() {
                return false;
            }
            *current = outcome.take();
            true
        })
    }

    pub fn is_complete(&self) -> bool {
        self.tx.borrow().is_some()
    }

    pub fn subscribe(&self) -> CompletionWaiter {
        CompletionWaiter {
            rx: self.tx.subscribe(),
        }
    }
}

/// Observes a session's outcome. Any number of waiters see the same value.
#[derive(Debug, Clone)]
pub struct CompletionWaiter {
    rx: watch::Receiver<Option<TransferOutcome>>,
}

impl CompletionWaiter {
    pub async fn wait(&mut self) -> TransferOutcome {
        match self.rx.wait_for(Option::is_some).await {
            Ok(outcome) => outcome
                .clone()
                .unwrap_or(Err(TransferError::ConsumerAborted)),
            Err(_) => Err(TransferError::ConsumerAborted),
        }
    }

    /// The outcome, if the session has completed.
    pub fn try_outcome(&self) -> Option<TransferOutcome> {
        self.rx.borrow().clone()
    }
}

/// Per-session settings.
#[derive(Clone)]
pub struct SessionOptions {
    pub destination: ObjectDestination,
    pub ensure_bucket: bool,
    pub size_hint: Option<u64>,
    pub deadline: Option<Duration>,
    pub progress: Option<ProgressCallback>,
}

impl SessionOptions {
    pub fn new(destination: ObjectDestination) -> Self {
        Self {
            destination,
            ensure_bucket: true,
            size_hint: None,
            deadline: None,
            progress: None,
        }
    }
}

impl std::fmt::Debug for SessionOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionOptions")
            .field("destination", &self.destination)
            .field("ensure_bucket", &self.ensure_bucket)
            .field("size_hint", &self.size_hint)
            .field("deadline", &self.deadline)
            .field("progress", &self.progress.is_some())
            .finish()
    }
}

/// One upload in flight: the consumer task, its completion and its
/// cancellation token.
pub struct TransferSession {
    cancel: CancellationToken,
    waiter: CompletionWaiter,
    consumer: JoinHandle<()>,
}

impl TransferSession {
    /// Spawns the session's only upload consumer on `reader`.
    ///
    /// `cancel` must be the token the bridge was created with. The session
    /// cancels it when the deadline passes, so give each session its own
    /// token (a [`CancellationToken::child_token`] of a shared one).
    pub fn start(
        client: Arc<dyn ObjectStorageClient>,
        reader: BridgeReader,
        cancel: CancellationToken,
        options: SessionOptions,
    ) -> Self {
        info!(
            destination = %options.destination,
            size_hint = ?options.size_hint,
            deadline = ?options.deadline,
            "starting transfer session"
        );
        let (signal, waiter) = completion();
        let consumer = UploadConsumer::new(client, options.destination, cancel.clone())
            .ensure_bucket(options.ensure_bucket)
            .size_hint(options.size_hint)
            .progress(options.progress);
        let consumer = consumer.spawn(reader, signal, options.deadline);

        Self {
            cancel,
            waiter,
            consumer,
        }
    }

    /// Cancels the transfer. Both ends of the bridge fail with
    /// [`TransferError::Cancelled`]; the outcome is still delivered through
    /// [`TransferSession::wait`].
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// An additional waiter on the session's outcome.
    pub fn subscribe(&self) -> CompletionWaiter {
        self.waiter.clone()
    }

    pub fn is_complete(&self) -> bool {
        self.waiter.try_outcome().is_some()
    }

    /// Waits for the consumer to complete the session and for its task to
    /// exit.
    pub async fn wait(mut self) -> TransferOutcome {
        let outcome = self.waiter.wait().await;
        if let Err(err) = self.consumer.await {
            error!(error = %err, "upload consumer task failed");
            return Err(TransferError::ConsumerAborted);
        }
        outcome
    }
}
