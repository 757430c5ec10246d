//! In-process handoff channel between the chunk producer and the uploader.
//!
//! [`bridge`] returns a [`BridgeWriter`] and a [`BridgeReader`] over one
//! ordered byte sequence. At most one chunk is in flight: a write returns
//! only after the reader has taken its bytes, so memory stays bounded by the
//! chunk size no matter how large the source is.
//!
//! Closing rules:
//! - `close_write`: the reader drains what was written, then sees
//!   end-of-stream. A writer dropped without it counts as cancelled, so a
//!   producer that goes away mid-file never completes a truncated object.
//! - `close_write_with_error`: the reader sees the error instead of
//!   end-of-stream.
//! - `close` / `close_with_error` on the reader (or dropping it): blocked and
//!   future writes fail with [`TransferError::ClosedPipe`] or the given error.
//! - the cancellation token unblocks both sides with
//!   [`TransferError::Cancelled`].

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use bytes::Bytes;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use crate::TransferError;

/// One chunk plus the acknowledgement the writer waits on.
struct Handoff {
    chunk: Bytes,
    ack: oneshot::Sender<usize>,
}

/// A chunk the reader has taken but not fully copied out yet.
struct Pending {
    chunk: Bytes,
    len: usize,
    ack: oneshot::Sender<usize>,
}

impl Pending {
    fn acknowledge(self) {
        // The writer may have been cancelled in the meantime.
        let _ = self.ack.send(self.len);
    }
}

#[derive(Default)]
struct CloseState {
    /// Set when the read side closes; writes fail with it.
    read_error: Option<TransferError>,
    /// Set when the write side closes with an error; reads fail with it.
    write_error: Option<TransferError>,
}

struct Shared {
    state: Mutex<CloseState>,
    cancel: CancellationToken,
}

impl Shared {
    fn state(&self) -> MutexGuard<'_, CloseState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn read_error(&self) -> TransferError {
        if self.cancel.is_cancelled() {
            return TransferError::Cancelled;
        }
        self.state()
            .read_error
            .clone()
            .unwrap_or(TransferError::ClosedPipe)
    }

    fn write_error(&self) -> Option<TransferError> {
        self.state().write_error.clone()
    }
}

/// Creates a connected writer/reader pair bound to `cancel`.
pub fn bridge(cancel: CancellationToken) -> (BridgeWriter, BridgeReader) {
    let (tx, rx) = mpsc::channel(1);
    let shared = Arc::new(Shared {
        state: Mutex::new(CloseState::default()),
        cancel,
    });
    (
        BridgeWriter {
            tx: Some(tx),
            shared: shared.clone(),
        },
        BridgeReader {
            rx,
            pending: None,
            closed: false,
            shared,
        },
    )
}

/// Write end of the bridge. Owned by a single producer.
pub struct BridgeWriter {
    tx: Option<mpsc::Sender<Handoff>>,
    shared: Arc<Shared>,
}

impl BridgeWriter {
    /// Hands `chunk` to the reader and waits until the reader has consumed
    /// it.
    ///
    /// Returns the number of bytes written, which is always the full chunk.
    pub async fn write(&mut self, chunk: Bytes) -> Result<usize, TransferError> {
        if self.shared.cancel.is_cancelled() {
            return Err(TransferError::Cancelled);
        }
        let Some(tx) = self.tx.as_ref() else {
            return Err(TransferError::ClosedPipe);
        };
        if tx.is_closed() {
            return Err(self.shared.read_error());
        }
        if chunk.is_empty() {
            return Ok(0);
        }

        let (ack_tx, ack_rx) = oneshot::channel();
        let handoff = Handoff { chunk, ack: ack_tx };
        tokio::select! {
            biased;
            _ = self.shared.cancel.cancelled() => return Err(TransferError::Cancelled),
            sent = tx.send(handoff) => {
                if sent.is_err() {
                    return Err(self.shared.read_error());
                }
            }
        }

        tokio::select! {
            biased;
            _ = self.shared.cancel.cancelled() => Err(TransferError::Cancelled),
            ack = ack_rx => ack.map_err(|_| self.shared.read_error()),
        }
    }

    /// Signals that no more bytes will be written. Idempotent.
    pub fn close_write(&mut self) {
        self.tx.take();
    }

    /// Closes the write side so that the reader fails with `err` once it has
    /// drained the chunks already handed over.
    ///
    /// Has no effect if the write side is already closed.
    pub fn close_write_with_error(&mut self, err: TransferError) {
        if self.tx.is_none() {
            return;
        }
        self.shared.state().write_error.get_or_insert(err);
        self.tx.take();
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_none()
    }
}

impl Drop for BridgeWriter {
    fn drop(&mut self) {
        self.close_write_with_error(TransferError::Cancelled);
    }
}

/// Read end of the bridge. Owned by the upload consumer.
pub struct BridgeReader {
    rx: mpsc::Receiver<Handoff>,
    pending: Option<Pending>,
    closed: bool,
    shared: Arc<Shared>,
}

impl BridgeReader {
    async fn next_handoff(&mut self) -> Result<Option<Handoff>, TransferError> {
        if self.closed {
            return Err(TransferError::ClosedPipe);
        }
        tokio::select! {
            biased;
            _ = self.shared.cancel.cancelled() => Err(TransferError::Cancelled),
            handoff = self.rx.recv() => match handoff {
                Some(handoff) => Ok(Some(handoff)),
                None => match self.shared.write_error() {
                    Some(err) => Err(err),
                    None => Ok(None),
                },
            },
        }
    }

    /// Copies the next bytes into `buf`.
    ///
    /// `Ok(0)` means end-of-stream: the write side closed and every written
    /// byte has been read. The writer of a chunk is released once the whole
    /// chunk has been copied out.
    pub async fn read(&mut self, buf: &mut [u8]) -> Result<usize, TransferError> {
        if buf.is_empty() {
            return Ok(0);
        }
        if self.pending.is_none() {
            match self.next_handoff().await? {
                Some(handoff) => {
                    self.pending = Some(Pending {
                        len: handoff.chunk.len(),
                        chunk: handoff.chunk,
                        ack: handoff.ack,
                    });
                }
                None => return Ok(0),
            }
        }
        let Some(pending) = self.pending.as_mut() else {
            return Ok(0);
        };

        let n = buf.len().min(pending.chunk.len());
        buf[..n].copy_from_slice(&pending.chunk.split_to(n));
        if pending.chunk.is_empty() {
            if let Some(pending) = self.pending.take() {
                pending.acknowledge();
            }
        }
        Ok(n)
    }

    /// Takes the next chunk as a whole, releasing its writer.
    ///
    /// Returns the unread remainder first if `read` stopped inside a chunk.
    /// `Ok(None)` means end-of-stream.
    pub async fn read_chunk(&mut self) -> Result<Option<Bytes>, TransferError> {
        if let Some(pending) = self.pending.take() {
            let chunk = pending.chunk.clone();
            pending.acknowledge();
            return Ok(Some(chunk));
        }
        match self.next_handoff().await? {
            Some(handoff) => {
                let _ = handoff.ack.send(handoff.chunk.len());
                Ok(Some(handoff.chunk))
            }
            None => Ok(None),
        }
    }

    /// Closes the read side; writes fail with [`TransferError::ClosedPipe`].
    pub fn close(&mut self) {
        self.close_with_error(TransferError::ClosedPipe);
    }

    /// Closes the read side; blocked and future writes fail with `err`.
    pub fn close_with_error(&mut self, err: TransferError) {
        self.shared.state().read_error.get_or_insert(err);
        self.closed = true;
        self.rx.close();
        // Dropping the acknowledgements releases a writer parked on them.
        while self.rx.try_recv().is_ok() {}
        self.pending = None;
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn test_bytes_arrive_in_order() {
        let (mut writer, mut reader) = bridge(CancellationToken::new());

        let producer = tokio::spawn(async move {
            for i in 0..5u8 {
                writer.write(Bytes::from(vec![i; 3])).await.unwrap();
            }
            writer.close_write();
        });

        let mut received = Vec::new();
        let mut buf = [0u8; 2];
        loop {
            let n = reader.read(&mut buf).await.unwrap();
            if n == 0 {
                break;
            }
            received.extend_from_slice(&buf[..n]);
        }
        producer.await.unwrap();

        let expected: Vec<u8> = (0..5u8).flat_map(|i| vec![i; 3]).collect();
        assert_eq!(received, expected);
    }

    #[tokio::test]
    async fn test_write_blocks_until_read() {
        let (mut writer, mut reader) = bridge(CancellationToken::new());

        let write = tokio::spawn(async move { writer.write(Bytes::from("abc")).await });
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!write.is_finished());

        let chunk = reader.read_chunk().await.unwrap();
        assert_eq!(chunk, Some(Bytes::from("abc")));
        assert_eq!(write.await.unwrap().unwrap(), 3);
    }

    #[tokio::test]
    async fn test_partial_reads_hold_writer_until_drained() {
        let (mut writer, mut reader) = bridge(CancellationToken::new());

        let write = tokio::spawn(async move { writer.write(Bytes::from("abcd")).await });
        let mut buf = [0u8; 3];
        assert_eq!(reader.read(&mut buf).await.unwrap(), 3);
        assert_eq!(&buf, b"abc");
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!write.is_finished());

        assert_eq!(reader.read(&mut buf).await.unwrap(), 1);
        assert_eq!(buf[0], b'd');
        assert_eq!(write.await.unwrap().unwrap(), 4);
    }

    #[tokio::test]
    async fn test_close_write_yields_eof_after_drain() {
        let (mut writer, mut reader) = bridge(CancellationToken::new());

        let producer = tokio::spawn(async move {
            writer.write(Bytes::from("last")).await.unwrap();
            writer.close_write();
            writer.close_write();
        });

        assert_eq!(reader.read_chunk().await.unwrap(), Some(Bytes::from("last")));
        assert_eq!(reader.read_chunk().await.unwrap(), None);
        assert_eq!(reader.read_chunk().await.unwrap(), None);
        producer.await.unwrap();
    }

    #[tokio::test]
    async fn test_write_after_close_write_fails() {
        let (mut writer, _reader) = bridge(CancellationToken::new());
        writer.close_write();
        assert!(writer.is_closed());
        assert!(matches!(
            writer.write(Bytes::from("x")).await,
            Err(TransferError::ClosedPipe)
        ));
    }

    #[tokio::test]
    async fn test_close_write_with_error_reaches_reader() {
        let (mut writer, mut reader) = bridge(CancellationToken::new());
        writer.close_write_with_error(TransferError::source_read(
            "/tmp/source",
            std::io::Error::other("disk gone"),
        ));

        assert!(matches!(
            reader.read_chunk().await,
            Err(TransferError::SourceRead { .. })
        ));
    }

    #[tokio::test]
    async fn test_close_read_fails_blocked_writer() {
        let (mut writer, mut reader) = bridge(CancellationToken::new());

        let write = tokio::spawn(async move { writer.write(Bytes::from("abc")).await });
        tokio::time::sleep(Duration::from_millis(20)).await;
        reader.close();

        assert!(matches!(
            write.await.unwrap(),
            Err(TransferError::ClosedPipe)
        ));
    }

    #[tokio::test]
    async fn test_close_read_with_error_is_reported_to_writer() {
        let (mut writer, mut reader) = bridge(CancellationToken::new());
        reader.close_with_error(TransferError::ConsumerAborted);

        assert!(matches!(
            writer.write(Bytes::from("abc")).await,
            Err(TransferError::ConsumerAborted)
        ));
        assert!(matches!(
            reader.read_chunk().await,
            Err(TransferError::ClosedPipe)
        ));
    }

    #[tokio::test]
    async fn test_dropped_writer_is_not_end_of_stream() {
        let (writer, mut reader) = bridge(CancellationToken::new());
        drop(writer);
        assert!(matches!(
            reader.read_chunk().await,
            Err(TransferError::Cancelled)
        ));
    }

    #[tokio::test]
    async fn test_dropped_reader_fails_writer() {
        let (mut writer, reader) = bridge(CancellationToken::new());
        drop(reader);
        assert!(matches!(
            writer.write(Bytes::from("abc")).await,
            Err(TransferError::ClosedPipe)
        ));
    }

    #[tokio::test]
    async fn test_cancel_unblocks_both_sides() {
        let cancel = CancellationToken::new();
        let (mut writer, mut reader) = bridge(cancel.clone());

        let (mut other_writer, mut other_reader) = bridge(cancel.clone());
        let write = tokio::spawn(async move { other_writer.write(Bytes::from("abc")).await });
        let read = tokio::spawn(async move { reader.read_chunk().await });
        tokio::time::sleep(Duration::from_millis(20)).await;

        cancel.cancel();

        assert!(matches!(write.await.unwrap(), Err(TransferError::Cancelled)));
        assert!(matches!(read.await.unwrap(), Err(TransferError::Cancelled)));
        assert!(matches!(
            writer.write(Bytes::from("x")).await,
            Err(TransferError::Cancelled)
        ));
        assert!(matches!(
            other_reader.read_chunk().await,
            Err(TransferError::Cancelled)
        ));
    }
}
