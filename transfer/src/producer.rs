use std::path::PathBuf;

use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::debug;

use crate::{BridgeWriter, TransferError};

/// Default size of the blocks read from the source: 1 MiB.
pub const DEFAULT_CHUNK_SIZE: usize = 1024 * 1024;

/// What the producer pushed into the bridge.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProducerReport {
    pub chunks: u64,
    pub bytes: u64,
}

/// Reads a source sequentially and pushes it into a [`BridgeWriter`].
#[derive(Debug, Clone)]
pub struct ChunkProducer {
    path: PathBuf,
    chunk_size: usize,
}

impl ChunkProducer {
    /// `path` names the source in errors. A zero `chunk_size` is raised to 1.
    pub fn new(path: impl Into<PathBuf>, chunk_size: usize) -> Self {
        Self {
            path: path.into(),
            chunk_size: chunk_size.max(1),
        }
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Copies `source` into `writer` until end-of-file, then closes the
    /// write side.
    ///
    /// A read failure closes the write side with
    /// [`TransferError::SourceRead`] so the reader never waits for bytes
    /// that will not come. A write failure (consumer gone, cancellation)
    /// ends the loop immediately with that error.
    pub async fn run<R>(
        &self,
        mut source: R,
        writer: &mut BridgeWriter,
    ) -> Result<ProducerReport, TransferError>
    where
        R: AsyncRead + Unpin,
    {
        let mut report = ProducerReport::default();
        loop {
            let mut buf = BytesMut::zeroed(self.chunk_size);
            let n = match source.read(&mut buf).await {
                Ok(0) => {
                    writer.close_write();
                    debug!(chunks = report.chunks, bytes = report.bytes, "source exhausted");
                    return Ok(report);
                }
                Ok(n) => n,
                Err(err) if err.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(err) => {
                    let err = TransferError::source_read(&self.path, err);
                    writer.close_write_with_error(err.clone());
                    return Err(err);
                }
            };
            buf.truncate(n);

            writer.write(buf.freeze()).await?;
            report.chunks += 1;
            report.bytes += n as u64;
            debug!(chunk = report.chunks, len = n, "chunk handed off");
        }
    }
}
