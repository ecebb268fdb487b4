//! Mediated I/O for authorized operations.
//!
//! Everything here runs after authorization succeeded. Bytes move in bounded
//! chunks through bounded channels, so a slow peer applies backpressure to
//! the file or child process feeding it instead of buffering without limit.

use std::io;
use std::time::Duration;

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::debug;

pub mod file;
pub mod process;

/// Size of a single transfer chunk.
pub const CHUNK_SIZE: usize = 16_384;

/// Number of chunks buffered between producer and peer.
pub const CHANNEL_DEPTH: usize = 8;

/// A stream of output chunks for a response body.
pub type ByteStream = ReceiverStream<io::Result<Bytes>>;

/// Options for spawned processes.
#[derive(Debug, Clone, Default)]
pub struct ExecOptions {
    /// Kill the child after this long. `None` means no limit.
    pub timeout: Option<Duration>,
}

/// Errors produced by executor operations.
#[derive(Debug, thiserror::Error)]
pub enum ExecutorError {
    /// The target file or program does not exist.
    #[error("not found: {0}")]
    NotFound(String),
    /// The OS refused access to the target.
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    /// Any other I/O failure.
    #[error("I/O failure on {target}: {source}")]
    Io {
        /// What was being accessed.
        target: String,
        /// Underlying I/O error.
        source: io::Error,
    },
}

impl ExecutorError {
    /// Classify an I/O error for `target`.
    pub fn from_io(target: impl Into<String>, source: io::Error) -> Self {
        let target = target.into();
        match source.kind() {
            io::ErrorKind::NotFound => Self::NotFound(target),
            io::ErrorKind::PermissionDenied => Self::PermissionDenied(target),
            _ => Self::Io { target, source },
        }
    }

    /// HTTP status code for this failure.
    pub fn status(&self) -> u16 {
        match self {
            Self::NotFound(_) => 404,
            Self::PermissionDenied(_) => 403,
            Self::Io { .. } => 500,
        }
    }
}

/// Copy `reader` into `tx` chunk by chunk until EOF or until the receiver
/// is gone.
///
/// A read error is forwarded as the last item. Returns the number of bytes
/// delivered.
pub(crate) async fn pump<R>(mut reader: R, tx: mpsc::Sender<io::Result<Bytes>>) -> u64
where
    R: AsyncRead + Unpin,
{
    let mut buf = vec![0u8; CHUNK_SIZE];
    let mut delivered: u64 = 0;
    loop {
        match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                let chunk = Bytes::copy_from_slice(&buf[..n]);
                if tx.send(Ok(chunk)).await.is_err() {
                    debug!("peer went away, stopping output pump");
                    break;
                }
                delivered = delivered.saturating_add(u64::try_from(n).unwrap_or(u64::MAX));
            }
            Err(e) => {
                let _ = tx.send(Err(e)).await;
                break;
            }
        }
    }
    delivered
}
