//! File transfer between the peer and an authorized path.

use std::io;
use std::path::Path;

use bytes::Bytes;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::{Stream, StreamExt};
use tracing::debug;

use super::{pump, ByteStream, ExecutorError, CHANNEL_DEPTH};

/// An opened file ready to stream to the peer.
#[derive(Debug)]
pub struct FileDownload {
    /// File size at open time, sent as `Content-Length`.
    pub len: u64,
    /// File content in bounded chunks.
    pub body: ByteStream,
}

/// Open `path` and start streaming it.
///
/// # Errors
///
/// Returns an error if the file cannot be opened or stat'ed.
pub async fn open_read(path: &Path) -> Result<FileDownload, ExecutorError> {
    let target = path.display().to_string();
    let file = tokio::fs::File::open(path)
        .await
        .map_err(|e| ExecutorError::from_io(target.clone(), e))?;
    let len = file
        .metadata()
        .await
        .map_err(|e| ExecutorError::from_io(target, e))?
        .len();

    let (tx, rx) = mpsc::channel(CHANNEL_DEPTH);
    tokio::spawn(pump(file, tx));

    Ok(FileDownload {
        len,
        body: ReceiverStream::new(rx),
    })
}

/// Write up to `declared_len` bytes from `body` into `path`.
///
/// The file is created or truncated. Copying stops once `declared_len` bytes
/// arrived, or earlier if the body ends or fails (peer disconnected). Excess
/// bytes beyond the declared length are discarded. Returns the number of
/// bytes written, which may be short.
///
/// # Errors
///
/// Returns an error if the file cannot be created or written.
pub async fn write_from_stream<S, E>(
    path: &Path,
    declared_len: u64,
    body: S,
) -> Result<u64, ExecutorError>
where
    S: Stream<Item = Result<Bytes, E>>,
    E: std::fmt::Display,
{
    let target = path.display().to_string();
    let io_err = |e: io::Error| ExecutorError::from_io(target.clone(), e);

    let mut file = tokio::fs::File::create(path).await.map_err(io_err)?;
    tokio::pin!(body);

    let mut remaining = declared_len;
    while remaining > 0 {
        let chunk = match body.next().await {
            Some(Ok(chunk)) => chunk,
            Some(Err(e)) => {
                debug!(path = %target, error = %e, "upload stream failed, keeping partial file");
                break;
            }
            None => break,
        };
        let take = usize::try_from(remaining).map_or(chunk.len(), |r| r.min(chunk.len()));
        file.write_all(&chunk[..take]).await.map_err(io_err)?;
        remaining = remaining.saturating_sub(u64::try_from(take).unwrap_or(remaining));
    }

    file.flush().await.map_err(io_err)?;
    Ok(declared_len.saturating_sub(remaining))
}
