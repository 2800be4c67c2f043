//! Block-wise stream copy with progress and cooperative cancellation

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// How a [`copy`] ended
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CopyOutcome {
    /// The source reached end of stream; holds the number of bytes copied
    Complete(u64),
    /// The cancel predicate fired before end of stream; holds the number of bytes copied
    Cancelled(u64),
}

impl CopyOutcome {
    /// Bytes written to the sink, regardless of how the copy ended
    pub fn bytes(&self) -> u64 {
        match *self {
            CopyOutcome::Complete(n) | CopyOutcome::Cancelled(n) => n,
        }
    }
}

/// Copy `source` into `sink` in blocks of `block_size` bytes
///
/// `cancel` is polled before every read; once it returns true the copy stops and
/// [`CopyOutcome::Cancelled`] is returned, so cancellation latency is at most one block.
/// `progress` receives the size of each block after it has been written and flushed to the
/// sink.
/// A single buffer is used for the whole copy.
pub async fn copy<R, W, P, C>(
    source: &mut R,
    sink: &mut W,
    mut progress: P,
    cancel: C,
    block_size: usize,
) -> std::io::Result<CopyOutcome>
where
    R: AsyncRead + Unpin + ?Sized,
    W: AsyncWrite + Unpin + ?Sized,
    P: FnMut(u64),
    C: Fn() -> bool,
{
    let mut buf = vec![0u8; block_size.max(1)];
    let mut copied = 0u64;

    loop {
        if cancel() {
            return Ok(CopyOutcome::Cancelled(copied));
        }

        let n = source.read(&mut buf).await?;
        if n == 0 {
            return Ok(CopyOutcome::Complete(copied));
        }

        sink.write_all(&buf[..n]).await?;
        // tokio::fs::File completes writes in the background until flushed
        sink.flush().await?;
        copied += n as u64;
        progress(n as u64);
    }
}
