//! Live relay of one child output stream.

use std::io;

use coderelay_core::{OutboundMessage, OutboundTx, OutputStream};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio_util::sync::CancellationToken;

use crate::decode::Utf8Decoder;

/// Read size per wake-up.
const READ_CHUNK: usize = 4096;

/// A child output stream, either a pipe or a pseudo-terminal master.
pub type OutputReader = Box<dyn AsyncRead + Send + Unpin>;

/// Forward `reader` to `tx` until EOF, cancellation, or the subscriber
/// going away.
///
/// Each read wakes as soon as the child has written anything, so output is
/// relayed incrementally rather than after exit. Text is tagged with
/// `stream`. On EOF any buffered partial character is flushed; on
/// cancellation nothing further is sent.
///
/// Returns the number of bytes read.
pub async fn relay_stream<R>(
    mut reader: R,
    stream: OutputStream,
    tx: OutboundTx,
    cancel: CancellationToken,
) -> u64
where
    R: AsyncRead + Unpin,
{
    let mut buf = vec![0u8; READ_CHUNK];
    let mut decoder = Utf8Decoder::new();
    let mut relayed = 0u64;

    loop {
        let read = tokio::select! {
            biased;
            () = cancel.cancelled() => {
                tracing::debug!(%stream, relayed, "Relay cancelled");
                return relayed;
            }
            read = reader.read(&mut buf) => read,
        };

        let n = match read {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                tracing::warn!(%stream, "Failed to read process output: {e}");
                break;
            }
        };
        relayed += n as u64;

        let text = decoder.decode(&buf[..n]);
        if !text.is_empty() && tx.send(OutboundMessage::output(stream, text)).is_err() {
            tracing::debug!(%stream, relayed, "Subscriber gone, stopping relay");
            return relayed;
        }
    }

    let tail = decoder.finish();
    if !tail.is_empty() {
        let _ = tx.send(OutboundMessage::output(stream, tail));
    }
    tracing::debug!(%stream, relayed, "Relay reached end of stream");
    relayed
}
