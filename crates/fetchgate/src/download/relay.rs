//! Stream relay: extractor stdout → HTTP response body.
//!
//! The response body is fed through a bounded channel of depth
//! [`BODY_CHANNEL_DEPTH`](crate::core::config::relay::BODY_CHANNEL_DEPTH),
//! so a chunk is only read from the extractor once the previous one was
//! accepted by the body. A slow client therefore slows the extractor down
//! through the pipe instead of piling data up in memory.

use std::time::Duration;

use bytes::Bytes;
use futures_util::StreamExt;
use tokio::io::AsyncRead;
use tokio::sync::mpsc;
use tokio_util::io::ReaderStream;
use tokio_util::sync::CancellationToken;

/// One item of the response body. An `Err` makes hyper abort the response
/// instead of finishing the chunked framing.
pub type BodyChunk = Result<Bytes, std::io::Error>;

/// The client went away before the chunk could be handed over.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SinkClosed;

/// How the response body ends.
#[derive(Debug)]
pub enum CloseKind {
    /// Clean end of body
    Finished,
    /// Abrupt end; the client sees a broken transfer
    Aborted(String),
}

/// Write side of a streamed response body.
///
/// `close` runs at most once: the sender is moved out on the first call and
/// every later call is a no-op.
pub struct ResponseSink {
    tx: Option<mpsc::Sender<BodyChunk>>,
}

impl ResponseSink {
    /// Creates a sink and the receiver the HTTP body is built from.
    pub fn channel(depth: usize) -> (Self, mpsc::Receiver<BodyChunk>) {
        let (tx, rx) = mpsc::channel(depth.max(1));
        (Self { tx: Some(tx) }, rx)
    }

    /// Hands one chunk to the body, waiting while the previous one is unread.
    pub async fn write(&mut self, chunk: Bytes) -> Result<(), SinkClosed> {
        match &self.tx {
            Some(tx) => tx.send(Ok(chunk)).await.map_err(|_| SinkClosed),
            None => Err(SinkClosed),
        }
    }

    /// Resolves once the receiving side is gone (client disconnected) or the
    /// sink was closed.
    pub async fn closed(&self) {
        if let Some(tx) = &self.tx {
            tx.closed().await;
        }
    }

    pub fn is_closed(&self) -> bool {
        self.tx.as_ref().is_none_or(|tx| tx.is_closed())
    }

    /// Ends the body. Returns `true` only for the call that actually closed it.
    pub async fn close(&mut self, kind: CloseKind) -> bool {
        let Some(tx) = self.tx.take() else {
            return false;
        };
        if let CloseKind::Aborted(reason) = kind {
            // The client may be stalled; the abort is best effort
            let error = std::io::Error::other(reason);
            let delivery = Duration::from_millis(crate::core::config::relay::ABORT_DELIVERY_TIMEOUT_MS);
            let _ = tokio::time::timeout(delivery, tx.send(Err(error))).await;
        }
        drop(tx);
        true
    }
}

/// Counters of one relay.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RelayStats {
    pub bytes_transferred: u64,
    pub chunks: u64,
}

impl RelayStats {
    fn record(&mut self, len: usize) {
        self.bytes_transferred += len as u64;
        self.chunks += 1;
    }
}

/// Why the pump loop stopped.
#[derive(Debug)]
pub enum PumpEnd {
    /// Extractor output reached EOF
    Drained,
    /// The request's cancellation token fired
    Cancelled,
    /// The client disconnected
    ClientGone,
    /// Reading extractor output failed
    ReadFailed(std::io::Error),
    /// No chunk arrived within the idle window
    ReadStalled,
    /// The client did not accept a chunk within the idle window
    WriteStalled,
}

/// Relay tuning knobs.
#[derive(Debug, Clone, Copy)]
pub struct RelayLimits {
    pub chunk_bytes: usize,
    pub idle_timeout: Duration,
}

impl RelayLimits {
    pub fn from_config() -> Self {
        Self {
            chunk_bytes: *crate::core::config::relay::CHUNK_BYTES,
            idle_timeout: crate::core::config::relay::idle_timeout(),
        }
    }
}

/// Copies `output` into `sink` chunk by chunk, in order, until EOF, failure
/// or cancellation. Never closes the sink; that is the coordinator's job.
///
/// Disconnect and cancellation are watched in the same `select!` that awaits
/// each read, the first one included.
pub async fn pump<R>(
    output: R,
    sink: &mut ResponseSink,
    token: &CancellationToken,
    limits: RelayLimits,
    stats: &mut RelayStats,
) -> PumpEnd
where
    R: AsyncRead + Unpin,
{
    let mut chunks = ReaderStream::with_capacity(output, limits.chunk_bytes.max(1));

    loop {
        let next = tokio::select! {
            biased;
            _ = token.cancelled() => return PumpEnd::Cancelled,
            _ = sink.closed() => return PumpEnd::ClientGone,
            next = tokio::time::timeout(limits.idle_timeout, chunks.next()) => next,
        };

        let chunk = match next {
            Err(_) => return PumpEnd::ReadStalled,
            Ok(None) => return PumpEnd::Drained,
            Ok(Some(Err(e))) => return PumpEnd::ReadFailed(e),
            Ok(Some(Ok(chunk))) => chunk,
        };

        let len = chunk.len();
        let written = tokio::select! {
            biased;
            _ = token.cancelled() => return PumpEnd::Cancelled,
            written = tokio::time::timeout(limits.idle_timeout, sink.write(chunk)) => written,
        };

        match written {
            Err(_) => return PumpEnd::WriteStalled,
            Ok(Err(SinkClosed)) => return PumpEnd::ClientGone,
            Ok(Ok(())) => stats.record(len),
        }
    }
}
