//! Extractor stderr handling
//!
//! yt-dlp's stderr is untrusted text of unbounded length. It is drained by a
//! background task into a [`DiagnosticTail`] that keeps only the most recent
//! bytes, and a failed run's tail is classified into a [`FailureKind`] for
//! logs and metrics.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::task::JoinHandle;

/// Ring buffer over the last `capacity` bytes written to it.
#[derive(Debug)]
pub struct DiagnosticTail {
    buf: VecDeque<u8>,
    capacity: usize,
    total: u64,
}

impl DiagnosticTail {
    pub fn new(capacity: usize) -> Self {
        Self {
            buf: VecDeque::with_capacity(capacity.min(64 * 1024)),
            capacity,
            total: 0,
        }
    }

    pub fn push(&mut self, bytes: &[u8]) {
        self.total += bytes.len() as u64;
        if self.capacity == 0 {
            return;
        }
        // Only the last `capacity` bytes of a large write can survive
        let keep = &bytes[bytes.len().saturating_sub(self.capacity)..];
        let overflow = (self.buf.len() + keep.len()).saturating_sub(self.capacity);
        self.buf.drain(..overflow);
        self.buf.extend(keep);
    }

    /// Total bytes ever pushed, including discarded ones.
    pub fn total_bytes(&self) -> u64 {
        self.total
    }

    pub fn is_truncated(&self) -> bool {
        self.total > self.buf.len() as u64
    }

    /// Retained bytes as lossy UTF-8.
    pub fn text(&self) -> String {
        let (a, b) = self.buf.as_slices();
        let mut bytes = Vec::with_capacity(a.len() + b.len());
        bytes.extend_from_slice(a);
        bytes.extend_from_slice(b);
        String::from_utf8_lossy(&bytes).into_owned()
    }
}

/// Shared handle to a tail being filled by a capture task.
#[derive(Debug, Clone)]
pub struct DiagnosticCapture {
    tail: Arc<Mutex<DiagnosticTail>>,
}

impl DiagnosticCapture {
    pub fn new(capacity: usize) -> Self {
        Self {
            tail: Arc::new(Mutex::new(DiagnosticTail::new(capacity))),
        }
    }

    /// Drains `reader` into the tail until EOF or a read error.
    pub fn spawn_reader<R>(&self, mut reader: R, label: String) -> JoinHandle<()>
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let tail = Arc::clone(&self.tail);
        tokio::spawn(async move {
            let mut chunk = [0u8; 4096];
            loop {
                match reader.read(&mut chunk).await {
                    Ok(0) => break,
                    Ok(n) => {
                        if let Ok(mut tail) = tail.lock() {
                            tail.push(&chunk[..n]);
                        }
                    }
                    Err(e) => {
                        log::debug!("[{}] stderr read failed: {}", label, e);
                        break;
                    }
                }
            }
            log::debug!("[{}] stderr closed", label);
        })
    }

    /// Current tail text, with a marker when older output was dropped.
    pub fn snapshot(&self) -> String {
        match self.tail.lock() {
            Ok(tail) if tail.is_truncated() => format!("…{}", tail.text()),
            Ok(tail) => tail.text(),
            Err(_) => String::new(),
        }
    }
}

/// Why an extractor run failed, as far as its stderr tells.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::IntoStaticStr)]
#[strum(serialize_all = "snake_case")]
pub enum FailureKind {
    /// Private, removed or region-locked media
    VideoUnavailable,
    /// The platform rejected the request as automated
    BotDetection,
    /// Timeouts, DNS, connection resets
    Network,
    Unknown,
}

impl FailureKind {
    pub fn label(self) -> &'static str {
        self.into()
    }
}

/// Classifies an extractor's stderr.
pub fn classify_failure(stderr: &str) -> FailureKind {
    let stderr_lower = stderr.to_lowercase();

    if stderr_lower.contains("private video")
        || stderr_lower.contains("video unavailable")
        || stderr_lower.contains("this video is not available")
        || stderr_lower.contains("video is private")
        || stderr_lower.contains("video has been removed")
        || stderr_lower.contains("this video does not exist")
        || stderr_lower.contains("not available in your country")
    {
        return FailureKind::VideoUnavailable;
    }

    if stderr_lower.contains("sign in to confirm you're not a bot")
        || stderr_lower.contains("http error 403")
        || stderr_lower.contains("http error 429")
        || stderr_lower.contains("signature extraction failed")
    {
        return FailureKind::BotDetection;
    }

    if stderr_lower.contains("timed out")
        || stderr_lower.contains("connection")
        || stderr_lower.contains("network is unreachable")
        || stderr_lower.contains("name or service not known")
        || stderr_lower.contains("temporary failure in name resolution")
    {
        return FailureKind::Network;
    }

    FailureKind::Unknown
}
