//! Captured server output: bounded ring buffer plus the task that fills it
//!
//! Packaged servers have no console. Their stdout/stderr is read line by line,
//! re-emitted through `tracing` under the `tandem::child` target and kept in a
//! [`LogRing`] so the host can show the last lines of a server that failed.

use schema::{LogStream, ServerRole};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Lines retained per server
pub const OUTPUT_RING_CAPACITY: usize = 500;

/// A single line captured from a server's stdout/stderr
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct LogEntry {
    /// Monotonic sequence number for the entry
    pub seq: u64,
    /// Stream kind (stdout or stderr)
    pub stream: LogStream,
    /// Raw content of the line, without trailing newline
    pub content: String,
    /// Timestamp in RFC3339 format
    pub timestamp: String,
}

impl LogEntry {
    /// Entry stamped with the current time; the ring assigns `seq`
    pub fn now(stream: LogStream, content: impl Into<String>) -> Self {
        Self {
            seq: 0,
            stream,
            content: content.into(),
            timestamp: schema::current_timestamp(),
        }
    }
}

/// A bounded-capacity ring buffer of recent output lines.
///
/// When capacity is exceeded, oldest entries are dropped and `total_dropped`
/// is incremented.
#[derive(Debug)]
pub struct LogRing {
    capacity: usize,
    total_dropped: u64,
    next_seq: u64,
    entries: VecDeque<LogEntry>,
}

impl Default for LogRing {
    fn default() -> Self {
        Self::new(OUTPUT_RING_CAPACITY)
    }
}

impl LogRing {
    /// Create a new `LogRing`; a capacity of 0 is raised to 1
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            total_dropped: 0,
            next_seq: 0,
            entries: VecDeque::with_capacity(capacity),
        }
    }

    /// Push a new entry, assigning the next sequence number
    pub fn push(&mut self, mut entry: LogEntry) {
        entry.seq = self.next_seq;
        self.next_seq = self.next_seq.wrapping_add(1);

        if self.entries.len() == self.capacity {
            self.entries.pop_front();
            self.total_dropped = self.total_dropped.saturating_add(1);
        }
        self.entries.push_back(entry);
    }

    /// Current number of entries retained
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the ring is empty
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Total number of entries ever dropped due to capacity
    pub fn total_dropped(&self) -> u64 {
        self.total_dropped
    }

    /// Clone of every retained entry, oldest first
    pub fn snapshot(&self) -> Vec<LogEntry> {
        self.entries.iter().cloned().collect()
    }

    /// The last `n` entries, oldest first
    pub fn tail(&self, n: usize) -> Vec<LogEntry> {
        let skip = self.entries.len().saturating_sub(n);
        self.entries.iter().skip(skip).cloned().collect()
    }

    /// Forget everything retained so far; sequence numbers keep increasing
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

/// A ring shared between output pumps and the orchestrator
pub type SharedLogRing = Arc<Mutex<LogRing>>;

/// Lock a shared ring, recovering it if a pump panicked mid-push
pub fn lock_ring(ring: &SharedLogRing) -> MutexGuard<'_, LogRing> {
    ring.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Forward every line of `reader` into tracing and `ring` until EOF
///
/// Invalid UTF-8 is replaced rather than ending the stream.
pub fn forward_output<R>(
    role: ServerRole,
    stream: LogStream,
    reader: R,
    ring: SharedLogRing,
) -> JoinHandle<()>
where
    R: AsyncRead + Send + Unpin + 'static,
{
    tokio::spawn(async move {
        let mut reader = BufReader::new(reader);
        let mut buf = Vec::new();
        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf).await {
                Ok(0) => break,
                Ok(_) => {
                    let line = String::from_utf8_lossy(&buf);
                    let line = line.trim_end_matches(['\n', '\r']);
                    info!(
                        target: "tandem::child",
                        role = role.as_str(),
                        stream = stream.as_str(),
                        "{}",
                        line
                    );
                    lock_ring(&ring).push(LogEntry::now(stream, line));
                }
                Err(e) => {
                    warn!("Reading {} {} failed: {}", role, stream.as_str(), e);
                    break;
                }
            }
        }
        debug!("{} {} closed", role, stream.as_str());
    })
}
