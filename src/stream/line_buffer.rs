use super::cursor::Consumer;
use super::record::Line;
use super::shared::{BufferStats, Shared};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

pub const DEFAULT_LINE_BUFFER_SIZE: usize = 500;
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Multi-consumer buffer of unclassified lines.
///
/// Every consumer sees every line appended after it subscribed, in order, as
/// long as it keeps up with the retention window. Consumers that fall behind
/// silently skip ahead to the oldest retained line.
pub struct LineBuffer {
    shared: Shared<Arc<Line>>,
}

impl LineBuffer {
    pub fn new(max_size: usize) -> Self {
        Self::with_poll_interval(max_size, DEFAULT_POLL_INTERVAL)
    }

    pub fn with_poll_interval(max_size: usize, poll_interval: Duration) -> Self {
        Self {
            shared: Shared::new("lines", max_size, (), poll_interval),
        }
    }

    pub fn append(&self, line: impl Into<Line>) {
        self.shared.append(Arc::new(line.into()));
    }

    /// New consumer positioned after everything currently buffered.
    pub fn subscribe(&self) -> Consumer {
        self.shared.subscribe()
    }

    /// Waits until a line is available for `consumer`.
    pub async fn read(&self, consumer: &Consumer) -> Arc<Line> {
        self.shared.read(consumer).await
    }

    /// Thread-blocking variant of [`LineBuffer::read`]. Do not call from
    /// inside an async runtime.
    pub fn read_blocking(&self, consumer: &Consumer) -> Arc<Line> {
        self.shared.read_blocking(consumer)
    }

    pub fn try_read(&self, consumer: &Consumer) -> Option<Arc<Line>> {
        self.shared.try_read(consumer)
    }

    pub fn drain(&self, consumer: &Consumer) -> Vec<Arc<Line>> {
        self.shared.drain(consumer)
    }

    pub fn rewind(&self, consumer: &Consumer) {
        self.shared.rewind(consumer);
    }

    pub fn reap(&self) -> usize {
        self.shared.reap()
    }

    pub fn position(&self, consumer: &Consumer) -> Option<u64> {
        self.shared.position(consumer)
    }

    pub fn snapshot(&self) -> Vec<Arc<Line>> {
        self.shared.snapshot()
    }

    pub fn stats(&self) -> BufferStats {
        self.shared.stats()
    }

    pub fn len(&self) -> usize {
        self.stats().buffered
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Logical index of the oldest retained line.
    pub fn base_offset(&self) -> u64 {
        self.stats().base_offset
    }

    /// Logical index the next appended line will get.
    pub fn end_offset(&self) -> u64 {
        self.stats().end_offset
    }

    /// Registered cursors, including stale ones not yet reaped.
    pub fn consumer_count(&self) -> usize {
        self.stats().consumers
    }

    pub fn max_size(&self) -> usize {
        self.stats().max_size
    }
}

impl Default for LineBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_LINE_BUFFER_SIZE)
    }
}

impl fmt::Debug for LineBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LineBuffer")
            .field("stats", &self.stats())
            .finish()
    }
}
