use super::cursor::Consumer;
use super::line_buffer::DEFAULT_POLL_INTERVAL;
use super::record::{Line, StreamMask, StreamRecord};
use super::shared::{BufferStats, Shared};
use crate::error::TapResult;
use std::fmt;
use std::time::Duration;

pub const DEFAULT_STREAM_BUFFER_SIZE: usize = 3000;

#[derive(Debug, Clone)]
pub struct StreamBufferOptions {
    pub max_size: usize,
    pub default_mask: StreamMask,
    pub poll_interval: Duration,
}

impl Default for StreamBufferOptions {
    fn default() -> Self {
        Self {
            max_size: DEFAULT_STREAM_BUFFER_SIZE,
            default_mask: StreamMask::DEFAULT_SUBSCRIPTION,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

/// Multi-consumer buffer where each line is tagged with the channels it
/// belongs to and each consumer only receives the channels it subscribed to.
///
/// A record is delivered to a consumer iff its mask intersects the
/// consumer's subscription. Records that do not match are skipped for that
/// consumer; they stay in the window for everyone else.
pub struct StreamBuffer {
    shared: Shared<StreamRecord>,
}

impl StreamBuffer {
    pub fn new(max_size: usize) -> Self {
        Self {
            shared: Shared::new(
                "streams",
                max_size,
                StreamMask::DEFAULT_SUBSCRIPTION,
                DEFAULT_POLL_INTERVAL,
            ),
        }
    }

    pub fn with_options(options: StreamBufferOptions) -> TapResult<Self> {
        let default_mask = options.default_mask.validate()?;
        Ok(Self {
            shared: Shared::new(
                "streams",
                options.max_size,
                default_mask,
                options.poll_interval,
            ),
        })
    }

    pub fn append(&self, record: StreamRecord) {
        self.shared.append(record);
    }

    /// Appends a copy of `record` carrying `mask` instead of its own.
    pub fn append_as(&self, record: &StreamRecord, mask: StreamMask) {
        self.shared.append(record.reclassified(mask));
    }

    pub fn push(&self, line: impl Into<Line>, mask: StreamMask) {
        self.shared.append(StreamRecord::new(line, mask));
    }

    pub fn subscribe(&self) -> Consumer {
        self.shared.subscribe()
    }

    /// Subscribes with an explicit mask. Invalid masks are rejected before
    /// any consumer is created.
    pub fn subscribe_to(&self, mask: StreamMask) -> TapResult<Consumer> {
        let mask = mask.validate()?;
        let consumer = self.shared.subscribe();
        self.shared.set_mask(&consumer, mask);
        Ok(consumer)
    }

    pub fn current_mask(&self, consumer: &Consumer) -> StreamMask {
        self.shared.mask(consumer)
    }

    /// Changes the channels `consumer` receives from now on.
    ///
    /// An empty mask or one with unknown bits is rejected and logged; the
    /// previous subscription stays in place.
    pub fn set_mask(&self, consumer: &Consumer, mask: StreamMask) -> TapResult<()> {
        if let Err(err) = mask.validate() {
            tracing::warn!(
                consumer_id = %consumer.id(),
                mask = mask.bits(),
                error = %err,
                "Rejected stream mask"
            );
            return Err(err);
        }
        self.shared.set_mask(consumer, mask);
        Ok(())
    }

    /// Waits until a record matching the consumer's mask is available.
    pub async fn read(&self, consumer: &Consumer) -> StreamRecord {
        self.shared.read(consumer).await
    }

    /// Thread-blocking variant of [`StreamBuffer::read`]. Do not call from
    /// inside an async runtime.
    pub fn read_blocking(&self, consumer: &Consumer) -> StreamRecord {
        self.shared.read_blocking(consumer)
    }

    pub fn try_read(&self, consumer: &Consumer) -> Option<StreamRecord> {
        self.shared.try_read(consumer)
    }

    pub fn drain(&self, consumer: &Consumer) -> Vec<StreamRecord> {
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

    pub fn snapshot(&self) -> Vec<StreamRecord> {
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

    /// Logical index of the oldest retained record.
    pub fn base_offset(&self) -> u64 {
        self.stats().base_offset
    }

    /// Logical index the next appended record will get.
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

impl Default for StreamBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_STREAM_BUFFER_SIZE)
    }
}

impl fmt::Debug for StreamBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamBuffer")
            .field("stats", &self.stats())
            .finish()
    }
}
