use super::cursor::{Consumer, CursorTable};
use super::record::{Line, StreamRecord};
use super::window::Window;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::Notify;

/// A record that can be filtered against a consumer's subscription.
pub(crate) trait Classified: Clone {
    type Mask: Copy + Send;

    fn admits(&self, mask: Self::Mask) -> bool;
}

impl Classified for Arc<Line> {
    type Mask = ();

    fn admits(&self, _mask: ()) -> bool {
        true
    }
}

impl Classified for StreamRecord {
    type Mask = super::record::StreamMask;

    fn admits(&self, mask: Self::Mask) -> bool {
        self.mask().intersects(mask)
    }
}

/// Point-in-time view of a buffer, for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferStats {
    pub buffered: usize,
    pub max_size: usize,
    pub base_offset: u64,
    pub end_offset: u64,
    pub evicted_total: u64,
    pub consumers: usize,
}

struct State<R: Classified> {
    window: Window<R>,
    cursors: CursorTable<R::Mask>,
}

impl<R: Classified> State<R> {
    /// Advances the consumer past the next admitted record and returns it.
    ///
    /// Records the consumer is not subscribed to are skipped, not kept.
    fn next_for(&mut self, consumer: &Consumer, default_mask: R::Mask) -> Option<R> {
        let State { window, cursors } = self;
        let base = window.base_offset();
        let end = window.end_offset();
        let cursor = cursors.ensure_registered(consumer, end, default_mask);
        if cursor.position < base {
            tracing::trace!(
                consumer_id = %consumer.id(),
                skipped = base - cursor.position,
                "Consumer fell behind; fast-forwarding to oldest retained line"
            );
            cursor.position = base;
        }
        while cursor.position < end {
            let record = window.resolve(cursor.position);
            cursor.position += 1;
            if let Some(record) = record
                && record.admits(cursor.mask)
            {
                return Some(record.clone());
            }
        }
        None
    }
}

/// Mutex-guarded window plus cursor table shared by producer and consumers.
///
/// The lock is only held for in-memory work. Waiting readers park on `notify`
/// outside the lock and re-check every `poll_interval` regardless.
pub(crate) struct Shared<R: Classified> {
    name: &'static str,
    state: Mutex<State<R>>,
    notify: Notify,
    default_mask: R::Mask,
    poll_interval: Duration,
}

impl<R: Classified> Shared<R> {
    pub fn new(
        name: &'static str,
        max_size: usize,
        default_mask: R::Mask,
        poll_interval: Duration,
    ) -> Self {
        Self {
            name,
            state: Mutex::new(State {
                window: Window::new(max_size),
                cursors: CursorTable::new(),
            }),
            notify: Notify::new(),
            default_mask,
            poll_interval: poll_interval.max(Duration::from_millis(1)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State<R>> {
        self.state.lock().expect("stream buffer mutex poisoned")
    }

    pub fn append(&self, record: R) {
        let evicted = self.lock().window.append(record);
        if evicted > 0 {
            tracing::trace!(buffer = self.name, evicted, "Buffer full; oldest lines dropped");
        }
        self.notify.notify_waiters();
    }

    pub fn subscribe(&self) -> Consumer {
        let consumer = Consumer::new();
        self.register(&consumer);
        consumer
    }

    pub fn register(&self, consumer: &Consumer) {
        let mut state = self.lock();
        let end = state.window.end_offset();
        state
            .cursors
            .ensure_registered(consumer, end, self.default_mask);
    }

    pub fn try_read(&self, consumer: &Consumer) -> Option<R> {
        self.lock().next_for(consumer, self.default_mask)
    }

    pub async fn read(&self, consumer: &Consumer) -> R {
        loop {
            // Armed before the check so an append in between still wakes us.
            let notified = self.notify.notified();
            if let Some(record) = self.try_read(consumer) {
                return record;
            }
            tokio::select! {
                _ = notified => {}
                _ = tokio::time::sleep(self.poll_interval) => {}
            }
        }
    }

    pub fn read_blocking(&self, consumer: &Consumer) -> R {
        loop {
            if let Some(record) = self.try_read(consumer) {
                return record;
            }
            std::thread::sleep(self.poll_interval);
        }
    }

    pub fn drain(&self, consumer: &Consumer) -> Vec<R> {
        let mut state = self.lock();
        let State { window, cursors } = &mut *state;
        let end = window.end_offset();
        let cursor = cursors.ensure_registered(consumer, end, self.default_mask);
        let mask = cursor.mask;
        let records = window
            .iter_from(cursor.position)
            .filter(|record| record.admits(mask))
            .cloned()
            .collect();
        cursor.position = end;
        records
    }

    pub fn rewind(&self, consumer: &Consumer) {
        let mut state = self.lock();
        let State { window, cursors } = &mut *state;
        let cursor = cursors.ensure_registered(consumer, window.end_offset(), self.default_mask);
        cursor.position = window.base_offset();
    }

    pub fn mask(&self, consumer: &Consumer) -> R::Mask {
        let mut state = self.lock();
        let end = state.window.end_offset();
        state
            .cursors
            .ensure_registered(consumer, end, self.default_mask)
            .mask
    }

    pub fn set_mask(&self, consumer: &Consumer, mask: R::Mask) {
        let mut state = self.lock();
        let end = state.window.end_offset();
        state
            .cursors
            .ensure_registered(consumer, end, self.default_mask)
            .mask = mask;
    }

    pub fn position(&self, consumer: &Consumer) -> Option<u64> {
        self.lock().cursors.get(consumer).map(|cursor| cursor.position)
    }

    pub fn reap(&self) -> usize {
        let reaped = self.lock().cursors.reap();
        if reaped > 0 {
            tracing::debug!(buffer = self.name, reaped, "Reaped stale consumers");
        }
        reaped
    }

    pub fn snapshot(&self) -> Vec<R> {
        self.lock().window.iter_from(0).cloned().collect()
    }

    pub fn stats(&self) -> BufferStats {
        let state = self.lock();
        BufferStats {
            buffered: state.window.len(),
            max_size: state.window.max_size(),
            base_offset: state.window.base_offset(),
            end_offset: state.window.end_offset(),
            evicted_total: state.window.evicted_total(),
            consumers: state.cursors.len(),
        }
    }
}
