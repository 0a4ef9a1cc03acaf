use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

static NEXT_CONSUMER_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConsumerId(u64);

impl ConsumerId {
    fn next() -> Self {
        ConsumerId(NEXT_CONSUMER_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConsumerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "consumer-{}", self.0)
    }
}

#[derive(Debug)]
struct Liveness;

/// Handle identifying one reader of a buffer.
///
/// Clones share the same cursor. Once every clone is dropped the cursor is
/// considered stale and the next reap removes it.
#[derive(Debug, Clone)]
pub struct Consumer {
    id: ConsumerId,
    alive: Arc<Liveness>,
}

impl Consumer {
    pub fn new() -> Self {
        Self {
            id: ConsumerId::next(),
            alive: Arc::new(Liveness),
        }
    }

    pub fn id(&self) -> ConsumerId {
        self.id
    }
}

impl Default for Consumer {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug)]
pub struct Cursor<M> {
    pub position: u64,
    pub mask: M,
    alive: Weak<Liveness>,
}

impl<M> Cursor<M> {
    fn is_stale(&self) -> bool {
        self.alive.strong_count() == 0
    }
}

#[derive(Debug)]
pub struct CursorTable<M> {
    cursors: HashMap<ConsumerId, Cursor<M>>,
}

impl<M: Copy> CursorTable<M> {
    pub fn new() -> Self {
        Self {
            cursors: HashMap::new(),
        }
    }

    /// Returns the consumer's cursor, creating it at `end_offset` if missing.
    pub fn ensure_registered(
        &mut self,
        consumer: &Consumer,
        end_offset: u64,
        default_mask: M,
    ) -> &mut Cursor<M> {
        self.cursors.entry(consumer.id).or_insert_with(|| {
            tracing::trace!(consumer_id = %consumer.id, position = end_offset, "Consumer registered");
            Cursor {
                position: end_offset,
                mask: default_mask,
                alive: Arc::downgrade(&consumer.alive),
            }
        })
    }

    pub fn get(&self, consumer: &Consumer) -> Option<&Cursor<M>> {
        self.cursors.get(&consumer.id)
    }

    pub fn len(&self) -> usize {
        self.cursors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cursors.is_empty()
    }

    /// Removes cursors whose consumer handles have all been dropped.
    pub fn reap(&mut self) -> usize {
        let before = self.cursors.len();
        self.cursors.retain(|_, cursor| !cursor.is_stale());
        before - self.cursors.len()
    }
}

impl<M: Copy> Default for CursorTable<M> {
    fn default() -> Self {
        Self::new()
    }
}
