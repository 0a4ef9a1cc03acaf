use std::collections::VecDeque;

/// Bounded, append-only window over a logically unbounded sequence.
///
/// Every record keeps the logical index it was appended at; the window only
/// retains the newest `max_size` of them. `base_offset` is the logical index of
/// the oldest retained record.
#[derive(Debug)]
pub struct Window<R> {
    records: VecDeque<R>,
    base_offset: u64,
    max_size: usize,
    evicted_total: u64,
}

impl<R> Window<R> {
    pub fn new(max_size: usize) -> Self {
        let max_size = max_size.max(1);
        Self {
            records: VecDeque::with_capacity(max_size.min(1024)),
            base_offset: 0,
            max_size,
            evicted_total: 0,
        }
    }

    /// Appends a record and returns how many old records were evicted.
    pub fn append(&mut self, record: R) -> u64 {
        self.records.push_back(record);
        self.enforce_limit()
    }

    pub fn base_offset(&self) -> u64 {
        self.base_offset
    }

    /// Logical index the next appended record will receive.
    pub fn end_offset(&self) -> u64 {
        self.base_offset + self.records.len() as u64
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    pub fn evicted_total(&self) -> u64 {
        self.evicted_total
    }

    pub fn resolve(&self, index: u64) -> Option<&R> {
        let position = index.checked_sub(self.base_offset)?;
        self.records.get(usize::try_from(position).ok()?)
    }

    /// Retained records starting at `index`, clamped to the window.
    pub fn iter_from(&self, index: u64) -> impl Iterator<Item = &R> {
        let skip = index.saturating_sub(self.base_offset);
        let skip = usize::try_from(skip).unwrap_or(usize::MAX);
        self.records.iter().skip(skip)
    }

    fn enforce_limit(&mut self) -> u64 {
        let mut evicted = 0u64;
        while self.records.len() > self.max_size {
            if self.records.pop_front().is_none() {
                break;
            }
            self.base_offset += 1;
            evicted += 1;
        }
        self.evicted_total = self.evicted_total.saturating_add(evicted);
        evicted
    }
}
