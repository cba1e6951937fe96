use std::{cmp::Ordering, collections::BinaryHeap};
use tokio::time::Instant;

////////////////////////////////////////////////////////////////////////////////

/// Элемент, хранящийся в куче
pub(crate) struct Entry<T> {
    /// Момент, не раньше которого значение можно отдавать
    pub(crate) due: Instant,

    /// Порядковый номер добавления, разрешает равные `due` в порядке FIFO
    seq: u64,

    /// Само значение
    pub(crate) value: T,
}

// Сравнение только по (due, seq), значение не участвует.
// `BinaryHeap` - это max-heap, поэтому порядок разворачиваем.
impl<T> Ord for Entry<T> {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .due
            .cmp(&self.due)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl<T> PartialOrd for Entry<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T> PartialEq for Entry<T> {
    fn eq(&self, other: &Self) -> bool {
        self.due == other.due && self.seq == other.seq
    }
}

impl<T> Eq for Entry<T> {}

////////////////////////////////////////////////////////////////////////////////

/// Min-heap of entries keyed by due time.
///
/// Entries with equal due time come out in insertion order.
pub(crate) struct DueHeap<T> {
    entries: BinaryHeap<Entry<T>>,

    /// Следующий порядковый номер
    next_seq: u64,
}

impl<T> DueHeap<T> {
    pub(crate) fn new() -> DueHeap<T> {
        DueHeap {
            entries: BinaryHeap::new(),
            next_seq: 0,
        }
    }

    /// O(log n)
    pub(crate) fn insert(&mut self, due: Instant, value: T) {
        let seq = self.next_seq;
        self.next_seq = self.next_seq.wrapping_add(1);

        self.entries.push(Entry { due, seq, value });
    }

    pub(crate) fn peek_min(&self) -> Option<&Entry<T>> {
        self.entries.peek()
    }

    /// Due time of the current minimum, if any.
    pub(crate) fn next_due(&self) -> Option<Instant> {
        self.entries.peek().map(|entry| entry.due)
    }

    /// O(log n)
    pub(crate) fn extract_min(&mut self) -> Option<Entry<T>> {
        self.entries.pop()
    }

    /// Извлекает минимум только если он уже наступил к моменту `now`
    pub(crate) fn extract_due(&mut self, now: Instant) -> Option<Entry<T>> {
        match self.peek_min() {
            Some(entry) if entry.due <= now => self.extract_min(),
            _ => None,
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drops every pending entry.
    pub(crate) fn clear(&mut self) {
        self.entries.clear();
    }
}

////////////////////////////////////////////////////////////////////////////////
