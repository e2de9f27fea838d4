// Bounded keyed buffer for events that arrive before their owner

use std::collections::{HashMap, VecDeque};
use std::hash::Hash;

pub const DEFAULT_BUFFER_CAPACITY: usize = 1024;

/// Values grouped by target key, with at most `capacity` distinct keys.
/// Past capacity the oldest key and all of its values are evicted.
#[derive(Debug)]
pub struct PendingBuffer<K, V> {
    entries: HashMap<K, Vec<V>>,
    order: VecDeque<K>,
    capacity: usize,
}

impl<K, V> PendingBuffer<K, V>
where
    K: Eq + Hash + Clone,
{
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: HashMap::new(),
            order: VecDeque::new(),
            capacity: capacity.max(1),
        }
    }

    /// Buffer a value. Returns the number of values evicted to make room.
    pub fn push(&mut self, key: K, value: V) -> usize {
        if let Some(values) = self.entries.get_mut(&key) {
            values.push(value);
            return 0;
        }

        let mut evicted = 0;
        while self.entries.len() >= self.capacity {
            let Some(oldest) = self.order.pop_front() else {
                break;
            };
            if let Some(values) = self.entries.remove(&oldest) {
                evicted += values.len();
            }
        }

        self.order.push_back(key.clone());
        self.entries.insert(key, vec![value]);
        evicted
    }

    /// Remove and return every value buffered for `key`
    pub fn take(&mut self, key: &K) -> Vec<V> {
        match self.entries.remove(key) {
            Some(values) => {
                self.order.retain(|k| k != key);
                values
            }
            None => Vec::new(),
        }
    }

    /// Drop all keys not matching the predicate. Returns dropped value count.
    pub fn retain(&mut self, mut keep: impl FnMut(&K) -> bool) -> usize {
        let mut dropped = 0;
        self.entries.retain(|k, values| {
            let kept = keep(k);
            if !kept {
                dropped += values.len();
            }
            kept
        });
        let entries = &self.entries;
        self.order.retain(|k| entries.contains_key(k));
        dropped
    }

    pub fn contains(&self, key: &K) -> bool {
        self.entries.contains_key(key)
    }

    /// Number of distinct keys
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Total number of buffered values
    pub fn value_count(&self) -> usize {
        self.entries.values().map(Vec::len).sum()
    }

    pub fn clear(&mut self) -> usize {
        let dropped = self.value_count();
        self.entries.clear();
        self.order.clear();
        dropped
    }
}

impl<K, V> Default for PendingBuffer<K, V>
where
    K: Eq + Hash + Clone,
{
    fn default() -> Self {
        Self::new(DEFAULT_BUFFER_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_take_preserves_arrival_order() {
        let mut buffer = PendingBuffer::new(4);
        buffer.push("a", 1);
        buffer.push("b", 10);
        buffer.push("a", 2);

        assert_eq!(buffer.take(&"a"), vec![1, 2]);
        assert!(buffer.take(&"a").is_empty());
        assert_eq!(buffer.len(), 1);
    }

    #[test]
    fn test_capacity_evicts_oldest_key() {
        let mut buffer = PendingBuffer::new(2);
        buffer.push("a", 1);
        buffer.push("a", 2);
        buffer.push("b", 3);

        let evicted = buffer.push("c", 4);

        assert_eq!(evicted, 2);
        assert!(!buffer.contains(&"a"));
        assert!(buffer.contains(&"b"));
        assert!(buffer.contains(&"c"));
        assert_eq!(buffer.len(), 2);
    }

    #[test]
    fn test_retain_counts_dropped_values() {
        let mut buffer = PendingBuffer::new(8);
        buffer.push(("case-1", "s1"), 1);
        buffer.push(("case-1", "s2"), 2);
        buffer.push(("case-2", "s1"), 3);

        let dropped = buffer.retain(|(case, _)| *case != "case-1");

        assert_eq!(dropped, 2);
        assert_eq!(buffer.value_count(), 1);
        assert_eq!(buffer.clear(), 1);
        assert!(buffer.is_empty());
    }
}
