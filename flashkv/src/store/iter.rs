use std::cell::RefCell;

use parking_lot::ReentrantMutexGuard;

use super::engine::Engine;
use crate::map::Cursor;

/// In-order iterator over the `(key, block offset)` pairs of a [`KvStore`](super::KvStore).
///
/// Holds the store's lock for its whole lifetime. While it exists the store refuses
/// inserts, deletes and truncation from the owning thread.
pub struct Iter<'a, K, V> {
    guard: ReentrantMutexGuard<'a, RefCell<Engine<K, V>>>,
    cursor: Cursor,
}

impl<'a, K, V> Iter<'a, K, V> {
    pub(super) fn new(guard: ReentrantMutexGuard<'a, RefCell<Engine<K, V>>>) -> Self {
        let cursor = {
            let mut engine = guard.borrow_mut();
            engine.iterators += 1;
            engine.index.cursor()
        };
        Self { guard, cursor }
    }
}

impl<'a, K: Clone, V> Iterator for Iter<'a, K, V> {
    type Item = (K, u32);

    fn next(&mut self) -> Option<Self::Item> {
        let engine = self.guard.borrow();
        let next = self
            .cursor
            .next(&engine.index)
            .map(|(key, offset)| (key.clone(), *offset));
        next
    }
}

impl<'a, K, V> Drop for Iter<'a, K, V> {
    fn drop(&mut self) {
        let mut engine = self.guard.borrow_mut();
        engine.iterators = engine.iterators.saturating_sub(1);
    }
}
