//! In-order traversal without recursion.
//!
//! A [`Cursor`] only holds the ids of the ancestors still to be visited, so it does
//! not borrow the map. That lets an owner (the store's iterator) keep a cursor
//! alive across separate, short borrows of the map.

use super::node::NodeId;
use super::Map;

/// Detached in-order position within a [`Map`].
#[derive(Clone, Debug)]
pub struct Cursor {
    stack: Vec<NodeId>,
}

impl Cursor {
    pub(crate) fn new<K, V>(map: &Map<K, V>) -> Self {
        // An AVL tree never needs more entries than its height
        let mut cursor = Self {
            stack: Vec::with_capacity(map.height()),
        };
        cursor.push_left_spine(map, map.root);
        cursor
    }

    /// Advance and return the next entry, in ascending key order.
    ///
    /// If the map was structurally modified since the cursor was created the
    /// traversal may stop early, but it never yields a vacated slot.
    pub fn next<'m, K, V>(&mut self, map: &'m Map<K, V>) -> Option<(&'m K, &'m V)> {
        let id = self.stack.pop()?;
        let node = map.slot(id)?;
        self.push_left_spine(map, node.right);
        Some((&node.key, &node.value))
    }

    /// Has the traversal finished?
    pub fn is_done(&self) -> bool {
        self.stack.is_empty()
    }

    fn push_left_spine<K, V>(&mut self, map: &Map<K, V>, mut at: Option<NodeId>) {
        while let Some(id) = at {
            match map.slot(id) {
                Some(node) => {
                    self.stack.push(id);
                    at = node.left;
                }
                None => break,
            }
        }
    }
}

/// Borrowing in-order iterator over a [`Map`].
pub struct Iter<'m, K, V> {
    map: &'m Map<K, V>,
    cursor: Cursor,
    remaining: usize,
}

impl<'m, K, V> Iter<'m, K, V> {
    pub(crate) fn new(map: &'m Map<K, V>) -> Self {
        Self {
            map,
            cursor: Cursor::new(map),
            remaining: map.len(),
        }
    }
}

impl<'m, K, V> Iterator for Iter<'m, K, V> {
    type Item = (&'m K, &'m V);

    fn next(&mut self) -> Option<Self::Item> {
        let item = self.cursor.next(self.map)?;
        self.remaining = self.remaining.saturating_sub(1);
        Some(item)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl<'m, K, V> IntoIterator for &'m Map<K, V> {
    type Item = (&'m K, &'m V);
    type IntoIter = Iter<'m, K, V>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}
