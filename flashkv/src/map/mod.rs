//! Ordered map
//!
//! A height balanced (AVL) binary search tree. Nodes live in an arena and refer to
//! their children by index, so the map owns every node outright and a subtree is
//! simply the set of nodes reachable from an index.
//!
//! Every node caches the heights of its left and right subtrees. After an insert or
//! erase, the nodes on the path back up to the root refresh those heights and rotate
//! whenever the two sides differ by more than one. That keeps the height of the tree
//! within ~1.44 log2(n + 2) and every operation O(log n).
//!
//! Recursion depth during insert/erase is bounded by the same height; traversal
//! uses an explicit stack (see [`Cursor`]).

use std::cmp::Ordering;

use crate::error::{ErrorFlags, KvError, Result};

use self::node::{Node, NodeId};

pub use self::iter::{Cursor, Iter};

mod iter;
mod node;

/// An ordered map from `K` to `V`.
#[derive(Clone, Debug)]
pub struct Map<K, V> {
    slots: Vec<Option<Node<K, V>>>,
    vacant: Vec<NodeId>,
    root: Option<NodeId>,
    len: usize,
    errors: ErrorFlags,
}

impl<K, V> Default for Map<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> Map<K, V> {
    /// Create an empty map.
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            vacant: Vec::new(),
            root: None,
            len: 0,
            errors: ErrorFlags::new(),
        }
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Is the map empty?
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Height of the tree. An empty map has height 0.
    pub fn height(&self) -> usize {
        self.subtree_height(self.root) as usize
    }

    /// Remove every entry.
    ///
    /// The error register is left alone.
    pub fn clear(&mut self) {
        self.slots.clear();
        self.vacant.clear();
        self.root = None;
        self.len = 0;
    }

    /// Errors reported by this map since the last [`Map::clear_errors`].
    pub fn errors(&self) -> ErrorFlags {
        self.errors
    }

    /// Reset the error register.
    pub fn clear_errors(&mut self) {
        self.errors.clear();
    }

    /// Iterate entries in ascending key order.
    pub fn iter(&self) -> Iter<'_, K, V> {
        Iter::new(self)
    }

    /// A detached cursor positioned before the smallest key.
    pub fn cursor(&self) -> Cursor {
        Cursor::new(self)
    }

    pub(crate) fn slot(&self, id: NodeId) -> Option<&Node<K, V>> {
        self.slots.get(id)?.as_ref()
    }

    fn node(&self, id: NodeId) -> &Node<K, V> {
        self.slots[id]
            .as_ref()
            .expect("ids reachable from the root are always occupied; qed")
    }

    fn node_mut(&mut self, id: NodeId) -> &mut Node<K, V> {
        self.slots[id]
            .as_mut()
            .expect("ids reachable from the root are always occupied; qed")
    }

    fn subtree_height(&self, at: Option<NodeId>) -> u8 {
        at.map_or(0, |id| self.node(id).height())
    }

    fn alloc(&mut self, node: Node<K, V>) -> Result<NodeId> {
        if let Some(id) = self.vacant.pop() {
            self.slots[id] = Some(node);
            return Ok(id);
        }
        self.slots.try_reserve(1).map_err(|_| KvError::BadAlloc)?;
        self.slots.push(Some(node));
        Ok(self.slots.len() - 1)
    }

    fn release(&mut self, id: NodeId) -> Node<K, V> {
        let node = self.slots[id]
            .take()
            .expect("released ids are always occupied; qed");
        self.vacant.push(id);
        node
    }

    /// Recompute the cached subtree heights of a node from its children.
    fn refresh(&mut self, id: NodeId) {
        let (left, right) = {
            let node = self.node(id);
            (node.left, node.right)
        };
        let left_height = self.subtree_height(left);
        let right_height = self.subtree_height(right);
        let node = self.node_mut(id);
        node.left_height = left_height;
        node.right_height = right_height;
    }

    fn rotate_left(&mut self, id: NodeId) -> NodeId {
        let Some(pivot) = self.node(id).right else {
            return id;
        };
        let inner = self.node(pivot).left;
        self.node_mut(id).right = inner;
        self.refresh(id);
        self.node_mut(pivot).left = Some(id);
        self.refresh(pivot);
        pivot
    }

    fn rotate_right(&mut self, id: NodeId) -> NodeId {
        let Some(pivot) = self.node(id).left else {
            return id;
        };
        let inner = self.node(pivot).right;
        self.node_mut(id).left = inner;
        self.refresh(id);
        self.node_mut(pivot).right = Some(id);
        self.refresh(pivot);
        pivot
    }

    /// Refresh a node and restore the AVL property beneath it, returning the
    /// (possibly new) root of the subtree.
    fn rebalance(&mut self, id: NodeId) -> NodeId {
        self.refresh(id);
        let (balance, left, right) = {
            let node = self.node(id);
            (node.balance(), node.left, node.right)
        };
        if balance > 1 {
            if let Some(left) = left {
                if self.node(left).balance() < 0 {
                    let pivot = self.rotate_left(left);
                    self.node_mut(id).left = Some(pivot);
                }
                return self.rotate_right(id);
            }
        } else if balance < -1 {
            if let Some(right) = right {
                if self.node(right).balance() > 0 {
                    let pivot = self.rotate_right(right);
                    self.node_mut(id).right = Some(pivot);
                }
                return self.rotate_left(id);
            }
        }
        id
    }

    /// Unlink the leftmost node of a subtree. Returns the new subtree root and the
    /// unlinked node, which is left occupied in the arena.
    fn detach_min(&mut self, id: NodeId) -> (Option<NodeId>, NodeId) {
        let (left, right) = {
            let node = self.node(id);
            (node.left, node.right)
        };
        match left {
            None => (right, id),
            Some(left) => {
                let (rest, min) = self.detach_min(left);
                self.node_mut(id).left = rest;
                (Some(self.rebalance(id)), min)
            }
        }
    }
}

impl<K, V> Map<K, V>
where
    K: Ord,
{
    /// Insert a new entry.
    ///
    /// Fails with [`KvError::NotUnique`] if the key is already present and
    /// [`KvError::BadAlloc`] if a node could not be allocated. The map is unchanged
    /// on failure.
    pub fn insert(&mut self, key: K, value: V) -> Result<()> {
        let result = self.insert_at(self.root, key, value);
        let root = self.errors.record(result)?;
        self.root = Some(root);
        self.len += 1;
        Ok(())
    }

    /// Look up a key.
    pub fn find(&self, key: &K) -> Option<&V> {
        self.locate(key).map(|id| &self.node(id).value)
    }

    /// Look up a key for modification of its value.
    pub fn find_mut(&mut self, key: &K) -> Option<&mut V> {
        let id = self.locate(key)?;
        Some(&mut self.node_mut(id).value)
    }

    /// Is the key present?
    pub fn contains_key(&self, key: &K) -> bool {
        self.locate(key).is_some()
    }

    /// Return a copy of the value for `key`, inserting `default` first if the key is
    /// absent. The flag is true when the entry was inserted.
    pub fn find_or_insert(&mut self, key: K, default: V) -> Result<(V, bool)>
    where
        V: Clone,
    {
        if let Some(value) = self.find(&key) {
            return Ok((value.clone(), false));
        }
        self.insert(key, default.clone())?;
        Ok((default, true))
    }

    /// Remove an entry and return its value.
    pub fn erase(&mut self, key: &K) -> Result<V> {
        let result = self.erase_at(self.root, key);
        let (root, value) = self.errors.record(result)?;
        self.root = root;
        self.len -= 1;
        Ok(value)
    }

    /// Check ordering, balance, cached heights and entry count.
    pub fn verify(&self) -> bool {
        let mut count = 0;
        self.verify_at(self.root, None, None, &mut count).is_some() && count == self.len
    }

    fn locate(&self, key: &K) -> Option<NodeId> {
        let mut at = self.root;
        while let Some(id) = at {
            let node = self.node(id);
            match key.cmp(&node.key) {
                Ordering::Less => at = node.left,
                Ordering::Greater => at = node.right,
                Ordering::Equal => return Some(id),
            }
        }
        None
    }

    fn insert_at(&mut self, at: Option<NodeId>, key: K, value: V) -> Result<NodeId> {
        let Some(id) = at else {
            return self.alloc(Node::leaf(key, value));
        };
        let (ordering, left, right) = {
            let node = self.node(id);
            (key.cmp(&node.key), node.left, node.right)
        };
        match ordering {
            Ordering::Less => {
                let child = self.insert_at(left, key, value)?;
                self.node_mut(id).left = Some(child);
            }
            Ordering::Greater => {
                let child = self.insert_at(right, key, value)?;
                self.node_mut(id).right = Some(child);
            }
            Ordering::Equal => return Err(KvError::NotUnique),
        }
        Ok(self.rebalance(id))
    }

    fn erase_at(&mut self, at: Option<NodeId>, key: &K) -> Result<(Option<NodeId>, V)> {
        let Some(id) = at else {
            return Err(KvError::NotFound);
        };
        let (ordering, left, right) = {
            let node = self.node(id);
            (key.cmp(&node.key), node.left, node.right)
        };
        let value = match ordering {
            Ordering::Less => {
                let (child, value) = self.erase_at(left, key)?;
                self.node_mut(id).left = child;
                value
            }
            Ordering::Greater => {
                let (child, value) = self.erase_at(right, key)?;
                self.node_mut(id).right = child;
                value
            }
            Ordering::Equal => {
                let node = self.release(id);
                return match (left, right) {
                    (None, None) => Ok((None, node.value)),
                    (Some(child), None) | (None, Some(child)) => Ok((Some(child), node.value)),
                    (Some(left), Some(right)) => {
                        // The in-order successor takes the removed node's place
                        let (rest, successor) = self.detach_min(right);
                        let replacement = self.node_mut(successor);
                        replacement.left = Some(left);
                        replacement.right = rest;
                        Ok((Some(self.rebalance(successor)), node.value))
                    }
                };
            }
        };
        Ok((Some(self.rebalance(id)), value))
    }

    fn verify_at(
        &self,
        at: Option<NodeId>,
        lower: Option<&K>,
        upper: Option<&K>,
        count: &mut usize,
    ) -> Option<u8> {
        let Some(id) = at else {
            return Some(0);
        };
        let node = self.slot(id)?;
        if lower.is_some_and(|lower| node.key <= *lower)
            || upper.is_some_and(|upper| node.key >= *upper)
        {
            return None;
        }
        *count += 1;
        let left = self.verify_at(node.left, lower, Some(&node.key), count)?;
        let right = self.verify_at(node.right, Some(&node.key), upper, count)?;
        if left != node.left_height || right != node.right_height || left.abs_diff(right) > 1 {
            return None;
        }
        Some(1 + left.max(right))
    }
}

#[cfg(test)]
mod tests;
