//! AVL Node Types

/// Index of a node within the map's arena.
pub(crate) type NodeId = usize;

#[derive(Clone, Debug)]
pub(crate) struct Node<K, V> {
    pub(crate) key: K,
    pub(crate) value: V,
    pub(crate) left: Option<NodeId>,
    pub(crate) right: Option<NodeId>,
    pub(crate) left_height: u8,
    pub(crate) right_height: u8,
}

impl<K, V> Node<K, V> {
    pub(crate) fn leaf(key: K, value: V) -> Self {
        Self {
            key,
            value,
            left: None,
            right: None,
            left_height: 0,
            right_height: 0,
        }
    }

    /// Height of the subtree rooted here (a leaf is 1).
    pub(crate) fn height(&self) -> u8 {
        1 + self.left_height.max(self.right_height)
    }

    /// Positive when left heavy, negative when right heavy.
    pub(crate) fn balance(&self) -> i16 {
        i16::from(self.left_height) - i16::from(self.right_height)
    }
}
