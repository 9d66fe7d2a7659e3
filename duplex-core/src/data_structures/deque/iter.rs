use std::iter::FusedIterator;

use super::lock_free_deque::{LockFreeDeque, NodePtr};
use super::node_ref::NodeRef;

/// Left-to-right iterator over the live nodes of a [`LockFreeDeque`].
///
/// Weakly consistent: values pushed or removed concurrently may or may not
/// be observed, but every value yielded was live when the cursor reached it.
pub struct Iter<'a, T> {
    deque: &'a LockFreeDeque<T>,
    cursor: NodePtr<T>,
}

impl<'a, T> Iter<'a, T> {
    pub(super) fn new(deque: &'a LockFreeDeque<T>) -> Self {
        Iter {
            deque,
            cursor: deque.head,
        }
    }
}

impl<'a, T> Iterator for Iter<'a, T> {
    type Item = NodeRef<'a, T>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.deque.next_node(self.cursor) {
            Some(next) => {
                self.cursor = next;
                Some(NodeRef::new(self.deque, next))
            }
            None => {
                self.cursor = self.deque.tail;
                None
            }
        }
    }
}

impl<T> FusedIterator for Iter<'_, T> {}

impl<'a, T> IntoIterator for &'a LockFreeDeque<T> {
    type Item = NodeRef<'a, T>;
    type IntoIter = Iter<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}
