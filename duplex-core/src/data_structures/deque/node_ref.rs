use std::fmt;
use std::ops::Deref;
use std::ptr;

use super::lock_free_deque::{LockFreeDeque, NodePtr};

/// Handle to a node of a [`LockFreeDeque`].
///
/// Returned by the push operations and by traversal. A handle stays valid
/// for as long as the deque is borrowed, even after its node was popped or
/// removed: the value can still be read, and `next`/`prev` continue from the
/// nearest live neighbour.
pub struct NodeRef<'a, T> {
    deque: &'a LockFreeDeque<T>,
    node: NodePtr<T>,
}

impl<'a, T> NodeRef<'a, T> {
    pub(super) fn new(deque: &'a LockFreeDeque<T>, node: NodePtr<T>) -> Self {
        debug_assert!(node != deque.head && node != deque.tail);
        NodeRef { deque, node }
    }

    #[inline]
    pub(crate) fn as_ptr(&self) -> NodePtr<T> {
        self.node
    }

    #[inline]
    pub(super) fn deque(&self) -> &'a LockFreeDeque<T> {
        self.deque
    }

    pub fn value(&self) -> &'a T {
        self.deque.node(self.node).value()
    }

    /// Whether the node was popped or removed.
    pub fn is_removed(&self) -> bool {
        self.deque.node(self.node).is_removed()
    }

    /// Shorthand for [`LockFreeDeque::next`].
    pub fn next(&self) -> Option<NodeRef<'a, T>> {
        self.deque.next(*self)
    }

    /// Shorthand for [`LockFreeDeque::prev`].
    pub fn prev(&self) -> Option<NodeRef<'a, T>> {
        self.deque.prev(*self)
    }
}

impl<T> Deref for NodeRef<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        self.value()
    }
}

impl<T> Clone for NodeRef<'_, T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for NodeRef<'_, T> {}

impl<T> PartialEq for NodeRef<'_, T> {
    fn eq(&self, other: &Self) -> bool {
        ptr::eq(self.deque, other.deque) && self.node == other.node
    }
}

impl<T> Eq for NodeRef<'_, T> {}

impl<T: fmt::Debug> fmt::Debug for NodeRef<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeRef")
            .field("value", self.value())
            .field("removed", &self.is_removed())
            .finish()
    }
}

// Safety: a handle is a shared borrow of the deque plus a pointer the deque
// keeps alive; it is as thread-safe as `&LockFreeDeque<T>`.
unsafe impl<T: Send + Sync> Send for NodeRef<'_, T> {}
unsafe impl<T: Send + Sync> Sync for NodeRef<'_, T> {}
