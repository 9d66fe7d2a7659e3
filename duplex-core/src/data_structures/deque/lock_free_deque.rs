use std::collections::HashSet;
use std::ptr;
use std::sync::atomic::AtomicPtr;

use super::iter::Iter;
use super::node_ref::NodeRef;
use super::options::DequeOptions;
use crate::data_structures::MarkableRef;
use crate::guard::{DeferredReclamation, TrackedNode};

pub(super) type NodePtr<T> = *mut DequeNode<T>;

///
/// Concurrent doubly linked deque based on Sundell & Tsigas,
/// 'Lock-free deques and doubly linked lists'.
///
/// # Memory
///
/// Operations through `&self` never free anything. A popped or removed node,
/// together with its value, stays allocated until [`reclaim`](Self::reclaim),
/// [`clear`](Self::clear) or drop, because handles and lagging helpers may
/// still follow links into it. A deque shared through an `Arc` therefore
/// grows by one node per push until someone takes exclusive access again:
///
/// ```
/// use std::sync::Arc;
/// use duplex_core::LockFreeDeque;
///
/// let mut shared = Arc::new(LockFreeDeque::new());
/// for i in 0..1_000 {
///     shared.push_right(i);
///     shared.pop_left();
/// }
/// assert_eq!(shared.allocated_nodes(), 1_002);
///
/// // Workers parked: compact.
/// if let Some(deque) = Arc::get_mut(&mut shared) {
///     deque.reclaim();
/// }
/// assert_eq!(shared.allocated_nodes(), 2);
/// ```
///
// =============================================================================
// DEQUE LAYOUT
// =============================================================================
//
// ┌──────┐ next ┌──────┐ next ┌──────┐ next ┌──────┐
// │ HEAD │─────►│  A   │─────►│  B   │─────►│ TAIL │
// │(sent)│◄─────│      │◄─────│      │◄─────│(sent)│
// └──────┘ prev └──────┘ prev └──────┘ prev └──────┘
//
// Both links of every node are markable references. The forward chain is
// authoritative; `prev` links are hints that are repaired lazily.
//
// NODE LIFECYCLE:
//
//   LIVE ──(CAS next: x → x|MARK)──► DELETED ──(mark prev)──► PREV-MARKED
//        ──(CAS pred.next: node → succ)──► UNLINKED
//
// The first CAS is the linearization point of pop/remove. Everything after it
// can be finished by any thread that runs into the half-deleted node.
//
// INVARIANTS:
// 1. HEAD and TAIL are never marked and never removed
// 2. A node's prev is marked only after its next is marked
// 3. A node is spliced out of the forward chain only after both links are marked
// 4. Nodes stay allocated while the deque is shared (see `crate::guard`)
//
pub struct LockFreeDeque<T> {
    pub(super) head: NodePtr<T>,
    pub(super) tail: NodePtr<T>,
    options: DequeOptions,
    reclamation: DeferredReclamation<DequeNode<T>>,
}

pub(crate) struct DequeNode<T> {
    value: Option<T>,
    pub(super) next: MarkableRef<DequeNode<T>>,
    pub(super) prev: MarkableRef<DequeNode<T>>,
    allocation_link: AtomicPtr<DequeNode<T>>,
}

impl<T> DequeNode<T> {
    fn new(value: T) -> Self {
        DequeNode {
            value: Some(value),
            next: MarkableRef::new(ptr::null_mut(), false),
            prev: MarkableRef::new(ptr::null_mut(), false),
            allocation_link: AtomicPtr::new(ptr::null_mut()),
        }
    }

    fn new_sentinel() -> Self {
        DequeNode {
            value: None,
            next: MarkableRef::new(ptr::null_mut(), false),
            prev: MarkableRef::new(ptr::null_mut(), false),
            allocation_link: AtomicPtr::new(ptr::null_mut()),
        }
    }

    pub(super) fn value(&self) -> &T {
        self.value
            .as_ref()
            .expect("Cannot get value from sentinel node")
    }

    pub(super) fn is_removed(&self) -> bool {
        self.next.is_marked()
    }
}

unsafe impl<T> TrackedNode for DequeNode<T> {
    fn allocation_link(&self) -> &AtomicPtr<Self> {
        &self.allocation_link
    }
}

impl<T> LockFreeDeque<T> {
    pub fn new() -> Self {
        Self::with_options(DequeOptions::default())
    }

    pub fn with_options(options: DequeOptions) -> Self {
        let head = Box::into_raw(Box::new(DequeNode::new_sentinel()));
        let tail = Box::into_raw(Box::new(DequeNode::new_sentinel()));

        let reclamation = DeferredReclamation::new();
        unsafe {
            (*head).next.store(tail, false);
            (*tail).prev.store(head, false);

            reclamation.track(head);
            reclamation.track(tail);
        }

        LockFreeDeque {
            head,
            tail,
            options,
            reclamation,
        }
    }

    pub fn options(&self) -> &DequeOptions {
        &self.options
    }

    /// Borrow a node reachable from this deque.
    #[inline]
    pub(super) fn node(&self, ptr: NodePtr<T>) -> &DequeNode<T> {
        debug_assert!(!ptr.is_null(), "followed a null link");
        // Safety: every node reachable through a link or a handle is tracked by
        // `self.reclamation`, which frees nothing while `self` is shared.
        unsafe { &*ptr }
    }

    fn allocate(&self, value: T) -> NodePtr<T> {
        let node = Box::into_raw(Box::new(DequeNode::new(value)));
        // Safety: fresh allocation, registered exactly once.
        unsafe { self.reclamation.track(node) };
        node
    }

    pub(super) fn owns(&self, node: &NodeRef<'_, T>) -> bool {
        ptr::eq(node.deque(), self)
    }

    // =========================================================================
    // Push
    // =========================================================================

    /// Insert `value` at the left end and return a handle to its node.
    pub fn push_left(&self, value: T) -> NodeRef<'_, T> {
        let node = self.allocate(value);
        let prev = self.head;
        let mut next = self.node(prev).next.reference();
        let backoff = self.options.contention_backoff();

        loop {
            // HEAD is never marked, so only a moved successor fails this check.
            if !self.node(prev).next.compare_and_set(next, next, false, false) {
                next = self.node(prev).next.reference();
                continue;
            }

            self.node(node).prev.store(prev, false);
            self.node(node).next.store(next, false);

            if self.node(prev).next.compare_and_set(next, node, false, false) {
                break;
            }

            backoff.retry();
        }

        self.push_common(node, next);
        NodeRef::new(self, node)
    }

    /// Insert `value` at the right end and return a handle to its node.
    pub fn push_right(&self, value: T) -> NodeRef<'_, T> {
        let node = self.allocate(value);
        let next = self.tail;
        let mut prev = self.node(next).prev.reference();
        let backoff = self.options.contention_backoff();

        loop {
            if !self.node(prev).next.compare_and_set(next, next, false, false) {
                // TAIL.prev is stale: a concurrent push or pop moved the last node.
                prev = self.help_insert(prev, next);
                continue;
            }

            self.node(node).prev.store(prev, false);
            self.node(node).next.store(next, false);

            if self.node(prev).next.compare_and_set(next, node, false, false) {
                break;
            }

            backoff.retry();
        }

        self.push_common(node, next);
        NodeRef::new(self, node)
    }

    // =========================================================================
    // Pop
    // =========================================================================

    /// Remove the leftmost value and hand it to `f`.
    ///
    /// The node keeps its value until it is reclaimed, so `f` only borrows it.
    pub fn pop_left_with<F, R>(&self, f: F) -> Option<R>
    where
        F: FnOnce(&T) -> R,
    {
        let prev = self.head;
        let backoff = self.options.contention_backoff();

        loop {
            let node = self.node(prev).next.reference();
            if node == self.tail {
                return None;
            }

            let (removed, node_next) = self.node(node).next.get();
            if removed {
                // Another pop or remove won this node; finish its unlink first.
                #[cfg(feature = "tracing")]
                tracing::trace!("pop_left: helping concurrent delete");

                self.help_delete(node);
                continue;
            }

            if self
                .node(node)
                .next
                .compare_and_set(node_next, node_next, false, true)
            {
                self.help_delete(node);
                let next = self.node(node).next.reference();
                self.help_insert(prev, next);

                return Some(f(self.node(node).value()));
            }

            backoff.retry();
        }
    }

    /// Remove the rightmost value and hand it to `f`.
    pub fn pop_right_with<F, R>(&self, f: F) -> Option<R>
    where
        F: FnOnce(&T) -> R,
    {
        let next = self.tail;
        let mut node = self.node(next).prev.reference();
        let backoff = self.options.contention_backoff();

        loop {
            // `node` must be the true last node: its next is TAIL, unmarked.
            if !self.node(node).next.compare_and_set(next, next, false, false) {
                #[cfg(feature = "tracing")]
                tracing::trace!("pop_right: correcting stale tail back link");

                node = self.help_insert(node, next);
                continue;
            }

            if node == self.head {
                return None;
            }

            if self.node(node).next.compare_and_set(next, next, false, true) {
                self.help_delete(node);
                let prev = self.node(node).prev.reference();
                self.help_insert(prev, next);

                return Some(f(self.node(node).value()));
            }

            backoff.retry();
        }
    }

    /// Remove and return a clone of the leftmost value.
    pub fn pop_left(&self) -> Option<T>
    where
        T: Clone,
    {
        self.pop_left_with(T::clone)
    }

    /// Remove and return a clone of the rightmost value.
    pub fn pop_right(&self) -> Option<T>
    where
        T: Clone,
    {
        self.pop_right_with(T::clone)
    }

    // =========================================================================
    // Remove
    // =========================================================================

    /// Remove the node behind `node` and hand its value to `f`.
    ///
    /// Returns `None` if the node was already removed (by a pop or another
    /// remove) or if the handle belongs to a different deque.
    pub fn remove_with<F, R>(&self, node: NodeRef<'_, T>, f: F) -> Option<R>
    where
        F: FnOnce(&T) -> R,
    {
        if !self.owns(&node) {
            return None;
        }

        let node = node.as_ptr();
        if node == self.head || node == self.tail {
            return None;
        }

        let backoff = self.options.contention_backoff();

        loop {
            let (removed, next) = self.node(node).next.get();
            if removed {
                return None;
            }

            if self.node(node).next.compare_and_set(next, next, false, true) {
                self.node(node).prev.set_mark();

                let prev = self.node(node).prev.reference();
                self.correct_prev(prev, next);

                return Some(f(self.node(node).value()));
            }

            backoff.retry();
        }
    }

    /// Remove the node behind `node` and return a clone of its value.
    pub fn remove(&self, node: NodeRef<'_, T>) -> Option<T>
    where
        T: Clone,
    {
        self.remove_with(node, T::clone)
    }

    // =========================================================================
    // Traversal
    // =========================================================================

    /// The live node after `node`, or `None` at the right end.
    pub fn next<'a>(&'a self, node: NodeRef<'a, T>) -> Option<NodeRef<'a, T>> {
        if !self.owns(&node) {
            return None;
        }

        self.next_node(node.as_ptr())
            .map(|next| NodeRef::new(self, next))
    }

    /// The live node before `node`, or `None` at the left end.
    pub fn prev<'a>(&'a self, node: NodeRef<'a, T>) -> Option<NodeRef<'a, T>> {
        if !self.owns(&node) {
            return None;
        }

        self.prev_node(node.as_ptr())
            .map(|prev| NodeRef::new(self, prev))
    }

    /// The leftmost live node.
    pub fn front(&self) -> Option<NodeRef<'_, T>> {
        self.next_node(self.head)
            .map(|node| NodeRef::new(self, node))
    }

    /// The rightmost live node.
    pub fn back(&self) -> Option<NodeRef<'_, T>> {
        self.prev_node(self.tail)
            .map(|node| NodeRef::new(self, node))
    }

    /// Forward iterator over the live nodes.
    pub fn iter(&self) -> Iter<'_, T> {
        Iter::new(self)
    }

    /// Number of live nodes. Only exact when no other thread is mutating.
    pub fn len(&self) -> usize {
        self.iter().count()
    }

    /// Whether both sentinels point at each other.
    ///
    /// Under concurrent mutation this is advisory: a push or pop may have
    /// updated one direction and not yet the other.
    pub fn is_empty(&self) -> bool {
        let first = self.node(self.head).next.reference();
        let last = self.node(self.tail).prev.reference();

        first == self.tail && last == self.head
    }

    pub fn to_vec(&self) -> Vec<T>
    where
        T: Clone,
    {
        self.iter().map(|node| node.value().clone()).collect()
    }

    // =========================================================================
    // Exclusive maintenance
    // =========================================================================

    /// Finish every pending unlink, rebuild the back links and free all nodes
    /// that are no longer part of the deque.
    ///
    /// Returns the number of nodes freed.
    pub fn reclaim(&mut self) -> usize {
        let mut live = HashSet::new();
        live.insert(self.head);
        live.insert(self.tail);

        let mut pred = self.head;
        let mut curr = self.node(pred).next.reference();

        while curr != self.tail {
            let (removed, succ) = self.node(curr).next.get();

            if removed {
                self.node(pred).next.store(succ, false);
            } else {
                self.node(curr).prev.store(pred, false);
                live.insert(curr);
                pred = curr;
            }

            curr = succ;
        }

        self.node(self.tail).prev.store(pred, false);

        // Safety: `&mut self` rules out handles and in-flight operations, and
        // after the rewrite above no live link names a node outside `live`.
        let freed = unsafe { self.reclamation.retain(&live) };

        #[cfg(feature = "tracing")]
        tracing::debug!(freed, live = live.len() - 2, "reclaimed deque nodes");

        freed
    }

    /// Drop every value and reset to an empty deque.
    pub fn clear(&mut self) {
        let (head, tail) = (self.head, self.tail);
        self.node(head).next.store(tail, false);
        self.node(tail).prev.store(head, false);

        #[cfg(feature = "tracing")]
        tracing::debug!("clearing deque");

        self.reclaim();
    }

    /// Number of nodes the deque still owns, the two sentinels and every
    /// popped or removed node not yet reclaimed included.
    pub fn allocated_nodes(&self) -> usize {
        self.reclamation.tracked()
    }
}

impl<T> Default for LockFreeDeque<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> FromIterator<T> for LockFreeDeque<T> {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        let deque = LockFreeDeque::new();
        for value in iter {
            deque.push_right(value);
        }
        deque
    }
}

impl<T> Extend<T> for LockFreeDeque<T> {
    fn extend<I: IntoIterator<Item = T>>(&mut self, iter: I) {
        for value in iter {
            self.push_right(value);
        }
    }
}

impl<T: std::fmt::Debug> std::fmt::Debug for LockFreeDeque<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.iter().map(|node| node.value()))
            .finish()
    }
}

// Nodes (and the values in them) are freed by `reclamation` when the deque is
// dropped; HEAD and TAIL are tracked like any other node.
//
// Safety: values move between threads with the nodes that own them, and are
// shared by reference through handles and pop closures.
unsafe impl<T: Send> Send for LockFreeDeque<T> {}
unsafe impl<T: Send + Sync> Sync for LockFreeDeque<T> {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    #[test]
    fn test_new_deque_is_empty() {
        let deque: LockFreeDeque<i32> = LockFreeDeque::new();

        assert!(deque.is_empty());
        assert_eq!(deque.len(), 0);
        assert!(deque.front().is_none());
        assert!(deque.back().is_none());
        assert_eq!(deque.pop_left(), None);
        assert_eq!(deque.pop_right(), None);
        assert_eq!(deque.allocated_nodes(), 2);
    }

    #[test]
    fn test_push_right_pop_left_is_fifo() {
        let deque = LockFreeDeque::new();
        for i in 0..10 {
            deque.push_right(i);
        }

        for i in 0..10 {
            assert_eq!(deque.pop_left(), Some(i));
        }
        assert_eq!(deque.pop_left(), None);
        assert!(deque.is_empty());
    }

    #[test]
    fn test_push_left_pop_left_is_lifo() {
        let deque = LockFreeDeque::new();
        for i in 0..10 {
            deque.push_left(i);
        }

        for i in (0..10).rev() {
            assert_eq!(deque.pop_left(), Some(i));
        }
        assert!(deque.is_empty());
    }

    #[test]
    fn test_dual_end_symmetry() {
        let deque = LockFreeDeque::new();

        deque.push_left(1);
        assert_eq!(deque.pop_right(), Some(1));
        assert!(deque.is_empty());

        deque.push_right(2);
        assert_eq!(deque.pop_left(), Some(2));
        assert!(deque.is_empty());
    }

    #[test]
    fn test_empty_after_each_matched_pair() {
        let deque = LockFreeDeque::new();

        let node = deque.push_left(1);
        assert!(!deque.is_empty());
        assert_eq!(deque.remove(node), Some(1));
        assert!(deque.is_empty());

        let node = deque.push_right(2);
        assert!(!deque.is_empty());
        assert_eq!(deque.remove(node), Some(2));
        assert!(deque.is_empty());

        deque.push_left(3);
        assert!(!deque.is_empty());
        assert_eq!(deque.pop_right(), Some(3));
        assert!(deque.is_empty());

        deque.push_right(4);
        assert!(!deque.is_empty());
        assert_eq!(deque.pop_left(), Some(4));
        assert!(deque.is_empty());
    }

    #[test]
    fn test_remove_twice_returns_none() {
        let deque = LockFreeDeque::new();
        let a = deque.push_right("a");
        let b = deque.push_right("b");
        let c = deque.push_right("c");

        assert_eq!(deque.remove(b), Some("b"));
        assert_eq!(deque.remove(b), None);
        assert!(b.is_removed());
        assert!(!a.is_removed());

        assert_eq!(deque.to_vec(), vec!["a", "c"]);
        assert_eq!(deque.remove(a), Some("a"));
        assert_eq!(deque.remove(c), Some("c"));
        assert!(deque.is_empty());
    }

    #[test]
    fn test_remove_after_pop_returns_none() {
        let deque = LockFreeDeque::new();
        let node = deque.push_right(5);

        assert_eq!(deque.pop_left(), Some(5));
        assert_eq!(deque.remove(node), None);
        // The popped value is still readable through the handle.
        assert_eq!(*node, 5);
    }

    #[test]
    fn test_foreign_handle_is_rejected() {
        let deque = LockFreeDeque::new();
        let other = LockFreeDeque::new();

        let foreign = other.push_right(1);
        deque.push_right(2);

        assert_eq!(deque.remove(foreign), None);
        assert!(deque.next(foreign).is_none());
        assert!(deque.prev(foreign).is_none());
        assert!(!foreign.is_removed());
        assert_eq!(deque.to_vec(), vec![2]);
        assert_eq!(other.to_vec(), vec![1]);
    }

    #[test]
    fn test_next_and_prev_walk_live_nodes() {
        let deque = LockFreeDeque::new();
        let nodes: Vec<_> = (0..6).map(|i| deque.push_right(i)).collect();

        deque.remove(nodes[1]);
        deque.remove(nodes[4]);

        let mut forward = vec![];
        let mut cursor = deque.front();
        while let Some(node) = cursor {
            forward.push(*node);
            cursor = deque.next(node);
        }
        assert_eq!(forward, vec![0, 2, 3, 5]);

        let mut backward = vec![];
        let mut cursor = deque.back();
        while let Some(node) = cursor {
            backward.push(*node);
            cursor = deque.prev(node);
        }
        assert_eq!(backward, vec![5, 3, 2, 0]);
    }

    #[test]
    fn test_next_from_removed_node_skips_forward() {
        let deque = LockFreeDeque::new();
        let nodes: Vec<_> = (0..4).map(|i| deque.push_right(i)).collect();

        deque.remove(nodes[1]);
        deque.remove(nodes[2]);

        assert_eq!(deque.next(nodes[1]).map(|n| *n), Some(3));
        assert_eq!(deque.prev(nodes[2]).map(|n| *n), Some(0));
        assert_eq!(deque.next(nodes[0]).map(|n| *n), Some(3));
        assert_eq!(deque.prev(nodes[3]).map(|n| *n), Some(0));
        assert!(deque.next(nodes[3]).is_none());
        assert!(deque.prev(nodes[0]).is_none());
    }

    #[test]
    fn test_pop_with_borrows_value() {
        let deque = LockFreeDeque::new();
        deque.push_right(String::from("left"));
        deque.push_right(String::from("right"));

        assert_eq!(deque.pop_right_with(|s| s.len()), Some(5));
        assert_eq!(deque.pop_left_with(|s| s.to_uppercase()), Some("LEFT".to_string()));
        assert_eq!(deque.pop_left_with(|s| s.len()), None);
    }

    #[test]
    fn test_reclaim_frees_detached_nodes() {
        let mut deque = LockFreeDeque::new();
        for i in 0..10 {
            deque.push_right(i);
        }
        for _ in 0..4 {
            deque.pop_left();
        }

        let six = deque.iter().find(|node| **node == 6);
        assert!(six.is_some());
        if let Some(node) = six {
            assert_eq!(deque.remove(node), Some(6));
        }

        assert_eq!(deque.allocated_nodes(), 12);
        assert_eq!(deque.reclaim(), 5);
        assert_eq!(deque.allocated_nodes(), 7);
        assert_eq!(deque.to_vec(), vec![4, 5, 7, 8, 9]);

        let backward: Vec<_> = {
            let mut values = vec![];
            let mut cursor = deque.back();
            while let Some(node) = cursor {
                values.push(*node);
                cursor = node.prev();
            }
            values
        };
        assert_eq!(backward, vec![9, 8, 7, 5, 4]);

        // Nothing left to free.
        assert_eq!(deque.reclaim(), 0);
    }

    #[test]
    fn test_clear_drops_values() {
        let drops = Arc::new(AtomicUsize::new(0));

        struct Tracked(Arc<AtomicUsize>);
        impl Drop for Tracked {
            fn drop(&mut self) {
                self.0.fetch_add(1, Ordering::Relaxed);
            }
        }

        let mut deque = LockFreeDeque::new();
        for _ in 0..8 {
            deque.push_left(Tracked(Arc::clone(&drops)));
        }
        deque.pop_left_with(|_| ());

        deque.clear();
        assert!(deque.is_empty());
        assert_eq!(drops.load(Ordering::Relaxed), 8);
        assert_eq!(deque.allocated_nodes(), 2);

        deque.push_right(Tracked(Arc::clone(&drops)));
        drop(deque);
        assert_eq!(drops.load(Ordering::Relaxed), 9);
    }

    #[test]
    fn test_from_iter_and_extend() {
        let mut deque: LockFreeDeque<_> = (1..=3).collect();
        deque.extend([4, 5]);

        assert_eq!(deque.len(), 5);
        assert_eq!(format!("{:?}", deque), "[1, 2, 3, 4, 5]");
    }

    #[test]
    fn test_concurrent_push_both_ends() {
        let deque = Arc::new(LockFreeDeque::new());
        let num_threads = 8;
        let items_per_thread = 500;

        let handles: Vec<_> = (0..num_threads)
            .map(|thread_id| {
                let deque = Arc::clone(&deque);
                thread::spawn(move || {
                    for i in 0..items_per_thread {
                        let value = thread_id * items_per_thread + i;
                        if thread_id % 2 == 0 {
                            deque.push_left(value);
                        } else {
                            deque.push_right(value);
                        }
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        let mut values = deque.to_vec();
        assert_eq!(values.len(), num_threads * items_per_thread);
        values.sort_unstable();
        assert!(values.iter().copied().eq(0..num_threads * items_per_thread));

        // Backward traversal repairs any back link a racing push left stale.
        let mut backward = vec![];
        let mut cursor = deque.back();
        while let Some(node) = cursor {
            backward.push(*node);
            cursor = node.prev();
        }
        backward.reverse();
        assert_eq!(backward, deque.to_vec());
    }
}
