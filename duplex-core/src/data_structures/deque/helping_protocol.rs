//! # Helping protocol of the lock-free deque
//!
//! Pop and remove commit by marking a node's `next` link. The remaining
//! cleanup is done by whichever thread reaches the node first:
//!
//! ```text
//! Initial: P ⇄ X ⇄ N
//!
//! Step 1 (commit):  CAS X.next: N → N|MARK
//! Step 2:           mark X.prev            (X.prev: P → P|MARK)
//! Step 3 (unlink):  CAS P.next: X → N
//! Step 4 (repair):  CAS N.prev: X → P
//! ```
//!
//! Steps 2-4 are idempotent and can be run by any thread, in any number of
//! copies. Losing one of those CASes only means someone else already did it.
//!
//! ## Walking over deleted runs
//!
//! The repair routines keep a cursor `prev` and the last live node `last`
//! seen before it:
//!
//! ```text
//! walk(prev, node):
//!     loop:
//!         if prev.next is marked:            // prev itself is deleted
//!             if last is known:
//!                 mark prev.prev
//!                 CAS last.next: prev → prev.next   // splice it out
//!                 prev = last; last = none
//!             else:
//!                 prev = prev.prev            // back off through the backlink
//!             continue
//!         if prev.next != node:               // not adjacent yet
//!             last = prev; prev = prev.next
//!             continue
//!         // prev is live and adjacent: try to install node.prev = prev
//! ```
//!
//! A deleted node's `prev` was marked before it could be spliced, and `prev`
//! links always point backwards. So stepping back from a deleted node never
//! skips past a live predecessor, and stepping forward from a live node
//! reaches `node` unless `node` was itself deleted.
//!
//! ## Why back links may be stale
//!
//! Push only makes a best-effort attempt (`push_common`) to point the
//! successor's `prev` at the new node. Readers that depend on `prev`
//! validate it against the predecessor's `next` and call `correct_prev` when
//! the two disagree.

use super::lock_free_deque::{LockFreeDeque, NodePtr};
use std::ptr;

impl<T> LockFreeDeque<T> {
    /// After `node` was linked in front of `next`, point `next.prev` at it.
    ///
    /// Gives up as soon as `node` is no longer directly before `next` or
    /// `next` is being deleted; later readers repair the link.
    pub(super) fn push_common(&self, node: NodePtr<T>, next: NodePtr<T>) {
        loop {
            let (next_prev_marked, next_prev) = self.node(next).prev.get();
            if next_prev_marked
                || !self.node(node).next.compare_and_set(next, next, false, false)
            {
                break;
            }

            if self
                .node(next)
                .prev
                .compare_and_set(next_prev, node, false, false)
            {
                if self.node(node).prev.is_marked() {
                    // `node` was deleted while we were linking it; give `next`
                    // a live predecessor instead.
                    self.help_insert(node, next);
                }
                break;
            }
        }
    }

    /// Set `node.prev` to its live predecessor, starting the search at `prev`.
    ///
    /// Returns the predecessor that was found, which callers use as the new
    /// insertion point.
    pub(super) fn help_insert(&self, mut prev: NodePtr<T>, node: NodePtr<T>) -> NodePtr<T> {
        let mut last: NodePtr<T> = ptr::null_mut();

        loop {
            let (prev_removed, prev_next) = self.node(prev).next.get();
            if prev_removed {
                if !last.is_null() {
                    self.node(prev).prev.set_mark();
                    let successor = self.node(prev).next.reference();
                    self.node(last)
                        .next
                        .compare_and_set(prev, successor, false, false);
                    prev = last;
                    last = ptr::null_mut();
                } else {
                    prev = self.node(prev).prev.reference();
                }
                continue;
            }

            let (node_removed, node_prev) = self.node(node).prev.get();
            if node_removed {
                break;
            }

            if prev_next != node {
                if prev_next.is_null() {
                    // Walked off TAIL: restart from the left end.
                    prev = self.head;
                    last = ptr::null_mut();
                    continue;
                }
                last = prev;
                prev = prev_next;
                continue;
            }

            if node_prev == prev {
                break;
            }

            if self.node(prev).next.reference() == node
                && self
                    .node(node)
                    .prev
                    .compare_and_set(node_prev, prev, false, false)
            {
                if self.node(prev).prev.is_marked() {
                    continue;
                }
                break;
            }
        }

        prev
    }

    /// Steps 2 and 3 for a node whose `next` is already marked.
    pub(super) fn help_delete(&self, node: NodePtr<T>) {
        self.node(node).prev.set_mark();

        let mut prev = self.node(node).prev.reference();
        let mut next = self.node(node).next.reference();
        let mut last: NodePtr<T> = ptr::null_mut();

        loop {
            if prev == next {
                break;
            }

            if self.node(next).next.is_marked() {
                // Successor is being deleted too; unlink past it.
                self.node(next).prev.set_mark();
                next = self.node(next).next.reference();
                continue;
            }

            let (prev_removed, prev_next) = self.node(prev).next.get();
            if prev_removed {
                if !last.is_null() {
                    self.node(prev).prev.set_mark();
                    let successor = self.node(prev).next.reference();
                    self.node(last)
                        .next
                        .compare_and_set(prev, successor, false, false);
                    prev = last;
                    last = ptr::null_mut();
                } else {
                    prev = self.node(prev).prev.reference();
                }
                continue;
            }

            if prev_next != node {
                if prev_next.is_null() {
                    // Reached TAIL without meeting `node`: already unlinked.
                    break;
                }
                last = prev;
                prev = prev_next;
                continue;
            }

            if self
                .node(prev)
                .next
                .compare_and_set(node, next, false, false)
            {
                break;
            }
        }
    }

    /// Re-derive the live predecessor of `node` after a removal.
    ///
    /// Unlike `help_insert` this does not stop early when `node.prev` already
    /// equals the candidate: it keeps going until the installed predecessor is
    /// confirmed live, or `node` itself gets deleted.
    pub(super) fn correct_prev(&self, mut prev: NodePtr<T>, node: NodePtr<T>) -> NodePtr<T> {
        let mut last: NodePtr<T> = ptr::null_mut();

        loop {
            let (node_removed, node_prev) = self.node(node).prev.get();
            if node_removed {
                break;
            }

            let (prev_removed, prev_next) = self.node(prev).next.get();
            if prev_removed {
                if !last.is_null() {
                    self.node(prev).prev.set_mark();
                    self.node(last)
                        .next
                        .compare_and_set(prev, prev_next, false, false);
                    prev = last;
                    last = ptr::null_mut();
                } else {
                    prev = self.node(prev).prev.reference();
                }
                continue;
            }

            if prev_next != node {
                if prev_next.is_null() {
                    prev = self.head;
                    last = ptr::null_mut();
                    continue;
                }
                last = prev;
                prev = prev_next;
                continue;
            }

            if self
                .node(node)
                .prev
                .compare_and_set(node_prev, prev, false, false)
            {
                if self.node(prev).prev.is_marked() {
                    continue;
                }
                break;
            }
        }

        prev
    }

    /// Live successor of `node`, splicing out deleted successors on the way.
    ///
    /// Returns `None` when the walk reaches TAIL.
    pub(super) fn next_node(&self, mut node: NodePtr<T>) -> Option<NodePtr<T>> {
        while node != self.tail {
            let next = self.node(node).next.reference();
            if next.is_null() {
                break;
            }

            let (next_removed, next_next) = self.node(next).next.get();
            if next_removed {
                let (node_removed, node_next) = self.node(node).next.get();
                if !node_removed || node_next != next {
                    self.node(next).prev.set_mark();
                    self.node(node)
                        .next
                        .compare_and_set(next, next_next, false, false);
                    continue;
                }
            }

            node = next;

            if !next_removed {
                return (next != self.tail).then_some(next);
            }
        }

        None
    }

    /// Live predecessor of `node`, repairing its back link when stale.
    ///
    /// For a removed `node` this is the predecessor of its first live
    /// successor, so a removed node with no live successor yields the back
    /// node. Returns `None` when the walk reaches HEAD.
    pub(super) fn prev_node(&self, mut node: NodePtr<T>) -> Option<NodePtr<T>> {
        while node != self.head {
            let prev = self.node(node).prev.reference();
            if prev.is_null() {
                break;
            }

            let node_removed = self.node(node).next.is_marked();
            if !node_removed && self.node(prev).next.get() == (false, node) {
                return (prev != self.head).then_some(prev);
            }

            if node_removed {
                // Continue from the live node that replaced `node`, or from
                // TAIL when nothing live follows it: the answer is then the
                // current back node.
                node = self.next_node(node).unwrap_or(self.tail);
            } else {
                self.correct_prev(prev, node);
            }
        }

        None
    }
}
