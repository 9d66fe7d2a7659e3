//! Lock-free double-ended queue.
//!
//! [`LockFreeDeque`] supports push and pop at both ends, removal of an
//! arbitrary node through the [`NodeRef`] handle returned by push, and
//! traversal in both directions. Deleted nodes stay allocated until the deque
//! is borrowed mutably (see [`LockFreeDeque::reclaim`]) or dropped.

mod helping_protocol;
pub mod iter;
pub mod lock_free_deque;
pub mod node_ref;
pub mod options;

pub use iter::Iter;
pub use lock_free_deque::LockFreeDeque;
pub use node_ref::NodeRef;
pub use options::{ContentionPolicy, DequeOptions};
