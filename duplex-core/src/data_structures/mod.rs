//! Data structures for concurrent collections.
//!
//! # Organization
//!
//! - [`deque`] - Lock-free doubly linked deque
//! - [`internal`] - Internal implementation details (pub(crate))

pub mod deque;
pub(crate) mod internal;

pub use deque::{ContentionPolicy, DequeOptions, Iter, LockFreeDeque, NodeRef};

// MarkableRef never leaves the crate: node links are only
// reachable through the deque API.
pub(crate) use internal::MarkableRef;
