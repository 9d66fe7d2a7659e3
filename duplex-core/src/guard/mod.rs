//! Memory reclamation for the lock-free structures in this crate.
//!
//! # Design
//!
//! A doubly linked lock-free structure repairs its back links lazily, so a
//! node that has left the forward chain can still be reached through the
//! `prev` link of a live or deleted neighbour:
//!
//! ```text
//!   A ──next──► C            (B unlinked from the forward chain)
//!   A ◄──prev── B ◄──prev── C (C.prev still names B until repaired)
//! ```
//!
//! Retiring `B` at unlink time, as epoch-based schemes do, would let a thread
//! that pins later follow `C.prev` into freed memory. Instead every allocation
//! is registered with [`DeferredReclamation`] and memory is only given back
//! when the owning structure is borrowed exclusively:
//!
//! ```text
//! LockFreeDeque<T>
//!     │
//!     ├── &self operations   (never free)
//!     └── &mut self reclaim  (repair links, free detached nodes)
//! ```
//!
//! # Limits
//!
//! Memory held by a shared structure grows with the number of pushes since
//! the last exclusive borrow, not with the number of live values. Long-lived
//! owners of an `Arc`'d structure are expected to take exclusive access now
//! and then (`Arc::get_mut` once workers are parked, or a rebuild) and call
//! `reclaim`.

mod deferred_reclamation;

pub use deferred_reclamation::{DeferredReclamation, TrackedNode};
