//! Internal implementation details.
//!
//! These are pub(crate) and not intended for external use.

pub mod markable_ref;
pub mod marked_ptr;

pub(crate) use markable_ref::MarkableRef;
pub(crate) use marked_ptr::MarkedPtr;
