//! Reusable test bodies, shared by the unit tests and the integration tests
//! under `tests/`.


use crate::data_structures::{DequeOptions, LockFreeDeque};

/// Type-level selection of how a deque under test is configured.
pub trait DequeUnderTest {
    fn options() -> DequeOptions;

    fn create<T>() -> LockFreeDeque<T> {
        LockFreeDeque::with_options(Self::options())
    }
}
