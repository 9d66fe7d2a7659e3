use crossbeam::utils::Backoff;

/// What a thread does after losing a CAS race in an outer retry loop.
///
/// This is a scheduling courtesy only; it never changes what an operation
/// returns.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ContentionPolicy {
    /// Retry immediately after a `spin_loop` hint.
    Spin,
    /// Exponential backoff, escalating from spinning to yielding the thread.
    #[default]
    Backoff,
}

/// Construction options for [`LockFreeDeque`](super::LockFreeDeque).
///
/// ```rust
/// use duplex_core::data_structures::{ContentionPolicy, DequeOptions, LockFreeDeque};
///
/// let deque: LockFreeDeque<u32> =
///     LockFreeDeque::with_options(DequeOptions::new().with_contention(ContentionPolicy::Spin));
/// assert_eq!(deque.options().contention(), ContentionPolicy::Spin);
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DequeOptions {
    contention: ContentionPolicy,
}

impl DequeOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_contention(mut self, contention: ContentionPolicy) -> Self {
        self.contention = contention;
        self
    }

    pub fn contention(&self) -> ContentionPolicy {
        self.contention
    }

    pub(super) fn contention_backoff(&self) -> ContentionBackoff {
        ContentionBackoff {
            policy: self.contention,
            backoff: Backoff::new(),
        }
    }
}

/// Per-operation retry state derived from [`ContentionPolicy`].
pub(super) struct ContentionBackoff {
    policy: ContentionPolicy,
    backoff: Backoff,
}

impl ContentionBackoff {
    /// Called after a failed CAS, before the operation re-reads the structure.
    #[inline]
    pub(super) fn retry(&self) {
        match self.policy {
            ContentionPolicy::Spin => std::hint::spin_loop(),
            ContentionPolicy::Backoff => self.backoff.snooze(),
        }
    }
}
