use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Condvar, Mutex};

/// Latch that opens once it has been signalled `count` times.
///
/// Workers that only need to poll (a consumer draining a queue until every
/// producer has finished) use [`is_set`](Self::is_set), which never blocks.
/// Coordinating threads block in [`wait`](Self::wait).
pub struct CountdownEvent {
    remaining: AtomicUsize,
    lock: Mutex<()>,
    condvar: Condvar,
}

impl CountdownEvent {
    pub fn new(count: usize) -> Self {
        CountdownEvent {
            remaining: AtomicUsize::new(count),
            lock: Mutex::new(()),
            condvar: Condvar::new(),
        }
    }

    // Decrement the count. Returns true for the signal that opened the latch.
    //
    pub fn signal(&self) -> bool {
        let previous = self
            .remaining
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));

        match previous {
            Ok(1) => {
                // Taking the lock orders the wakeup after any waiter's check.
                let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
                self.condvar.notify_all();
                true
            }
            _ => false,
        }
    }

    pub fn is_set(&self) -> bool {
        self.remaining.load(Ordering::Acquire) == 0
    }

    pub fn remaining(&self) -> usize {
        self.remaining.load(Ordering::Acquire)
    }

    // Block until the count reaches zero.
    //
    pub fn wait(&self) {
        let mut guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        while !self.is_set() {
            guard = self
                .condvar
                .wait(guard)
                .unwrap_or_else(|e| e.into_inner());
        }
    }
}
