//! Deferred reclamation for lock-free linked structures with back links.
//!
//! Every node is registered here when it is allocated. Nothing is freed while
//! the owning structure is shared: helpers may still dereference deleted nodes
//! through stale `prev` links long after the forward chain dropped them.
//! Memory is returned only under exclusive access, either by
//! [`DeferredReclamation::retain`] or on drop.

use std::cell::Cell;
use std::collections::HashSet;
use std::ptr;
use std::sync::atomic::{AtomicPtr, AtomicUsize, Ordering};

use crossbeam::utils::CachePadded;

// Registry shards. A thread keeps pushing onto the same shard, so threads
// working at opposite ends of a structure do not share a cache line.
//
const SHARD_COUNT: usize = 16;

static NEXT_SHARD: AtomicUsize = AtomicUsize::new(0);

// Registry shard of the current thread, assigned round-robin on first use.
//
thread_local! {
    static THREAD_SHARD: Cell<usize> = const { Cell::new(usize::MAX) };
}

fn thread_shard() -> usize {
    THREAD_SHARD.with(|shard| {
        if shard.get() == usize::MAX {
            shard.set(NEXT_SHARD.fetch_add(1, Ordering::Relaxed) % SHARD_COUNT);
        }
        shard.get()
    })
}

/// A node type that can be threaded onto the allocation registry.
///
/// # Safety
///
/// `allocation_link` must return the same field for the lifetime of the node,
/// and that field must not be used for anything else.
pub unsafe trait TrackedNode: Sized {
    fn allocation_link(&self) -> &AtomicPtr<Self>;
}

struct Shard<N> {
    allocations: AtomicPtr<N>,
    tracked: AtomicUsize,
}

impl<N: TrackedNode> Shard<N> {
    fn new() -> Self {
        Shard {
            allocations: AtomicPtr::new(ptr::null_mut()),
            tracked: AtomicUsize::new(0),
        }
    }

    fn push(&self, node: *mut N) {
        let link = unsafe { (*node).allocation_link() };
        let mut head = self.allocations.load(Ordering::Acquire);

        loop {
            link.store(head, Ordering::Relaxed);
            match self.allocations.compare_exchange_weak(
                head,
                node,
                Ordering::Release,
                Ordering::Acquire,
            ) {
                Ok(_) => break,
                Err(actual) => head = actual,
            }
        }

        self.tracked.fetch_add(1, Ordering::Relaxed);
    }
}

/// Lock-free registry of every live allocation of a structure.
///
/// The registry is a set of intrusive Treiber stacks, one per shard:
/// registering a node costs one CAS loop on the calling thread's shard and no
/// extra allocation.
///
/// Nothing is given back while the registry is shared. A structure that is
/// only ever used through `&self` (behind an `Arc`, say) keeps every node it
/// ever allocated until it gets exclusive access again.
pub struct DeferredReclamation<N: TrackedNode> {
    shards: Box<[CachePadded<Shard<N>>]>,
}

impl<N: TrackedNode> DeferredReclamation<N> {
    pub fn new() -> Self {
        DeferredReclamation {
            shards: (0..SHARD_COUNT)
                .map(|_| CachePadded::new(Shard::new()))
                .collect(),
        }
    }

    /// Take ownership of a node allocated with `Box::into_raw`.
    ///
    /// # Safety
    ///
    /// - `node` must come from `Box::into_raw` and be tracked at most once.
    /// - `node` must not be freed by anyone else.
    pub unsafe fn track(&self, node: *mut N) {
        self.shards[thread_shard()].push(node);
    }

    /// Number of nodes currently owned by the registry.
    pub fn tracked(&self) -> usize {
        self.shards
            .iter()
            .map(|shard| shard.tracked.load(Ordering::Relaxed))
            .sum()
    }

    /// Free every tracked node that is not in `live`.
    ///
    /// Returns the number of nodes freed.
    ///
    /// # Safety
    ///
    /// No pointer to a node outside `live` may be dereferenced afterwards.
    /// Exclusive access (`&mut self`) guarantees no concurrent registration.
    pub unsafe fn retain(&mut self, live: &HashSet<*mut N>) -> usize {
        let mut freed = 0;

        for shard in self.shards.iter_mut() {
            let mut curr = *shard.allocations.get_mut();
            let mut kept: *mut N = ptr::null_mut();
            let mut shard_freed = 0;

            while !curr.is_null() {
                let next = unsafe { (*curr).allocation_link().load(Ordering::Relaxed) };

                if live.contains(&curr) {
                    unsafe { (*curr).allocation_link().store(kept, Ordering::Relaxed) };
                    kept = curr;
                } else {
                    drop(unsafe { Box::from_raw(curr) });
                    shard_freed += 1;
                }

                curr = next;
            }

            *shard.allocations.get_mut() = kept;
            *shard.tracked.get_mut() -= shard_freed;
            freed += shard_freed;
        }

        freed
    }
}

impl<N: TrackedNode> Default for DeferredReclamation<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<N: TrackedNode> Drop for DeferredReclamation<N> {
    fn drop(&mut self) {
        for shard in self.shards.iter_mut() {
            let mut curr = *shard.allocations.get_mut();

            while !curr.is_null() {
                unsafe {
                    let next = (*curr).allocation_link().load(Ordering::Relaxed);
                    drop(Box::from_raw(curr));
                    curr = next;
                }
            }

            *shard.allocations.get_mut() = ptr::null_mut();
            *shard.tracked.get_mut() = 0;
        }
    }
}

// Safety: the registry only hands nodes back to `Box::from_raw` under
// exclusive access; sharing it is as safe as sharing the nodes themselves.
unsafe impl<N: TrackedNode + Send> Send for DeferredReclamation<N> {}
unsafe impl<N: TrackedNode + Send> Sync for DeferredReclamation<N> {}
