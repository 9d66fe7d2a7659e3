use std::sync::atomic::{AtomicPtr, Ordering};

use super::MarkedPtr;

/// An atomically updatable `(reference, mark)` pair.
///
/// The pair lives in a single `AtomicPtr` word (see [`MarkedPtr`]), so a load
/// always observes the reference and the mark that were written together.
///
/// All accesses are `SeqCst`: the deque's helping protocol reads links of
/// different nodes and needs one total order over every link update.
pub(crate) struct MarkableRef<N> {
    link: AtomicPtr<N>,
}

impl<N> MarkableRef<N> {
    pub(crate) fn new(reference: *mut N, mark: bool) -> Self {
        MarkableRef {
            link: AtomicPtr::new(MarkedPtr::from_parts(reference, mark).as_raw()),
        }
    }

    #[inline]
    fn load(&self) -> MarkedPtr<N> {
        MarkedPtr::from_raw(self.link.load(Ordering::SeqCst))
    }

    /// Atomic read of the whole pair, returned as `(mark, reference)`.
    #[inline]
    pub(crate) fn get(&self) -> (bool, *mut N) {
        self.load().decompose()
    }

    #[inline]
    pub(crate) fn reference(&self) -> *mut N {
        self.load().as_ptr()
    }

    #[inline]
    pub(crate) fn is_marked(&self) -> bool {
        self.load().is_marked()
    }

    /// Replace `(expected_ref, expected_mark)` with `(new_ref, new_mark)`.
    ///
    /// A request whose new pair equals the current pair is accepted without
    /// touching the cache line. On failure nothing is written.
    #[inline]
    pub(crate) fn compare_and_set(
        &self,
        expected_ref: *mut N,
        new_ref: *mut N,
        expected_mark: bool,
        new_mark: bool,
    ) -> bool {
        let current = self.load();
        if current != MarkedPtr::from_parts(expected_ref, expected_mark) {
            return false;
        }

        let new = MarkedPtr::from_parts(new_ref, new_mark);
        if new == current {
            return true;
        }

        self.link
            .compare_exchange(
                current.as_raw(),
                new.as_raw(),
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_ok()
    }

    /// Set the mark to `new_mark` provided the reference is still `expected_ref`.
    #[inline]
    pub(crate) fn try_mark(&self, expected_ref: *mut N, new_mark: bool) -> bool {
        let current = self.load();
        if current.as_ptr() != expected_ref {
            return false;
        }
        if current.is_marked() == new_mark {
            return true;
        }

        self.link
            .compare_exchange(
                current.as_raw(),
                current.with_mark(new_mark).as_raw(),
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_ok()
    }

    /// Mark the link, whatever it currently points at.
    ///
    /// Returns once the mark has been observed set, by us or by a helper.
    pub(crate) fn set_mark(&self) {
        loop {
            let (marked, reference) = self.get();
            if marked || self.try_mark(reference, true) {
                return;
            }
        }
    }

    /// Unconditional store.
    ///
    /// Only valid while the owning node is unpublished or the caller has
    /// exclusive access to the structure.
    #[inline]
    pub(crate) fn store(&self, reference: *mut N, mark: bool) {
        self.link.store(
            MarkedPtr::from_parts(reference, mark).as_raw(),
            Ordering::SeqCst,
        );
    }
}

impl<N> std::fmt::Debug for MarkableRef<N> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let (marked, reference) = self.get();
        f.debug_struct("MarkableRef")
            .field("reference", &reference)
            .field("marked", &marked)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ptr;
    use std::sync::Arc;
    use std::sync::atomic::AtomicUsize;
    use std::thread;

    fn boxed(value: u64) -> *mut u64 {
        Box::into_raw(Box::new(value))
    }

    fn free(ptr: *mut u64) {
        drop(unsafe { Box::from_raw(ptr) });
    }

    #[test]
    fn test_get_returns_initial_pair() {
        let a = boxed(1);
        let link = MarkableRef::new(a, false);

        assert_eq!(link.get(), (false, a));
        assert_eq!(link.reference(), a);
        assert!(!link.is_marked());

        free(a);
    }

    #[test]
    fn test_compare_and_set_requires_full_pair() {
        let a = boxed(1);
        let b = boxed(2);
        let link = MarkableRef::new(a, false);

        // Right reference, wrong mark.
        assert!(!link.compare_and_set(a, b, true, false));
        assert_eq!(link.get(), (false, a));

        // Wrong reference, right mark.
        assert!(!link.compare_and_set(b, b, false, false));
        assert_eq!(link.get(), (false, a));

        assert!(link.compare_and_set(a, b, false, true));
        assert_eq!(link.get(), (true, b));

        free(a);
        free(b);
    }

    #[test]
    fn test_compare_and_set_accepts_identity_swap() {
        let a = boxed(1);
        let link = MarkableRef::new(a, true);

        assert!(link.compare_and_set(a, a, true, true));
        assert!(!link.compare_and_set(a, a, false, false));
        assert_eq!(link.get(), (true, a));

        free(a);
    }

    #[test]
    fn test_try_mark() {
        let a = boxed(1);
        let b = boxed(2);
        let link = MarkableRef::new(a, false);

        assert!(!link.try_mark(b, true));
        assert!(!link.is_marked());

        assert!(link.try_mark(a, true));
        assert_eq!(link.get(), (true, a));

        // Already in the requested state.
        assert!(link.try_mark(a, true));

        assert!(link.try_mark(a, false));
        assert_eq!(link.get(), (false, a));

        free(a);
        free(b);
    }

    #[test]
    fn test_null_reference() {
        let link = MarkableRef::<u64>::new(ptr::null_mut(), false);
        assert_eq!(link.get(), (false, ptr::null_mut()));

        link.set_mark();
        assert_eq!(link.get(), (true, ptr::null_mut()));
    }

    #[test]
    fn test_concurrent_mark_has_single_winner() {
        for _ in 0..100 {
            let a = boxed(1);
            let link = Arc::new(MarkableRef::new(a, false));
            let winners = Arc::new(AtomicUsize::new(0));

            let handles: Vec<_> = (0..8)
                .map(|_| {
                    let link = Arc::clone(&link);
                    let winners = Arc::clone(&winners);
                    let a = a as usize;
                    thread::spawn(move || {
                        let a = a as *mut u64;
                        if link.compare_and_set(a, a, false, true) {
                            winners.fetch_add(1, Ordering::Relaxed);
                        }
                    })
                })
                .collect();

            for handle in handles {
                handle.join().unwrap();
            }

            // Losers either saw the mark already set or lost the hardware CAS.
            assert_eq!(winners.load(Ordering::Relaxed), 1);
            assert_eq!(link.get(), (true, a));

            free(a);
        }
    }
}
