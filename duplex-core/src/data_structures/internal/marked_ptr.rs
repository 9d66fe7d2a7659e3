// Tagged pointer carrying the deletion mark in its least significant bit.
//
// Bit layout:
//   Bit 0: DELETE_MARK - the link's owner is logically deleted
//
// Nodes are at least pointer-aligned, so bit 0 of a real node address is
// always clear and the (pointer, mark) pair fits in a single word.
//
const DELETE_MARK: usize = 0b1;

/// A (pointer, mark) pair encoded as one tagged pointer.
///
/// The encoding is done with `map_addr`, so the clean pointer returned by
/// [`MarkedPtr::as_ptr`] keeps the provenance of the original allocation.
pub(crate) struct MarkedPtr<T> {
    ptr: *mut T,
}

// Manual impls to avoid requiring T: Clone/Copy
impl<T> Copy for MarkedPtr<T> {}

impl<T> Clone for MarkedPtr<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> PartialEq for MarkedPtr<T> {
    fn eq(&self, other: &Self) -> bool {
        self.ptr == other.ptr
    }
}

impl<T> Eq for MarkedPtr<T> {}

impl<T> std::fmt::Debug for MarkedPtr<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MarkedPtr")
            .field("ptr", &self.as_ptr())
            .field("marked", &self.is_marked())
            .finish()
    }
}

impl<T> MarkedPtr<T> {
    /// Wrap a raw word as read from an atomic link (mark bit included).
    #[inline]
    pub(crate) fn from_raw(ptr: *mut T) -> Self {
        MarkedPtr { ptr }
    }

    /// Encode a clean pointer together with a mark.
    #[inline]
    pub(crate) fn from_parts(ptr: *mut T, mark: bool) -> Self {
        debug_assert_eq!(ptr.addr() & DELETE_MARK, 0, "pointer is not aligned");
        MarkedPtr::from_raw(ptr).with_mark(mark)
    }

    /// The pointer without the mark bit - the one you dereference.
    #[inline]
    pub(crate) fn as_ptr(&self) -> *mut T {
        self.ptr.map_addr(|addr| addr & !DELETE_MARK)
    }

    /// The tagged word, mark bit intact (what gets stored and CAS-ed).
    #[inline]
    pub(crate) fn as_raw(&self) -> *mut T {
        self.ptr
    }

    #[inline]
    pub(crate) fn is_marked(&self) -> bool {
        self.ptr.addr() & DELETE_MARK != 0
    }

    /// Same pointer, mark set to `mark`.
    #[inline]
    pub(crate) fn with_mark(&self, mark: bool) -> Self {
        let ptr = if mark {
            self.ptr.map_addr(|addr| addr | DELETE_MARK)
        } else {
            self.as_ptr()
        };
        MarkedPtr { ptr }
    }

    /// Split into the `(mark, pointer)` pair.
    #[inline]
    pub(crate) fn decompose(&self) -> (bool, *mut T) {
        (self.is_marked(), self.as_ptr())
    }
}
