//! A system heap with a hard byte budget.
//!
//! [`BudgetHeap`] wraps another [`GlobalAlloc`] and refuses any request that
//! would take the live byte count past its budget. The budget is shared
//! through an [`Arc<AtomicUsize>`], so code outside the allocator (an OOM
//! handler, for example) can release or withdraw capacity at any time.

use core::{
    alloc::{GlobalAlloc, Layout},
    ptr,
    sync::atomic::{AtomicUsize, Ordering},
};
use std::{alloc::System, sync::Arc};

/// A [`GlobalAlloc`] that fails once its byte budget is spent.
///
/// # Examples
///
/// ```
/// use core::alloc::{GlobalAlloc, Layout};
///
/// use pool_alloc::budget::BudgetHeap;
///
/// let heap = BudgetHeap::new(64);
/// let layout = Layout::from_size_align(48, 8).unwrap();
/// unsafe {
///     let ptr = heap.alloc(layout);
///     assert!(!ptr.is_null());
///     assert_eq!(heap.available(), 16);
///     assert!(heap.alloc(layout).is_null());
///     heap.dealloc(ptr, layout);
/// }
/// assert_eq!(heap.available(), 64);
/// ```
#[derive(Debug)]
pub struct BudgetHeap<H = System> {
    inner: H,
    available: Arc<AtomicUsize>,
}

impl BudgetHeap<System> {
    /// Creates a heap over the system allocator with `available` bytes of
    /// budget.
    #[must_use]
    pub fn new(available: usize) -> Self {
        Self::with_inner(System, available)
    }
}

impl<H> BudgetHeap<H> {
    /// Creates a heap over `inner` with `available` bytes of budget.
    #[must_use]
    pub fn with_inner(inner: H, available: usize) -> Self {
        Self {
            inner,
            available: Arc::new(AtomicUsize::new(available)),
        }
    }

    /// Returns a handle to the remaining budget.
    ///
    /// Storing into it changes how many more bytes the heap will hand out.
    #[must_use]
    pub fn budget(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.available)
    }

    /// Bytes that can still be allocated.
    #[must_use]
    pub fn available(&self) -> usize {
        self.available.load(Ordering::SeqCst)
    }

    fn reserve(&self, size: usize) -> bool {
        self.available
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |avail| {
                avail.checked_sub(size)
            })
            .is_ok()
    }

    fn release(&self, size: usize) {
        self.available.fetch_add(size, Ordering::SeqCst);
    }
}

unsafe impl<H> GlobalAlloc for BudgetHeap<H>
where
    H: GlobalAlloc,
{
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        if !self.reserve(layout.size()) {
            return ptr::null_mut();
        }
        let ptr = unsafe { self.inner.alloc(layout) };
        if ptr.is_null() {
            self.release(layout.size());
        }
        ptr
    }

    unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
        unsafe { self.inner.dealloc(ptr, layout) };
        self.release(layout.size());
    }

    unsafe fn realloc(&self, ptr: *mut u8, layout: Layout, new_size: usize) -> *mut u8 {
        let old_size = layout.size();
        let growth = new_size.saturating_sub(old_size);
        if !self.reserve(growth) {
            return ptr::null_mut();
        }
        let new_ptr = unsafe { self.inner.realloc(ptr, layout, new_size) };
        if new_ptr.is_null() {
            self.release(growth);
        } else {
            self.release(old_size.saturating_sub(new_size));
        }
        new_ptr
    }
}
