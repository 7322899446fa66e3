//! A lock-guarded allocator that can be shared between threads.
//!
//! [`SegregatedFreeListAllocator`] keeps its free lists and pool cursor
//! without any synchronization. [`LockedAllocator`] puts the whole allocator
//! behind a single [`spin::Mutex`] and implements [`GlobalAlloc`] on top of
//! it.
//!
//! ```rust
//! use core::alloc::{GlobalAlloc, Layout};
//!
//! use pool_alloc::locked::LockedAllocator;
//!
//! static ALLOCATOR: LockedAllocator = LockedAllocator::new();
//!
//! let layout = Layout::from_size_align(32, 8).unwrap();
//! unsafe {
//!     let ptr = ALLOCATOR.alloc(layout);
//!     assert!(!ptr.is_null());
//!     ALLOCATOR.dealloc(ptr, layout);
//! }
//! ```
//!
//! The large-block path calls the wrapped heap, [`System`] by default, so the
//! wrapper can also be installed with `#[global_allocator]`. In that case no
//! logger that allocates may be installed, since the allocator logs while
//! holding its lock.

use core::{
    alloc::{GlobalAlloc, Layout},
    ptr::{self, NonNull},
};
use std::alloc::System;

use spin::{Mutex, MutexGuard};

use crate::{free_list::SegregatedFreeListAllocator, size_class::ALIGN};

/// A [`SegregatedFreeListAllocator`] guarded by a spin lock.
///
/// Every [`GlobalAlloc`] call takes the lock for the whole operation,
/// including any pool growth or OOM handler invocation.
pub struct LockedAllocator<H = System>
where
    H: GlobalAlloc,
{
    allocator: Mutex<SegregatedFreeListAllocator<H>>,
}

impl Default for LockedAllocator<System> {
    fn default() -> Self {
        Self::new()
    }
}

impl LockedAllocator<System> {
    /// Creates an empty allocator over the system heap.
    #[must_use]
    pub const fn new() -> Self {
        Self::with_heap(System)
    }
}

impl<H> LockedAllocator<H>
where
    H: GlobalAlloc,
{
    /// Creates an empty allocator whose large blocks and pool arenas come
    /// from `heap`.
    #[must_use]
    pub const fn with_heap(heap: H) -> Self {
        Self {
            allocator: Mutex::new(SegregatedFreeListAllocator::with_heap(heap)),
        }
    }

    /// Locks the allocator for direct use.
    pub fn lock(&self) -> MutexGuard<'_, SegregatedFreeListAllocator<H>> {
        self.allocator.lock()
    }
}

unsafe impl<H> GlobalAlloc for LockedAllocator<H>
where
    H: GlobalAlloc + Send,
{
    /// Returns null when `layout` needs more than [`ALIGN`]-byte alignment or
    /// memory is exhausted.
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        if layout.align() > ALIGN {
            return ptr::null_mut();
        }
        self.allocator
            .lock()
            .allocate(layout.size())
            .map_or(ptr::null_mut(), NonNull::as_ptr)
    }

    unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
        let Some(ptr) = NonNull::new(ptr) else {
            return;
        };
        unsafe { self.allocator.lock().deallocate(ptr, layout.size()) };
    }
}
