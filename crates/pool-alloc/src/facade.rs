//! Typed allocation interface for container code.
//!
//! [`TypedAllocator`] turns element counts into byte sizes and forwards them
//! to a [`SegregatedFreeListAllocator`], which picks the small or large path.
//! [`construct`] and [`destroy`] manage object lifetimes in storage obtained
//! this way.
//!
//! ```rust
//! use pool_alloc::{
//!     facade::{TypedAllocator, construct, destroy},
//!     free_list::SegregatedFreeListAllocator,
//! };
//!
//! let mut pool = SegregatedFreeListAllocator::new();
//! let mut strings = TypedAllocator::<String>::new(&mut pool);
//!
//! let storage = strings.allocate(4).unwrap().unwrap();
//! unsafe {
//!     construct(storage, String::from("hello"));
//!     assert_eq!(storage.as_ref(), "hello");
//!     destroy(storage);
//!     strings.deallocate(Some(storage), 4);
//! }
//!
//! assert!(strings.allocate(0).unwrap().is_none());
//! ```

use core::{alloc::GlobalAlloc, marker::PhantomData, ptr::NonNull};
use std::alloc::System;

use crate::{
    error::{AllocError, CapacityOverflowSnafu, UnsupportedAlignmentSnafu},
    free_list::SegregatedFreeListAllocator,
    size_class::ALIGN,
};

/// Allocates storage for values of type `T`.
pub struct TypedAllocator<'a, T, H = System>
where
    H: GlobalAlloc,
{
    inner: &'a mut SegregatedFreeListAllocator<H>,
    _marker: PhantomData<fn() -> T>,
}

impl<'a, T, H> TypedAllocator<'a, T, H>
where
    H: GlobalAlloc,
{
    /// Creates a typed view over `inner`.
    ///
    /// Several typed allocators can be created over the same byte allocator
    /// in turn; blocks of equal byte size are shared between them.
    pub fn new(inner: &'a mut SegregatedFreeListAllocator<H>) -> Self {
        Self {
            inner,
            _marker: PhantomData,
        }
    }

    /// The byte allocator underneath.
    pub fn inner(&mut self) -> &mut SegregatedFreeListAllocator<H> {
        self.inner
    }

    fn byte_size(count: usize) -> Result<usize, AllocError> {
        let align = align_of::<T>();
        if align > ALIGN {
            return UnsupportedAlignmentSnafu { align }.fail();
        }
        let elem_size = size_of::<T>();
        let Some(size) = count.checked_mul(elem_size) else {
            return CapacityOverflowSnafu { count, elem_size }.fail();
        };
        Ok(size)
    }

    /// Allocates uninitialized storage for `count` values.
    ///
    /// Returns `None` for `count == 0` without touching the allocator.
    /// Zero-sized types get a dangling, well-aligned pointer.
    pub fn allocate(&mut self, count: usize) -> Result<Option<NonNull<T>>, AllocError> {
        if count == 0 {
            return Ok(None);
        }
        let size = Self::byte_size(count)?;
        if size == 0 {
            return Ok(Some(NonNull::dangling()));
        }
        let ptr = self.inner.allocate(size)?;
        Ok(Some(ptr.cast()))
    }

    /// Releases storage obtained from [`allocate`](Self::allocate).
    ///
    /// Does nothing when `ptr` is `None` or `count == 0`. Values still living
    /// in the storage are not dropped.
    ///
    /// # Safety
    ///
    /// `ptr` must have been returned by [`allocate`](Self::allocate) on an
    /// allocator sharing the same byte allocator, for the same `count`, and
    /// not released since.
    pub unsafe fn deallocate(&mut self, ptr: Option<NonNull<T>>, count: usize) {
        let Some(ptr) = ptr else {
            return;
        };
        if count == 0 || size_of::<T>() == 0 {
            return;
        }
        let size = size_of::<T>() * count;
        unsafe { self.inner.deallocate(ptr.cast(), size) };
    }
}

/// Moves `value` into the uninitialized storage at `ptr`.
///
/// # Safety
///
/// `ptr` must be valid for writes and properly aligned. Any value already
/// there is overwritten without being dropped.
pub unsafe fn construct<T>(ptr: NonNull<T>, value: T) {
    unsafe { ptr.write(value) };
}

/// Runs the destructor of the value at `ptr`, leaving the storage
/// uninitialized.
///
/// # Safety
///
/// `ptr` must point to a live, properly aligned value that is not used
/// afterwards.
pub unsafe fn destroy<T>(ptr: NonNull<T>) {
    unsafe { ptr.drop_in_place() };
}
