//! A two-tier memory allocator for container code.
//!
//! Requests are routed by size:
//!
//! - **Small** requests (up to [`MAX_SMALL`](size_class::MAX_SMALL) bytes)
//!   are rounded up to a multiple of [`ALIGN`](size_class::ALIGN) and served
//!   from one singly-linked free list per size class. Free blocks store their
//!   list link in their own first word. Empty lists are refilled in batches
//!   from a [`Pool`](pool::Pool), a contiguous arena that grows geometrically.
//! - **Large** requests go straight to the system heap through
//!   [`LargeBlockAllocator`](large::LargeBlockAllocator), which also owns the
//!   out-of-memory protocol: a replaceable OOM handler is invoked and the
//!   request retried, as often as [`OomRetry`](config::OomRetry) allows.
//!
//! ```text
//!  TypedAllocator<T> ── count * size_of::<T>() ──┐
//!                                                ▼
//!                          SegregatedFreeListAllocator
//!                           │ size <= 128          │ size > 128
//!                           ▼                      ▼
//!                  free list [class] ──empty──► Pool ──grow──► LargeBlockAllocator ──► system heap
//! ```
//!
//! # Usage Examples
//!
//! ## Byte allocation
//!
//! ```rust
//! use pool_alloc::free_list::SegregatedFreeListAllocator;
//!
//! let mut allocator = SegregatedFreeListAllocator::new();
//! let first = allocator.allocate(8).unwrap();
//! let second = allocator.allocate(8).unwrap();
//! // both came out of the same batch
//! assert_eq!(second.addr().get(), first.addr().get() + 8);
//!
//! unsafe {
//!     allocator.deallocate(second, 8);
//!     allocator.deallocate(first, 8);
//! }
//! ```
//!
//! ## Handling exhaustion
//!
//! ```rust
//! use pool_alloc::{budget::BudgetHeap, free_list::SegregatedFreeListAllocator};
//!
//! let heap = BudgetHeap::new(0);
//! let budget = heap.budget();
//! let mut allocator = SegregatedFreeListAllocator::with_heap(heap);
//!
//! // nothing frees memory yet: the request fails
//! assert!(allocator.allocate(1024).unwrap_err().is_out_of_memory());
//!
//! // a handler that releases memory lets the retried request through
//! allocator.set_oom_handler(Some(Box::new(move || {
//!     budget.store(1 << 16, core::sync::atomic::Ordering::SeqCst);
//! })));
//! let ptr = allocator.allocate(1024).unwrap();
//! unsafe { allocator.deallocate(ptr, 1024) };
//! ```
//!
//! # Design Considerations
//!
//! ## Memory Safety
//!
//! Deallocation is `unsafe`. Callers must ensure:
//!
//! - The size passed on deallocation falls in the same size class as the
//!   size requested (or both exceed `MAX_SMALL` and are equal)
//! - No use-after-free or double-free
//!
//! None of this is checked; violations corrupt the free lists.
//!
//! ## Thread Safety
//!
//! [`SegregatedFreeListAllocator`](free_list::SegregatedFreeListAllocator)
//! is `Send` but not `Sync`. [`LockedAllocator`](locked::LockedAllocator)
//! wraps one behind a spin lock for shared use.
//!
//! ## Alignment
//!
//! Every block is aligned to exactly 8 bytes. Typed requests for types with
//! stricter alignment are rejected.

#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

pub mod budget;
pub mod config;
pub mod error;
pub mod facade;
pub mod free_list;
pub mod large;
pub mod locked;
pub mod pool;
pub mod size_class;

pub use self::{
    config::{Config, OomRetry},
    error::AllocError,
    facade::TypedAllocator,
    free_list::SegregatedFreeListAllocator,
    large::{LargeBlockAllocator, OomHandler},
    locked::LockedAllocator,
};
