//! Segregated free-list allocator.
//!
//! Requests of up to [`MAX_SMALL`] bytes are rounded up to a multiple of
//! [`ALIGN`] and served from the free list of their size class. An empty list
//! is refilled with a batch of [`REFILL_BATCH`] blocks carved from the
//! [`Pool`]; larger requests bypass the lists entirely and go to the
//! [`LargeBlockAllocator`].
//!
//! # Usage Example
//!
//! ```rust
//! use pool_alloc::free_list::SegregatedFreeListAllocator;
//!
//! let mut allocator = SegregatedFreeListAllocator::new();
//!
//! let small = allocator.allocate(24).unwrap();
//! let large = allocator.allocate(4096).unwrap();
//! unsafe {
//!     small.write_bytes(0xaa, 24);
//!     large.write_bytes(0xbb, 4096);
//!
//!     allocator.deallocate(small, 24);
//!     allocator.deallocate(large, 4096);
//! }
//!
//! // the freed block is the first one handed out again
//! assert_eq!(allocator.allocate(24).unwrap(), small);
//! ```
//!
//! # Thread Safety
//!
//! The allocator is `Send` but not `Sync`. Concurrent use needs external
//! synchronization, such as [`LockedAllocator`](crate::locked::LockedAllocator).

use core::{alloc::GlobalAlloc, fmt, ptr::NonNull};
use std::alloc::System;

use log::trace;

use crate::{
    config::Config,
    error::AllocError,
    large::{LargeBlockAllocator, OomHandler},
    pool::Pool,
    size_class::{ALIGN, FreeLists, LIST_NUMBER, MAX_SMALL, class_index, round_up},
};

/// Number of blocks requested from the pool when a free list runs dry.
pub const REFILL_BATCH: usize = 20;

/// Snapshot of allocator bookkeeping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AllocatorStats {
    /// Usable bytes ever acquired for the pool.
    pub heap_size: usize,
    /// Uncommitted bytes left in the pool.
    pub pool_remaining: usize,
    /// Arenas currently owned by the pool.
    pub arena_count: usize,
    /// Free blocks per size class.
    pub free_blocks: [usize; LIST_NUMBER],
}

impl AllocatorStats {
    /// Bytes sitting in free lists.
    #[must_use]
    pub fn free_bytes(&self) -> usize {
        self.free_blocks
            .iter()
            .enumerate()
            .map(|(index, count)| (index + 1) * ALIGN * count)
            .sum()
    }
}

/// Two-tier allocator: size-class free lists over a growable pool for small
/// requests, the system heap for everything else.
///
/// A block is owned either by its free list or by the caller, never both.
/// Freeing a block twice, or with a size of a different class, corrupts the
/// lists and is undefined behavior.
pub struct SegregatedFreeListAllocator<H = System>
where
    H: GlobalAlloc,
{
    lists: FreeLists,
    pool: Pool,
    large: LargeBlockAllocator<H>,
}

unsafe impl<H> Send for SegregatedFreeListAllocator<H> where H: GlobalAlloc + Send {}

impl Default for SegregatedFreeListAllocator<System> {
    fn default() -> Self {
        Self::new()
    }
}

impl<H> fmt::Debug for SegregatedFreeListAllocator<H>
where
    H: GlobalAlloc,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SegregatedFreeListAllocator")
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

impl SegregatedFreeListAllocator<System> {
    /// Creates an empty allocator over the system heap.
    ///
    /// No memory is acquired until the first allocation.
    #[must_use]
    pub const fn new() -> Self {
        Self::with_heap(System)
    }
}

impl<H> SegregatedFreeListAllocator<H>
where
    H: GlobalAlloc,
{
    /// Creates an empty allocator over `heap`.
    #[must_use]
    pub const fn with_heap(heap: H) -> Self {
        Self::with_config(heap, Config::DEFAULT)
    }

    /// Creates an empty allocator over `heap` with the given configuration.
    #[must_use]
    pub const fn with_config(heap: H, config: Config) -> Self {
        Self {
            lists: FreeLists::new(),
            pool: Pool::new(),
            large: LargeBlockAllocator::with_config(heap, config),
        }
    }

    /// The allocator serving requests above [`MAX_SMALL`] bytes.
    pub fn large(&self) -> &LargeBlockAllocator<H> {
        &self.large
    }

    /// Mutable access to the large-block allocator, for changing its OOM
    /// policy after construction.
    pub fn large_mut(&mut self) -> &mut LargeBlockAllocator<H> {
        &mut self.large
    }

    /// The pool that small-block refills are carved from.
    pub fn pool(&self) -> &Pool {
        &self.pool
    }

    /// Installs an OOM handler and returns the previous one.
    ///
    /// See [`LargeBlockAllocator::set_oom_handler`].
    pub fn set_oom_handler(&mut self, handler: Option<OomHandler>) -> Option<OomHandler> {
        self.large.set_oom_handler(handler)
    }

    /// Allocates `size` bytes aligned to [`ALIGN`].
    ///
    /// A zero-byte request is served from the smallest size class.
    pub fn allocate(&mut self, size: usize) -> Result<NonNull<u8>, AllocError> {
        if size > MAX_SMALL {
            return self.large.allocate(size);
        }
        let size = size.max(1);
        let index = class_index(size);
        if let Some(block) = self.lists.pop(index) {
            return Ok(block);
        }
        self.refill(round_up(size))
    }

    /// Refills the free list for `block_size` and returns one block from the
    /// batch.
    fn refill(&mut self, block_size: usize) -> Result<NonNull<u8>, AllocError> {
        let (first, count) =
            self.pool
                .acquire(&mut self.large, &mut self.lists, block_size, REFILL_BATCH)?;
        trace!("refilled {block_size}-byte class with {count} blocks");
        if count > 1 {
            let index = class_index(block_size);
            unsafe {
                self.lists
                    .thread(index, first.add(block_size), count - 1);
            }
        }
        Ok(first)
    }

    /// Returns a block to the allocator.
    ///
    /// Small blocks are pushed onto the front of their free list and are the
    /// next ones handed out for that class.
    ///
    /// # Safety
    ///
    /// - `ptr` must have been returned by this allocator for a request of
    ///   `size` bytes (or any size of the same class) and not freed since.
    /// - The block must not be used afterwards.
    pub unsafe fn deallocate(&mut self, ptr: NonNull<u8>, size: usize) {
        debug_assert!(ptr.addr().get().is_multiple_of(ALIGN));
        if size > MAX_SMALL {
            unsafe { self.large.deallocate(ptr, size) };
            return;
        }
        let index = class_index(size.max(1));
        unsafe { self.lists.push(index, ptr) };
    }

    /// Resizes a block from `old_size` to `new_size` bytes.
    ///
    /// When both sizes exceed [`MAX_SMALL`], the system heap resizes the block
    /// and its contents are preserved. Otherwise the block is freed and a new
    /// one allocated; **contents are not carried over**, and even a block that
    /// comes back at the same address has its first word overwritten.
    ///
    /// # Errors
    ///
    /// When both sizes exceed [`MAX_SMALL`], an error leaves the original block
    /// untouched and still owned by the caller. In every other case the old
    /// block has already been freed when the new allocation fails, so `ptr`
    /// must not be used or freed again.
    ///
    /// # Safety
    ///
    /// Same requirements as [`deallocate`](Self::deallocate) for `ptr` and
    /// `old_size`.
    pub unsafe fn reallocate(
        &mut self,
        ptr: NonNull<u8>,
        old_size: usize,
        new_size: usize,
    ) -> Result<NonNull<u8>, AllocError> {
        if old_size > MAX_SMALL && new_size > MAX_SMALL {
            return unsafe { self.large.reallocate(ptr, old_size, new_size) };
        }
        unsafe { self.deallocate(ptr, old_size) };
        self.allocate(new_size)
    }

    /// Head of the free list for size class `index`.
    ///
    /// # Panics
    ///
    /// Panics if `index >= LIST_NUMBER`.
    #[must_use]
    pub fn free_list_head(&self, index: usize) -> Option<NonNull<u8>> {
        self.lists.head(index)
    }

    /// Number of free blocks in size class `index`.
    ///
    /// # Panics
    ///
    /// Panics if `index >= LIST_NUMBER`.
    #[must_use]
    pub fn free_list_len(&self, index: usize) -> usize {
        self.lists.len(index)
    }

    /// Takes a snapshot of pool usage and free-list lengths.
    #[must_use]
    pub fn stats(&self) -> AllocatorStats {
        AllocatorStats {
            heap_size: self.pool.heap_size(),
            pool_remaining: self.pool.remaining(),
            arena_count: self.pool.arena_count(),
            free_blocks: core::array::from_fn(|index| self.lists.len(index)),
        }
    }
}

impl<H> Drop for SegregatedFreeListAllocator<H>
where
    H: GlobalAlloc,
{
    fn drop(&mut self) {
        unsafe { self.pool.release(&self.large) };
    }
}

#[cfg_attr(coverage_nightly, coverage(off))]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::{budget::BudgetHeap, config::OomRetry};

    struct TestAllocator {
        allocator: SegregatedFreeListAllocator<BudgetHeap>,
    }

    impl TestAllocator {
        fn allocate(&mut self, size: usize) -> NonNull<u8> {
            let ptr = self.allocator.allocate(size).unwrap();
            unsafe {
                ptr.write_bytes(0x33, size);
            }
            ptr
        }

        unsafe fn deallocate(&mut self, ptr: NonNull<u8>, size: usize) {
            unsafe {
                for i in 0..size {
                    assert_eq!(ptr.add(i).read(), 0x33);
                }
                ptr.write_bytes(0x55, size);
                self.allocator.deallocate(ptr, size);
            }
        }

        fn heads(&self) -> [Option<NonNull<u8>>; LIST_NUMBER] {
            core::array::from_fn(|index| self.allocator.free_list_head(index))
        }
    }

    fn with_test_allocator<F>(budget: usize, test_fn: F)
    where
        F: FnOnce(&mut TestAllocator),
    {
        let mut allocator = TestAllocator {
            allocator: SegregatedFreeListAllocator::with_heap(BudgetHeap::new(budget)),
        };
        test_fn(&mut allocator);
    }

    #[test]
    fn test_consecutive_small_allocations_are_adjacent() {
        with_test_allocator(1 << 20, |allocator| {
            let first = allocator.allocate(8);
            let second = allocator.allocate(8);
            assert_eq!(second, unsafe { first.add(8) });
            assert_eq!(allocator.allocator.stats().arena_count, 1);
            assert_eq!(allocator.allocator.free_list_len(0), REFILL_BATCH - 2);
        });
    }

    #[test]
    fn test_lifo_reuse() {
        with_test_allocator(1 << 20, |allocator| unsafe {
            for size in [1, 8, 20, 64, 127, 128] {
                let ptr = allocator.allocate(size);
                allocator.deallocate(ptr, size);
                assert_eq!(allocator.allocator.free_list_head(class_index(size)), Some(ptr));
                assert_eq!(allocator.allocate(size), ptr);
            }
        });
    }

    #[test]
    fn test_same_class_shares_blocks() {
        with_test_allocator(1 << 20, |allocator| unsafe {
            let ptr = allocator.allocate(17);
            allocator.deallocate(ptr, 17);
            assert_eq!(allocator.allocate(24), ptr);
        });
    }

    #[test]
    fn test_large_requests_bypass_free_lists() {
        with_test_allocator(1 << 20, |allocator| unsafe {
            let small = allocator.allocate(32);
            let before = allocator.heads();
            let stats = allocator.allocator.stats();

            let large = allocator.allocate(200);
            assert_eq!(allocator.heads(), before);
            allocator.deallocate(large, 200);
            assert_eq!(allocator.heads(), before);
            assert_eq!(allocator.allocator.stats(), stats);

            allocator.deallocate(small, 32);
        });
    }

    #[test]
    fn test_partial_refill_threads_remaining_blocks() {
        with_test_allocator(1 << 20, |allocator| {
            allocator.allocate(8);
            assert_eq!(allocator.allocator.pool().remaining(), 160);

            // 160 bytes left: three 48-byte blocks
            let block = allocator.allocate(48);
            let index = class_index(48);
            assert_eq!(allocator.allocator.free_list_len(index), 2);
            assert_eq!(allocator.allocator.free_list_head(index), Some(unsafe { block.add(48) }));
            assert_eq!(allocator.allocator.pool().remaining(), 16);
        });
    }

    #[test]
    fn test_single_block_refill_skips_free_list() {
        with_test_allocator(1 << 20, |allocator| {
            allocator.allocate(8);
            // 160 bytes left: one 128-byte block
            allocator.allocate(128);
            assert_eq!(allocator.allocator.free_list_len(class_index(128)), 0);
            assert_eq!(allocator.allocator.pool().remaining(), 32);
        });
    }

    #[test]
    fn test_growth_donates_leftover_and_accelerates() {
        with_test_allocator(1 << 20, |allocator| {
            allocator.allocate(8);
            allocator.allocate(128);
            allocator.allocate(128);

            let stats = allocator.allocator.stats();
            assert_eq!(stats.arena_count, 2);
            assert_eq!(stats.heap_size, 320 + 2 * 128 * 20 + round_up(320 >> 4));
            assert_eq!(stats.free_blocks[class_index(32)], 1);
            assert_eq!(stats.free_blocks[class_index(128)], REFILL_BATCH - 1);
        });
    }

    #[test]
    fn test_reallocate_between_classes() {
        with_test_allocator(1 << 20, |allocator| unsafe {
            let ptr = allocator.allocate(16);
            let moved = allocator.allocator.reallocate(ptr, 16, 64).unwrap();
            assert_ne!(moved, ptr);
            assert_eq!(allocator.allocator.free_list_head(class_index(16)), Some(ptr));
            allocator.allocator.deallocate(moved, 64);
        });
    }

    #[test]
    fn test_reallocate_large_preserves_contents() {
        with_test_allocator(1 << 20, |allocator| unsafe {
            let ptr = allocator.allocate(256);
            let ptr = allocator.allocator.reallocate(ptr, 256, 512).unwrap();
            for i in 0..256 {
                assert_eq!(ptr.add(i).read(), 0x33);
            }
            allocator.allocator.deallocate(ptr, 512);
        });
    }

    #[test]
    fn test_reallocate_across_tiers_frees_then_allocates() {
        with_test_allocator(1 << 20, |allocator| unsafe {
            let small = allocator.allocate(24);
            let large = allocator.allocator.reallocate(small, 24, 300).unwrap();
            assert_eq!(
                allocator.allocator.free_list_head(class_index(24)),
                Some(small)
            );

            let back = allocator.allocator.reallocate(large, 300, 24).unwrap();
            assert_eq!(back, small);
            assert_eq!(allocator.allocator.free_list_len(class_index(24)), REFILL_BATCH - 1);
            allocator.allocator.deallocate(back, 24);
        });
    }

    #[test]
    fn test_large_mut_changes_oom_policy() {
        with_test_allocator(0, |allocator| {
            allocator.allocator.large_mut().set_oom_retry(OomRetry::Unbounded);
            assert_eq!(allocator.allocator.large().oom_retry(), OomRetry::Unbounded);
            assert!(!allocator.allocator.large().has_oom_handler());
            let err = allocator.allocator.allocate(512).unwrap_err();
            assert!(matches!(err, AllocError::NoOomHandler { size: 512, .. }));
        });
    }

    #[test]
    fn test_zero_size_uses_smallest_class() {
        with_test_allocator(1 << 20, |allocator| unsafe {
            let ptr = allocator.allocator.allocate(0).unwrap();
            allocator.allocator.deallocate(ptr, 0);
            assert_eq!(allocator.allocator.free_list_head(0), Some(ptr));
        });
    }

    #[test]
    fn test_out_of_memory() {
        with_test_allocator(64, |allocator| {
            let err = allocator.allocator.allocate(8).unwrap_err();
            assert!(err.is_out_of_memory());
            let err = allocator.allocator.allocate(1024).unwrap_err();
            assert!(err.is_out_of_memory());
        });
    }

    #[test]
    fn test_drop_releases_arenas() {
        let heap = BudgetHeap::new(1 << 20);
        let budget = heap.budget();
        {
            let mut allocator = SegregatedFreeListAllocator::with_heap(heap);
            for size in 1..=MAX_SMALL {
                allocator.allocate(size).unwrap();
            }
            assert!(budget.load(core::sync::atomic::Ordering::SeqCst) < 1 << 20);
        }
        assert_eq!(budget.load(core::sync::atomic::Ordering::SeqCst), 1 << 20);
    }

    #[test]
    fn test_many_blocks_stay_distinct() {
        with_test_allocator(1 << 22, |allocator| unsafe {
            let mut ptrs = Vec::new();
            for round in 0..500 {
                let size = round % MAX_SMALL + 1;
                ptrs.push((allocator.allocate(size), size));
            }
            let mut addrs: Vec<_> = ptrs.iter().map(|(ptr, _)| ptr.addr()).collect();
            addrs.sort_unstable();
            addrs.dedup();
            assert_eq!(addrs.len(), ptrs.len());

            for (i, (ptr, size)) in ptrs.iter().enumerate() {
                if i.is_multiple_of(2) {
                    allocator.deallocate(*ptr, *size);
                }
            }
            for (i, (ptr, size)) in ptrs.iter().enumerate() {
                if !i.is_multiple_of(2) {
                    allocator.deallocate(*ptr, *size);
                }
            }
        });
    }
}
