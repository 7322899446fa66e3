//! The chunk arena that small blocks are carved from.
//!
//! A [`Pool`] is a `start..end` cursor into the most recently acquired arena.
//! Blocks are carved from the front; when not even one block fits, the
//! leftover bytes are donated to the free list of their own size class and a
//! new arena is requested from the [`LargeBlockAllocator`].
//!
//! Every arena begins with a small header linking it to the previously
//! acquired arena, so all of them can be returned to the system heap when
//! the owning allocator is dropped.
//!
//! ```text
//!  arena (newest)                            arena (older)
//! ┌────────┬───────────────┬───────────────┐  ┌────────┬──────────────┐
//! │ header │ carved blocks │ start .. end  │  │ header │ carved ...   │
//! │  next ─┼───────────────┼───────────────┼─►│  next ─┼─► None       │
//! └────────┴───────────────┴───────────────┘  └────────┴──────────────┘
//! ```

use core::{alloc::GlobalAlloc, ptr::NonNull};

use log::debug;

use crate::{
    error::AllocError,
    large::LargeBlockAllocator,
    size_class::{ALIGN, FreeLists, MAX_SMALL, class_index, round_up},
};

#[repr(C)]
struct ArenaHeader {
    next: Option<NonNull<Self>>,
    /// Bytes obtained from the heap for this arena, header included.
    size: usize,
}

const ARENA_HEADER: usize = size_of::<ArenaHeader>();
const _: () = assert!(ARENA_HEADER.is_multiple_of(ALIGN));

/// A growable arena of uncommitted bytes.
///
/// Bytes in `start..end` belong to no caller and no free list. `heap_size`
/// is the total number of usable bytes ever acquired and never decreases.
pub struct Pool {
    start: NonNull<u8>,
    end: NonNull<u8>,
    heap_size: usize,
    arenas: Option<NonNull<ArenaHeader>>,
    arena_count: usize,
}

impl Pool {
    pub(crate) const fn new() -> Self {
        Self {
            start: NonNull::dangling(),
            end: NonNull::dangling(),
            heap_size: 0,
            arenas: None,
            arena_count: 0,
        }
    }

    /// Bytes left in the current arena.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.end.addr().get() - self.start.addr().get()
    }

    /// Total usable bytes ever acquired from the system heap.
    #[must_use]
    pub fn heap_size(&self) -> usize {
        self.heap_size
    }

    /// Number of arenas currently owned.
    #[must_use]
    pub fn arena_count(&self) -> usize {
        self.arena_count
    }

    /// Carves up to `requested` blocks of `block_size` bytes.
    ///
    /// Returns the first block of a contiguous run and the number of blocks
    /// in it, which is `requested` when the pool is well stocked and fewer
    /// (at least one) when it is running low. When not even one block fits,
    /// the pool grows by `2 * block_size * requested` plus a sixteenth of
    /// everything acquired so far, and the carve is retried.
    ///
    /// If growth fails, free blocks of `block_size` bytes or more are taken
    /// back into the pool; failing that, exactly `block_size * requested`
    /// bytes are requested through the large allocator's OOM protocol.
    pub(crate) fn acquire<H>(
        &mut self,
        large: &mut LargeBlockAllocator<H>,
        lists: &mut FreeLists,
        block_size: usize,
        requested: usize,
    ) -> Result<(NonNull<u8>, usize), AllocError>
    where
        H: GlobalAlloc,
    {
        assert!(block_size > 0 && block_size.is_multiple_of(ALIGN));
        assert!(requested > 0);

        let total = block_size * requested;
        loop {
            let remaining = self.remaining();
            if remaining >= total {
                return Ok((self.carve(total), requested));
            }
            if remaining >= block_size {
                let count = remaining / block_size;
                return Ok((self.carve(count * block_size), count));
            }

            self.donate_remainder(lists);

            let grow = 2 * total + round_up(self.heap_size >> 4);
            if let Some(arena) = large.try_allocate(ARENA_HEADER + grow) {
                debug!("pool grew by {grow} bytes (heap size {})", self.heap_size + grow);
                unsafe { self.install(arena, grow) };
                continue;
            }

            debug!("pool growth by {grow} bytes failed");
            if block_size <= MAX_SMALL
                && let Some((block, size)) = lists.take_at_least(class_index(block_size))
            {
                debug!("reclaimed a free {size}-byte block into the pool");
                self.start = block;
                self.end = unsafe { block.add(size) };
                continue;
            }

            let arena = large.allocate(ARENA_HEADER + total)?;
            unsafe { self.install(arena, total) };
        }
    }

    /// Returns every arena to the system heap.
    ///
    /// # Safety
    ///
    /// - `large` must be the allocator the arenas were acquired from.
    /// - No block carved from the pool may be used afterwards.
    pub(crate) unsafe fn release<H>(&mut self, large: &LargeBlockAllocator<H>)
    where
        H: GlobalAlloc,
    {
        let mut current = self.arenas.take();
        while let Some(header) = current {
            let ArenaHeader { next, size } = unsafe { header.read() };
            unsafe { large.deallocate(header.cast(), size) };
            current = next;
        }
        self.start = NonNull::dangling();
        self.end = NonNull::dangling();
        self.arena_count = 0;
    }

    fn carve(&mut self, size: usize) -> NonNull<u8> {
        assert!(size <= self.remaining());
        let block = self.start;
        self.start = unsafe { block.add(size) };
        block
    }

    /// Moves the leftover bytes onto the free list of their size class.
    ///
    /// Anything below [`ALIGN`] bytes, or too large for a size class, is
    /// dropped.
    fn donate_remainder(&mut self, lists: &mut FreeLists) {
        let usable = self.remaining() & !(ALIGN - 1);
        if (ALIGN..=MAX_SMALL).contains(&usable) {
            let block = self.carve(usable);
            debug!("donated {usable} leftover pool bytes to the free lists");
            unsafe { lists.push(class_index(usable), block) };
        }
        self.start = self.end;
    }

    unsafe fn install(&mut self, arena: NonNull<u8>, usable: usize) {
        let header = arena.cast::<ArenaHeader>();
        unsafe {
            header.write(ArenaHeader {
                next: self.arenas,
                size: ARENA_HEADER + usable,
            });
            self.start = arena.add(ARENA_HEADER);
            self.end = self.start.add(usable);
        }
        self.arenas = Some(header);
        self.arena_count += 1;
        self.heap_size += usable;
    }
}
