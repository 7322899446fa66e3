//! Size classes and the intrusive free lists that hold their blocks.
//!
//! Small requests are rounded up to a multiple of [`ALIGN`] and served from
//! one of [`LIST_NUMBER`] singly-linked lists. A free block stores the link
//! to the next free block in its own first machine word, so the lists need
//! no memory beyond the blocks themselves.
//!
//! ```text
//! class:   0     1     2           15
//! size:    8    16    24   ...    128
//! head:   [*]-->[ next | .... ]-->[ next | .... ]--> null
//! ```

use core::ptr::NonNull;

/// Granularity of every small block and of every pool carve.
pub const ALIGN: usize = 8;

/// Largest request served from the free lists.
///
/// Anything larger goes straight to the large-block allocator.
pub const MAX_SMALL: usize = 128;

/// Number of size classes.
pub const LIST_NUMBER: usize = MAX_SMALL / ALIGN;

/// Rounds `n` up to the next multiple of [`ALIGN`].
///
/// # Examples
///
/// ```
/// use pool_alloc::size_class::round_up;
///
/// assert_eq!(round_up(1), 8);
/// assert_eq!(round_up(8), 8);
/// assert_eq!(round_up(13), 16);
/// ```
#[must_use]
pub const fn round_up(n: usize) -> usize {
    (n + ALIGN - 1) & !(ALIGN - 1)
}

/// Returns the size class serving requests of `size` bytes.
///
/// # Panics
///
/// Panics if `size` is zero or larger than [`MAX_SMALL`].
///
/// # Examples
///
/// ```
/// use pool_alloc::size_class::class_index;
///
/// assert_eq!(class_index(1), 0);
/// assert_eq!(class_index(8), 0);
/// assert_eq!(class_index(9), 1);
/// assert_eq!(class_index(128), 15);
/// ```
#[must_use]
pub const fn class_index(size: usize) -> usize {
    assert!(size > 0 && size <= MAX_SMALL, "size outside small range");
    size.div_ceil(ALIGN) - 1
}

/// Returns the block size held by size class `index`.
#[must_use]
pub const fn class_size(index: usize) -> usize {
    assert!(index < LIST_NUMBER);
    (index + 1) * ALIGN
}

/// Overlay on a block that currently sits in a free list.
///
/// Only valid while the block is free; once handed out, the caller's data
/// occupies the same bytes.
#[repr(C)]
struct FreeBlock {
    next: Option<NonNull<Self>>,
}
const _: () = assert!(size_of::<FreeBlock>() <= ALIGN);
const _: () = assert!(align_of::<FreeBlock>() <= ALIGN);

impl FreeBlock {
    fn from_block(block: NonNull<u8>) -> NonNull<Self> {
        debug_assert!(block.addr().get().is_multiple_of(ALIGN));
        block.cast()
    }
}

/// The table of free-list heads, one per size class.
///
/// A list only ever holds blocks of exactly [`class_size`] bytes.
pub(crate) struct FreeLists {
    heads: [Option<NonNull<FreeBlock>>; LIST_NUMBER],
}

impl FreeLists {
    pub(crate) const fn new() -> Self {
        Self {
            heads: [None; LIST_NUMBER],
        }
    }

    pub(crate) fn head(&self, index: usize) -> Option<NonNull<u8>> {
        self.heads[index].map(NonNull::cast)
    }

    /// Pops the most recently pushed block of class `index`.
    pub(crate) fn pop(&mut self, index: usize) -> Option<NonNull<u8>> {
        let block = self.heads[index]?;
        // Every block in a list was written by `push` or `thread`.
        self.heads[index] = unsafe { block.read().next };
        Some(block.cast())
    }

    /// Pushes `block` onto the front of class `index`.
    ///
    /// # Safety
    ///
    /// - `block` must be [`ALIGN`]-aligned, valid for writes of
    ///   `class_size(index)` bytes, and owned by no one else.
    /// - `block` must not already be in any list.
    pub(crate) unsafe fn push(&mut self, index: usize, block: NonNull<u8>) {
        let node = FreeBlock::from_block(block);
        unsafe {
            node.write(FreeBlock {
                next: self.heads[index],
            });
        }
        self.heads[index] = Some(node);
    }

    /// Links `count` contiguous blocks starting at `first` in address order
    /// and places the chain in front of class `index`.
    ///
    /// # Safety
    ///
    /// `first..first + count * class_size(index)` must be valid for writes
    /// and owned by no one else.
    pub(crate) unsafe fn thread(&mut self, index: usize, first: NonNull<u8>, count: usize) {
        if count == 0 {
            return;
        }
        let block_size = class_size(index);
        let mut next = self.heads[index];
        for i in (0..count).rev() {
            let node = unsafe { FreeBlock::from_block(first.add(i * block_size)) };
            unsafe { node.write(FreeBlock { next }) };
            next = Some(node);
        }
        self.heads[index] = next;
    }

    /// Counts the blocks in class `index` by walking the list.
    pub(crate) fn len(&self, index: usize) -> usize {
        let mut count = 0;
        let mut current = self.heads[index];
        while let Some(node) = current {
            count += 1;
            current = unsafe { node.read().next };
        }
        count
    }

    /// Removes one block from the smallest non-empty class at or above
    /// `index` and returns it with its size.
    pub(crate) fn take_at_least(&mut self, index: usize) -> Option<(NonNull<u8>, usize)> {
        (index..LIST_NUMBER).find_map(|i| self.pop(i).map(|block| (block, class_size(i))))
    }
}
