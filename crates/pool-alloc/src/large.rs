//! Pass-through allocator for large requests.
//!
//! [`LargeBlockAllocator`] forwards every request to a system heap (any
//! [`GlobalAlloc`], [`System`] by default) and owns the out-of-memory
//! protocol: when the heap fails, the installed [`OomHandler`] is invoked and
//! the request is retried, up to the limit set by [`OomRetry`].
//!
//! ```text
//! allocate(size)
//!   └─ heap.alloc ── ok ──────────────────────────────► ptr
//!        │ null
//!        ▼
//!      handler? ── none ────────────────────────────► Err(NoOomHandler)
//!        │ some
//!        ▼
//!      retries left? ── no ─────────────────────────► Err(RetriesExhausted)
//!        │ yes
//!        ▼
//!      handler(); heap.alloc ── ok ─────────────────► ptr
//!        │ null
//!        └──────────── loop ───────────────────────┘
//! ```

use core::{
    alloc::{GlobalAlloc, Layout},
    fmt, mem,
    ptr::NonNull,
};
use std::alloc::System;

use log::{error, warn};
use snafu::ResultExt as _;

use crate::{
    config::{Config, OomRetry},
    error::{AllocError, InvalidLayoutSnafu, NoOomHandlerSnafu, RetriesExhaustedSnafu},
    size_class::ALIGN,
};

/// Callback invoked when the system heap cannot satisfy a request.
///
/// It is expected to release memory held elsewhere (or to terminate the
/// process itself) so that the retried request can succeed.
pub type OomHandler = Box<dyn FnMut() + Send>;

/// Layout used for every block handed to the system heap.
///
/// Zero-byte requests are widened to one byte so the heap never sees a
/// zero-sized layout.
fn block_layout(size: usize) -> Result<Layout, AllocError> {
    Layout::from_size_align(size.max(1), ALIGN).context(InvalidLayoutSnafu { size })
}

/// Allocator that hands every request straight to the system heap.
pub struct LargeBlockAllocator<H = System> {
    heap: H,
    oom_handler: Option<OomHandler>,
    oom_retry: OomRetry,
}

impl<H> fmt::Debug for LargeBlockAllocator<H>
where
    H: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LargeBlockAllocator")
            .field("heap", &self.heap)
            .field("oom_handler", &self.oom_handler.as_ref().map(|_| ".."))
            .field("oom_retry", &self.oom_retry)
            .finish()
    }
}

impl Default for LargeBlockAllocator<System> {
    fn default() -> Self {
        Self::new()
    }
}

impl LargeBlockAllocator<System> {
    /// Creates an allocator backed by the system allocator, with no OOM
    /// handler installed.
    #[must_use]
    pub const fn new() -> Self {
        Self::with_heap(System)
    }
}

impl<H> LargeBlockAllocator<H>
where
    H: GlobalAlloc,
{
    /// Creates an allocator backed by `heap` with the default configuration.
    #[must_use]
    pub const fn with_heap(heap: H) -> Self {
        Self::with_config(heap, Config::DEFAULT)
    }

    /// Creates an allocator backed by `heap`.
    #[must_use]
    pub const fn with_config(heap: H, config: Config) -> Self {
        Self {
            heap,
            oom_handler: None,
            oom_retry: config.oom_retry,
        }
    }

    /// Returns the underlying system heap.
    pub fn heap(&self) -> &H {
        &self.heap
    }

    /// Installs `handler` and returns the previously installed one, so that
    /// callers can chain or restore it.
    ///
    /// Passing `None` removes the handler; failed requests then fail
    /// immediately.
    ///
    /// # Examples
    ///
    /// ```
    /// use pool_alloc::large::LargeBlockAllocator;
    ///
    /// let mut allocator = LargeBlockAllocator::new();
    /// let previous = allocator.set_oom_handler(Some(Box::new(|| {})));
    /// assert!(previous.is_none());
    /// let previous = allocator.set_oom_handler(None);
    /// assert!(previous.is_some());
    /// ```
    pub fn set_oom_handler(&mut self, handler: Option<OomHandler>) -> Option<OomHandler> {
        mem::replace(&mut self.oom_handler, handler)
    }

    /// Returns whether an OOM handler is installed.
    pub fn has_oom_handler(&self) -> bool {
        self.oom_handler.is_some()
    }

    /// The retry policy applied when the system heap fails.
    #[must_use]
    pub fn oom_retry(&self) -> OomRetry {
        self.oom_retry
    }

    /// Replaces the retry policy. Takes effect from the next failed request.
    pub fn set_oom_retry(&mut self, oom_retry: OomRetry) {
        self.oom_retry = oom_retry;
    }

    /// Makes a single attempt to allocate `size` bytes, without invoking the
    /// OOM handler.
    pub fn try_allocate(&self, size: usize) -> Option<NonNull<u8>> {
        let layout = block_layout(size).ok()?;
        NonNull::new(unsafe { self.heap.alloc(layout) })
    }

    /// Allocates `size` bytes aligned to [`ALIGN`].
    ///
    /// If the system heap fails, the OOM handler is invoked and the request
    /// retried until it succeeds or the retry policy gives up.
    ///
    /// # Examples
    ///
    /// ```
    /// use pool_alloc::large::LargeBlockAllocator;
    ///
    /// let mut allocator = LargeBlockAllocator::new();
    /// let ptr = allocator.allocate(4096).unwrap();
    /// unsafe {
    ///     ptr.write_bytes(0, 4096);
    ///     allocator.deallocate(ptr, 4096);
    /// }
    /// ```
    pub fn allocate(&mut self, size: usize) -> Result<NonNull<u8>, AllocError> {
        let layout = block_layout(size)?;
        if let Some(ptr) = NonNull::new(unsafe { self.heap.alloc(layout) }) {
            return Ok(ptr);
        }
        self.retry_with_handler(size, |heap| NonNull::new(unsafe { heap.alloc(layout) }))
    }

    /// Resizes a block obtained from this allocator to `new_size` bytes,
    /// preserving its contents up to the smaller of the two sizes.
    ///
    /// Follows the same retry protocol as [`allocate`](Self::allocate). On
    /// error the original block is left untouched.
    ///
    /// # Safety
    ///
    /// - `ptr` must have been returned by this allocator for `old_size`
    ///   bytes and not deallocated since.
    /// - On success `ptr` must no longer be used.
    pub unsafe fn reallocate(
        &mut self,
        ptr: NonNull<u8>,
        old_size: usize,
        new_size: usize,
    ) -> Result<NonNull<u8>, AllocError> {
        let old_layout = block_layout(old_size)?;
        let new_layout = block_layout(new_size)?;
        let realloc = |heap: &H| {
            NonNull::new(unsafe { heap.realloc(ptr.as_ptr(), old_layout, new_layout.size()) })
        };
        if let Some(new_ptr) = realloc(&self.heap) {
            return Ok(new_ptr);
        }
        self.retry_with_handler(new_size, realloc)
    }

    /// Returns a block to the system heap.
    ///
    /// # Safety
    ///
    /// `ptr` must have been returned by this allocator for `size` bytes and
    /// not deallocated since.
    pub unsafe fn deallocate(&self, ptr: NonNull<u8>, size: usize) {
        // The same layout was accepted by `block_layout` when the block was
        // allocated.
        unsafe {
            let layout = Layout::from_size_align_unchecked(size.max(1), ALIGN);
            self.heap.dealloc(ptr.as_ptr(), layout);
        }
    }

    fn retry_with_handler<F>(&mut self, size: usize, mut attempt: F) -> Result<NonNull<u8>, AllocError>
    where
        F: FnMut(&H) -> Option<NonNull<u8>>,
    {
        let mut invocations: u32 = 0;
        loop {
            let Some(handler) = self.oom_handler.as_mut() else {
                error!("out of memory: {size}-byte request failed, no OOM handler installed");
                return NoOomHandlerSnafu { size }.fail();
            };
            if !self.oom_retry.permits(invocations) {
                error!(
                    "out of memory: {size}-byte request failed after {invocations} OOM handler invocations"
                );
                return RetriesExhaustedSnafu {
                    size,
                    attempts: invocations,
                }
                .fail();
            }
            invocations = invocations.saturating_add(1);
            warn!("{size}-byte request failed, invoking OOM handler (attempt {invocations})");
            handler();

            if let Some(ptr) = attempt(&self.heap) {
                return Ok(ptr);
            }
        }
    }
}
