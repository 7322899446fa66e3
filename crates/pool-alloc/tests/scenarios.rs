#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
#![cfg_attr(coverage_nightly, coverage(off))]
#![cfg(test)]

use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};

use pool_alloc::{
    AllocError, Config, OomRetry, SegregatedFreeListAllocator, TypedAllocator,
    budget::BudgetHeap,
    facade::{construct, destroy},
    free_list::REFILL_BATCH,
    size_class::{ALIGN, LIST_NUMBER, MAX_SMALL, class_index, round_up},
};

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn heads<H>(allocator: &SegregatedFreeListAllocator<H>) -> Vec<Option<std::ptr::NonNull<u8>>>
where
    H: std::alloc::GlobalAlloc,
{
    (0..LIST_NUMBER)
        .map(|index| allocator.free_list_head(index))
        .collect()
}

#[test]
fn empty_allocator_serves_adjacent_blocks_from_one_growth() {
    init_logger();
    let mut allocator = SegregatedFreeListAllocator::new();
    let first = allocator.allocate(8).unwrap();
    let second = allocator.allocate(8).unwrap();

    assert_eq!(second.addr().get(), first.addr().get() + 8);
    let stats = allocator.stats();
    assert_eq!(stats.arena_count, 1);
    assert_eq!(stats.heap_size, 2 * 8 * REFILL_BATCH);
}

#[test]
fn freed_block_is_reused_first() {
    init_logger();
    let mut allocator = SegregatedFreeListAllocator::new();
    let _other = allocator.allocate(8).unwrap();
    let ptr = allocator.allocate(8).unwrap();
    unsafe { allocator.deallocate(ptr, 8) };
    assert_eq!(allocator.allocate(8).unwrap(), ptr);
}

#[test]
fn large_request_skips_free_lists() {
    init_logger();
    let mut allocator = SegregatedFreeListAllocator::new();
    let small = allocator.allocate(40).unwrap();
    let before = heads(&allocator);
    let heap_size = allocator.stats().heap_size;

    let large = allocator.allocate(200).unwrap();
    assert_eq!(heads(&allocator), before);
    assert_eq!(allocator.stats().heap_size, heap_size);

    unsafe {
        allocator.deallocate(large, 200);
        allocator.deallocate(small, 40);
    }
}

#[test]
fn growth_acquires_at_least_twice_the_batch() {
    init_logger();
    let mut allocator = SegregatedFreeListAllocator::new();
    for size in (ALIGN..=MAX_SMALL).step_by(ALIGN) {
        let before = allocator.stats();
        allocator.allocate(size).unwrap();
        let after = allocator.stats();
        if after.arena_count > before.arena_count {
            let grown = after.heap_size - before.heap_size;
            assert!(grown >= 2 * size * REFILL_BATCH);
            assert_eq!(
                grown,
                2 * size * REFILL_BATCH + round_up(before.heap_size >> 4)
            );
        }
    }
}

#[test]
fn short_pool_refills_fewer_blocks() {
    init_logger();
    let mut allocator = SegregatedFreeListAllocator::new();
    allocator.allocate(8).unwrap();
    assert_eq!(allocator.pool().remaining(), 160);

    allocator.allocate(48).unwrap();
    assert_eq!(allocator.free_list_len(class_index(48)), 2);
    assert_eq!(allocator.stats().arena_count, 1);
}

#[test]
fn oom_handler_can_be_chained() {
    init_logger();
    let heap = BudgetHeap::new(0);
    let budget = heap.budget();
    let mut allocator = SegregatedFreeListAllocator::with_config(
        heap,
        Config {
            oom_retry: OomRetry::Unbounded,
        },
    );

    let first_calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&first_calls);
    assert!(allocator
        .set_oom_handler(Some(Box::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        })))
        .is_none());

    // a second handler that frees memory, then defers to the first one
    let mut previous = allocator.set_oom_handler(None).unwrap();
    allocator.set_oom_handler(Some(Box::new(move || {
        budget.store(1 << 16, Ordering::SeqCst);
        previous();
    })));

    let ptr = allocator.allocate(4096).unwrap();
    assert_eq!(first_calls.load(Ordering::SeqCst), 1);
    unsafe { allocator.deallocate(ptr, 4096) };
}

#[test]
fn exhausted_retries_surface_as_error() {
    init_logger();
    let mut allocator = SegregatedFreeListAllocator::with_heap(BudgetHeap::new(0));
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    allocator.set_oom_handler(Some(Box::new(move || {
        counter.fetch_add(1, Ordering::SeqCst);
    })));

    let err = allocator.allocate(16).unwrap_err();
    assert!(matches!(err, AllocError::RetriesExhausted { .. }));
    assert_eq!(
        calls.load(Ordering::SeqCst),
        usize::try_from(OomRetry::DEFAULT_LIMIT.get()).unwrap()
    );
}

#[test]
fn typed_allocator_round_trip() {
    init_logger();
    let mut allocator = SegregatedFreeListAllocator::new();
    let mut typed = TypedAllocator::<[u64; 4]>::new(&mut allocator);

    let storage = typed.allocate(2).unwrap().unwrap();
    unsafe {
        construct(storage, [1, 2, 3, 4]);
        construct(storage.add(1), [5, 6, 7, 8]);
        assert_eq!(storage.add(1).read()[3], 8);
        destroy(storage);
        destroy(storage.add(1));
        typed.deallocate(Some(storage), 2);
    }

    // 2 * 32 bytes went back to the 64-byte class
    assert_eq!(
        allocator.free_list_head(class_index(64)),
        Some(storage.cast())
    );
}
