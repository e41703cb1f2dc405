/*!
 * Memory System Tests
 * End-to-end dispatch, reallocation, corruption and teardown behavior
 */

use engine_memory::memory::{ThinHeader, TrackedHeader};
use engine_memory::{
    mem_param, AllocatorId, AllocatorKind, AssertHandler, MemPtr, MemoryConfig, MemoryError,
    MemoryParam, MemorySystem, RegionId, Severity,
};
use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use std::sync::Arc;

fn recording_handler() -> (AssertHandler, Arc<Mutex<Vec<(&'static str, Severity)>>>) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let handler = AssertHandler::new(move |report| {
        sink.lock().push((report.code(), report.severity));
    });
    (handler, seen)
}

fn corrupt_checksum<H>(memory: &MemorySystem<H>, ptr: MemPtr)
where
    H: engine_memory::AllocHeader,
{
    let header = MemPtr::new(ptr.region, ptr.offset - memory.header_size());
    let at = header.add(TrackedHeader::CHECKSUM_OFFSET);
    let byte = memory.read_bytes(at, 1).unwrap()[0];
    memory.write_bytes(at, &[byte ^ 0xFF]).unwrap();
}

#[test]
fn test_end_to_end_burst() {
    let mut memory = MemorySystem::create_memory(16).unwrap();
    let pool = memory.add_pool(64, 4096);
    let heap = memory.add_heap(1024 * 1024);

    let ptrs: Vec<_> = (0..5000)
        .map(|_| memory.alloc(MemoryParam::new(64)).unwrap())
        .collect();

    // Header plus payload never fits a 64-byte block, so the heap takes all of them
    assert_eq!(memory.get_allocator(pool).unwrap().live_allocations(), 0);
    assert_eq!(memory.get_allocator(heap).unwrap().live_allocations(), 5000);

    for ptr in ptrs.into_iter().rev() {
        memory.free(ptr);
    }

    let stats = memory.statistics();
    assert_eq!(stats.total_allocations, 5000);
    assert_eq!(stats.current_allocations, 0);
    assert_eq!(stats.total_bytes, 5000 * 64);
    assert_eq!(stats.peak_allocations, 5000);
    memory.destroy();
}

#[test]
fn test_end_to_end_burst_grows_pool() {
    let mut memory = MemorySystem::create_memory(16).unwrap();
    let pool = memory.add_pool(128, 1024);
    let heap = memory.add_heap(1024 * 1024);

    let ptrs: Vec<_> = (0..5000)
        .map(|_| memory.alloc(MemoryParam::new(64)).unwrap())
        .collect();

    let stats = |id: AllocatorId| {
        memory
            .allocator_stats()
            .into_iter()
            .find(|(found, _)| *found == id)
            .map(|(_, stats)| stats)
            .unwrap()
    };
    let pool_stats = stats(pool);
    assert_eq!(pool_stats.live_allocations, 5000);
    assert!(pool_stats.expansions >= 1);
    assert!(pool_stats.arenas >= 2);
    assert_eq!(stats(heap).live_allocations, 0);

    for ptr in ptrs.into_iter().rev() {
        memory.free(ptr);
    }

    let totals = memory.statistics();
    assert_eq!(totals.total_allocations, 5000);
    assert_eq!(totals.current_allocations, 0);
    assert_eq!(stats(pool).live_allocations, 0);
    memory.try_destroy().unwrap();
}

#[test]
fn test_default_allocators_registered() {
    let memory = MemorySystem::with_default_allocators(MemoryConfig::default()).unwrap();
    assert_eq!(memory.allocator_count(), 6);

    let order = memory.priority_order();
    let first = memory.get_allocator(order[0]).unwrap();
    assert_eq!(first.kind(), AllocatorKind::Pool);
    assert_eq!(first.name(), "pool(64)");
    assert_eq!(order.last(), Some(&AllocatorId::FALLBACK));
    memory.try_destroy().unwrap();
}

#[test]
fn test_small_requests_land_in_smallest_pool() {
    let memory = MemorySystem::with_default_allocators(MemoryConfig::default()).unwrap();
    let ptr = memory.alloc(MemoryParam::new(8)).unwrap();

    let pools: Vec<_> = memory
        .allocator_stats()
        .into_iter()
        .filter(|(_, stats)| stats.live_allocations == 1)
        .map(|(_, stats)| stats.name)
        .collect();
    assert_eq!(pools, vec!["pool(64)".to_string()]);

    memory.free(ptr);
    memory.try_destroy().unwrap();
}

#[test]
fn test_realloc_moves_across_allocators() {
    let mut memory = MemorySystem::create_memory(16).unwrap();
    let pool = memory.add_pool(128, 8);
    let heap = memory.add_heap(64 * 1024);

    let ptr = memory.alloc(MemoryParam::new(32)).unwrap();
    memory.write_bytes(ptr, b"persistent").unwrap();
    assert_eq!(memory.get_allocator(pool).unwrap().live_allocations(), 1);

    let moved = memory.realloc(ptr, MemoryParam::new(500)).unwrap();
    assert_eq!(memory.read_bytes(moved, 10).unwrap(), b"persistent");
    assert_eq!(memory.get_allocator(pool).unwrap().live_allocations(), 0);
    assert_eq!(memory.get_allocator(heap).unwrap().live_allocations(), 1);

    let large = memory.realloc(moved, MemoryParam::new(100_000)).unwrap();
    let larger = memory.realloc(large, MemoryParam::new(200_000)).unwrap();
    assert_eq!(larger, large);
    assert_eq!(memory.read_bytes(larger, 10).unwrap(), b"persistent");

    let stats = memory.statistics();
    assert_eq!(stats.current_allocations, 1);
    assert_eq!(stats.current_bytes, 200_000);
    assert_eq!(stats.total_allocations, 4);

    memory.free(larger);
    memory.try_destroy().unwrap();
}

#[test]
fn test_realloc_to_zero_frees() {
    let memory = MemorySystem::create_memory(16).unwrap();
    let ptr = memory.alloc(MemoryParam::new(40)).unwrap();

    assert_eq!(memory.realloc(ptr, MemoryParam::new(0)), None);
    assert_eq!(memory.statistics().current_allocations, 0);
    memory.try_destroy().unwrap();
}

#[test]
fn test_corrupted_header_detected_on_free() {
    let mut memory = MemorySystem::create_memory(16).unwrap();
    memory.add_heap(4096);
    let ptr = memory.alloc(MemoryParam::new(24)).unwrap();

    corrupt_checksum(&memory, ptr);
    let err = memory.try_free(ptr).unwrap_err();
    assert!(matches!(err, MemoryError::CorruptionDetected { .. }));
    assert_eq!(err.severity(), Severity::Critical);
}

#[test]
#[should_panic(expected = "CRITICAL")]
fn test_corruption_is_critical() {
    let memory = MemorySystem::create_memory(16).unwrap();
    let ptr = memory.alloc(MemoryParam::new(24)).unwrap();
    corrupt_checksum(&memory, ptr);
    memory.free(ptr);
}

#[test]
fn test_corruption_leaves_neighbours_intact() {
    let mut memory = MemorySystem::create_memory(16).unwrap();
    memory.add_pool(128, 16);
    let ptrs: Vec<_> = (0..4)
        .map(|_| memory.alloc(MemoryParam::new(16)).unwrap())
        .collect();

    corrupt_checksum(&memory, ptrs[1]);
    memory.free(ptrs[0]);
    memory.free(ptrs[2]);
    memory.free(ptrs[3]);
    assert!(memory.try_free(ptrs[1]).is_err());
}

#[test]
fn test_assert_level_failures_continue() {
    let (handler, seen) = recording_handler();
    let mut memory = MemorySystem::create_memory(16)
        .unwrap()
        .with_assert_handler(handler);
    memory.add_pool(128, 4);

    memory.free(MemPtr::new(RegionId(999), 48));
    let ptr = memory.alloc(MemoryParam::new(16)).unwrap();
    memory.free(ptr);
    memory.free(ptr);

    let seen = seen.lock().clone();
    assert_eq!(
        seen,
        vec![
            ("memory::invalid_address", Severity::Assert),
            ("memory::invalid_address", Severity::Assert),
        ]
    );
    memory.try_destroy().unwrap();
}

#[test]
fn test_out_of_memory_reported() {
    let config = MemoryConfig::default().with_address_limit(64 * 1024);
    let memory = MemorySystem::create(config).unwrap();

    let err = memory.try_alloc(MemoryParam::new(1 << 20)).unwrap_err();
    assert!(matches!(err, MemoryError::OutOfMemory { .. }));
    assert_eq!(err.severity(), Severity::Critical);
    memory.try_destroy().unwrap();
}

#[test]
#[should_panic(expected = "CRITICAL")]
fn test_out_of_memory_is_critical() {
    let config = MemoryConfig::default().with_address_limit(1024);
    let memory = MemorySystem::create(config).unwrap();
    memory.alloc(MemoryParam::new(4096));
}

#[test]
fn test_request_size_overflow_is_out_of_memory() {
    let mut memory = MemorySystem::create_memory(16).unwrap();
    let heap = memory.add_heap(4096);
    let stack = memory.add_stack(4096);

    for bytes in [usize::MAX, usize::MAX - 8, usize::MAX - 100] {
        let err = memory.try_alloc(MemoryParam::new(bytes)).unwrap_err();
        assert!(matches!(err, MemoryError::OutOfMemory { .. }), "{:?}", err);
        assert_eq!(err.severity(), Severity::Critical);

        for id in [heap, stack] {
            let err = memory
                .try_alloc(MemoryParam::new(bytes).with_allocator(id))
                .unwrap_err();
            assert!(matches!(err, MemoryError::OutOfMemory { .. }), "{:?}", err);
        }
    }

    let ptr = memory.alloc(MemoryParam::new(32)).unwrap();
    memory.write_bytes(ptr, b"intact").unwrap();
    let err = memory
        .try_realloc(ptr, MemoryParam::new(usize::MAX - 8))
        .unwrap_err();
    assert!(matches!(err, MemoryError::OutOfMemory { .. }));
    assert_eq!(memory.read_bytes(ptr, 6).unwrap(), b"intact");
    assert_eq!(memory.statistics().current_allocations, 1);

    memory.free(ptr);
    memory.try_destroy().unwrap();
}

#[test]
#[should_panic(expected = "CRITICAL")]
fn test_request_size_overflow_is_critical() {
    let memory = MemorySystem::create_memory(16).unwrap();
    memory.alloc(MemoryParam::new(usize::MAX - 8));
}

#[test]
fn test_failed_stack_realloc_leaves_no_orphan() {
    let mut memory = MemorySystem::create_memory(16).unwrap();
    let stack = memory.add_stack(4096);
    let first = memory
        .alloc(MemoryParam::new(32).with_allocator(stack))
        .unwrap();
    let second = memory
        .alloc(MemoryParam::new(32).with_allocator(stack))
        .unwrap();
    memory.write_bytes(first, b"kept").unwrap();

    let err = memory
        .try_realloc(first, MemoryParam::new(100))
        .unwrap_err();
    assert!(matches!(err, MemoryError::StackOrderViolation { .. }));

    let malloc = memory.get_allocator(AllocatorId::FALLBACK).unwrap();
    assert_eq!(malloc.live_allocations(), 0);
    assert_eq!(memory.get_allocator(stack).unwrap().live_allocations(), 2);
    assert_eq!(memory.statistics().current_allocations, 2);
    assert_eq!(memory.read_bytes(first, 4).unwrap(), b"kept");

    memory.free(second);
    memory.free(first);
    memory.try_destroy().unwrap();
}

#[test]
fn test_leak_reported_at_teardown() {
    let mut memory = MemorySystem::create_memory(16).unwrap();
    memory.add_heap(4096);
    let _leaked = memory.alloc(MemoryParam::new(100)).unwrap();
    let _also = memory.alloc(MemoryParam::new(28)).unwrap();

    assert_eq!(
        memory.try_destroy(),
        Err(MemoryError::LeakDetected {
            count: 2,
            bytes: 128
        })
    );
}

#[test]
#[should_panic(expected = "CRITICAL")]
fn test_leak_is_critical() {
    let memory = MemorySystem::create_memory(16).unwrap();
    let _leaked = memory.alloc(MemoryParam::new(8)).unwrap();
    memory.destroy();
}

#[test]
fn test_live_allocations_carry_call_site() {
    let memory = MemorySystem::create_memory(16).unwrap();
    let ptr = memory.alloc(mem_param!(type [u64; 4])).unwrap();

    let live = memory.live_allocations();
    assert_eq!(live.len(), 1);
    assert_eq!(live[0].bytes, 32);
    assert_eq!(live[0].type_name, "[u64; 4]");
    assert!(live[0].file.ends_with("system_test.rs"));

    memory.free(ptr);
    memory.try_destroy().unwrap();
}

#[test]
fn test_byte_access_is_bounds_checked() {
    let memory = MemorySystem::create_memory(16).unwrap();
    let ptr = memory.alloc(MemoryParam::new(16)).unwrap();

    assert!(matches!(
        memory.write_bytes(ptr, &[0u8; 64]),
        Err(MemoryError::OutOfBounds { .. })
    ));
    memory.free(ptr);
    memory.try_destroy().unwrap();
}

#[test]
fn test_thin_headers_skip_tracking() {
    let mut memory =
        MemorySystem::<ThinHeader>::create_with_header(MemoryConfig::default()).unwrap();
    let heap = memory.add_heap(4096);

    let ptr = memory.alloc(mem_param!(100, heap)).unwrap();
    assert_eq!(ptr.offset, 16);
    assert_eq!(memory.statistics().total_allocations, 0);

    let moved = memory.realloc(ptr, MemoryParam::new(5000)).unwrap();
    assert_eq!(memory.get_allocator(heap).unwrap().live_allocations(), 0);
    memory.free(moved);
    memory.try_destroy().unwrap();
}

#[test]
fn test_invalid_alignment_rejected() {
    assert!(matches!(
        MemorySystem::create_memory(24),
        Err(MemoryError::InvalidConfig(_))
    ));
}
