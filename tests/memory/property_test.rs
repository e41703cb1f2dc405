/*!
 * Property Tests
 * Allocator invariants under randomized request sizes and free orders
 */

use engine_memory::memory::{AddressSpace, HeapAllocator};
use engine_memory::{Allocator, MemoryParam, MemorySystem};
use proptest::prelude::*;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

fn system() -> MemorySystem {
    let mut memory = MemorySystem::create_memory(16).unwrap();
    memory.add_pool(64, 32);
    memory.add_pool(256, 32);
    memory.add_heap(64 * 1024);
    memory
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_alloc_free_keeps_other_headers_valid(
        sizes in prop::collection::vec(1usize..40_000, 1..48),
        seed in any::<u64>(),
    ) {
        let memory = system();
        let mut live: Vec<_> = sizes
            .iter()
            .enumerate()
            .map(|(i, &bytes)| {
                let ptr = memory.alloc(MemoryParam::new(bytes)).unwrap();
                memory.write_bytes(ptr, &[i as u8; 1]).unwrap();
                (ptr, i as u8)
            })
            .collect();

        live.shuffle(&mut StdRng::seed_from_u64(seed));
        while let Some((ptr, tag)) = live.pop() {
            prop_assert_eq!(memory.read_bytes(ptr, 1).unwrap(), vec![tag]);
            prop_assert!(memory.try_free(ptr).is_ok());
        }

        let stats = memory.statistics();
        prop_assert_eq!(stats.current_allocations, 0);
        prop_assert_eq!(stats.total_allocations, sizes.len() as u64);
        prop_assert!(memory.try_destroy().is_ok());
    }

    #[test]
    fn prop_heap_free_list_restores_capacity(
        sizes in prop::collection::vec(1usize..2048, 1..32),
        seed in any::<u64>(),
    ) {
        let space = AddressSpace::new();
        let heap = HeapAllocator::new(128 * 1024, 16);

        let mut blocks: Vec<_> = sizes
            .iter()
            .map(|&bytes| heap.alloc(&space, bytes).unwrap())
            .collect();
        blocks.shuffle(&mut StdRng::seed_from_u64(seed));
        for block in &blocks {
            prop_assert!(heap.free(&space, block.ptr, block.private).is_ok());
        }

        // One-direction merging may leave fragments, but never overlaps or loses bytes
        let mut ranges = heap.free_blocks();
        ranges.sort_by_key(|range| range.offset);
        let total: usize = ranges.iter().map(|range| range.size).sum();
        prop_assert_eq!(total, 128 * 1024);
        for pair in ranges.windows(2) {
            prop_assert!(pair[0].offset + pair[0].size <= pair[1].offset);
        }

        let whole = heap.alloc(&space, 1).unwrap();
        prop_assert_eq!(heap.heap_count(), 1);
        prop_assert!(heap.free(&space, whole.ptr, whole.private).is_ok());
    }
}
