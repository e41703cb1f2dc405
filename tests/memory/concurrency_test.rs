/*!
 * Concurrency Tests
 * Shared memory system hammered from several threads
 */

use engine_memory::{MemoryConfig, MemoryParam, MemorySystem};
use pretty_assertions::assert_eq;
use std::sync::Arc;
use std::thread;

const THREADS: usize = 8;
const ROUNDS: usize = 500;

#[test]
fn test_concurrent_alloc_free_is_balanced() {
    let memory = Arc::new(
        MemorySystem::with_default_allocators(MemoryConfig::default().with_heap_size(256 * 1024))
            .unwrap(),
    );

    let handles: Vec<_> = (0..THREADS)
        .map(|t| {
            let memory = Arc::clone(&memory);
            thread::spawn(move || {
                let mut held = Vec::new();
                for round in 0..ROUNDS {
                    let bytes = 1 + (t * 131 + round * 17) % 3000;
                    let ptr = memory.alloc(MemoryParam::new(bytes)).unwrap();
                    memory.write_bytes(ptr, &[t as u8]).unwrap();
                    held.push(ptr);

                    if round % 3 == 2 {
                        for ptr in held.drain(..) {
                            assert_eq!(memory.read_bytes(ptr, 1).unwrap(), vec![t as u8]);
                            memory.free(ptr);
                        }
                    }
                }
                for ptr in held {
                    memory.free(ptr);
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }

    let stats = memory.statistics();
    assert_eq!(stats.current_allocations, 0);
    assert_eq!(stats.total_allocations, (THREADS * ROUNDS) as u64);

    let memory = Arc::try_unwrap(memory).ok().unwrap();
    memory.try_destroy().unwrap();
}

#[test]
fn test_per_thread_stacks_unwind_independently() {
    let mut memory = MemorySystem::create_memory(16).unwrap();
    let stacks: Vec<_> = (0..4).map(|_| memory.add_stack(16 * 1024)).collect();
    let memory = Arc::new(memory);

    thread::scope(|scope| {
        for &stack in &stacks {
            let memory = &memory;
            scope.spawn(move || {
                for _ in 0..50 {
                    let frames: Vec<_> = (1..=8)
                        .map(|depth| {
                            memory
                                .alloc(MemoryParam::new(depth * 64).with_allocator(stack))
                                .unwrap()
                        })
                        .collect();
                    for ptr in frames.into_iter().rev() {
                        memory.free(ptr);
                    }
                }
            });
        }
    });

    for stack in stacks {
        assert_eq!(memory.get_allocator(stack).unwrap().live_allocations(), 0);
    }
    let memory = Arc::try_unwrap(memory).ok().unwrap();
    memory.try_destroy().unwrap();
}
