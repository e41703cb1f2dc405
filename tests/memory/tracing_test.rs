/*!
 * Tracing Tests
 * Subscriber installation and log output from a full allocation cycle
 */

use engine_memory::monitoring::span_operation;
use engine_memory::{init_tracing_with, MemoryConfig, MemoryParam, MemorySystem};
use serial_test::serial;

#[test]
#[serial]
fn test_init_tracing_is_idempotent() {
    init_tracing_with("debug");
    init_tracing_with("trace");
}

#[test]
#[serial]
fn test_expansion_logging_under_subscriber() {
    init_tracing_with("debug");

    let config = MemoryConfig::default().with_pools(vec![]);
    let mut memory = MemorySystem::create(config).unwrap();
    let pool = memory.add_pool(64, 2);

    let ptrs: Vec<_> = (0..5)
        .map(|_| memory.alloc(MemoryParam::new(8)).unwrap())
        .collect();
    let stats = memory.get_allocator(pool).unwrap().stats();
    assert_eq!(stats.live_allocations, 5);
    assert_eq!(stats.expansions, 1);
    let span = span_operation("test.burst");
    span.record_items_processed(ptrs.len());
    for ptr in ptrs {
        memory.free(ptr);
    }
    drop(span);

    memory.log_statistics();
    assert_eq!(memory.get_allocator(pool).unwrap().live_allocations(), 0);
    memory.try_destroy().unwrap();
}
