/*!
 * Memory System Demo - Main Entry Point
 *
 * Brings up a memory system, runs a burst of allocations through the default
 * allocators and a stack, then tears everything down with a leak check.
 */

use std::error::Error;
use tracing::info;

use engine_memory::{
    init_tracing_with, mem_param, MemoryConfig, MemoryParam, MemorySystem,
};

const BURST: usize = 5000;

fn main() -> Result<(), Box<dyn Error>> {
    let config = MemoryConfig::from_env()?;
    init_tracing_with(&config.log_level);

    info!("Memory system starting...");
    info!("================================================");

    let mut memory = MemorySystem::create(config.clone())?;
    let pool = memory.add_pool(64, 4096);
    let heap = memory.add_heap(config.heap_size);
    let stack = memory.add_stack(config.stack_size);
    info!(
        allocators = memory.allocator_count(),
        header_size = memory.header_size(),
        pool = %pool,
        heap = %heap,
        stack = %stack,
        "allocators registered"
    );

    // Burst of small allocations, freed in reverse
    let mut live = Vec::with_capacity(BURST);
    for i in 0..BURST {
        if let Some(ptr) = memory.alloc(MemoryParam::new(64)) {
            memory.write_bytes(ptr, &(i as u64).to_le_bytes())?;
            live.push(ptr);
        }
    }
    info!(live = live.len(), "burst allocated");
    memory.log_statistics();
    while let Some(ptr) = live.pop() {
        memory.free(ptr);
    }

    // Scratch frames on the stack, unwound in order
    let frames: Vec<_> = (1..=4)
        .filter_map(|depth| memory.alloc(mem_param!(depth * 1024, stack)))
        .collect();
    for ptr in frames.into_iter().rev() {
        memory.free(ptr);
    }

    let stats = memory.statistics();
    info!("Final statistics:\n{}", stats.to_json()?);

    memory.destroy();
    info!("Memory system shut down cleanly");
    Ok(())
}
