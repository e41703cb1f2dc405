/*!
 * Engine Memory Library
 * Pluggable allocator subsystem with allocation tracking
 */

pub mod core;
pub mod memory;
pub mod monitoring;

// Re-exports
pub use crate::core::{AllocatorId, AssertHandler, AssertReport, RegionId, Severity};
pub use memory::{
    AllocHeader, Allocator, AllocatorKind, AllocatorStats, HeapAllocator, MallocAllocator,
    MemPtr, MemoryConfig, MemoryError, MemoryParam, MemoryResult, MemoryStatistics,
    MemorySystem, PoolAllocator, StackAllocator,
};
pub use monitoring::{init_tracing, init_tracing_with};
