/*!
 * Memory Module
 * Pluggable allocators, allocation headers and leak tracking
 */

pub mod allocators;
pub mod config;
pub mod header;
pub mod space;
pub mod system;
pub mod tracker;
pub mod traits;
pub mod types;

// Re-export for convenience
pub use allocators::{FreeRange, HeapAllocator, MallocAllocator, PoolAllocator, StackAllocator};
pub use config::{MemoryConfig, PoolConfig};
pub use header::{AllocHeader, DefaultHeader, ThinHeader, TrackedHeader};
pub use space::AddressSpace;
pub use system::MemorySystem;
pub use tracker::{LiveAllocation, MemoryStatistics, MemoryTracker};
pub use traits::*;
pub use types::*;

/// Build a [`MemoryParam`] tagged with the call site
///
/// ```
/// use engine_memory::mem_param;
/// use engine_memory::AllocatorId;
///
/// let bytes = mem_param!(64);
/// let pinned = mem_param!(64, AllocatorId(2));
/// let typed = mem_param!(type u64);
/// assert_eq!(typed.bytes, 8);
/// assert_eq!(pinned.allocator, Some(AllocatorId(2)));
/// assert_eq!(bytes.line, line!() - 5);
/// ```
#[macro_export]
macro_rules! mem_param {
    (type $ty:ty) => {
        $crate::memory::MemoryParam::of::<$ty>()
    };
    (type $ty:ty, $allocator:expr) => {
        $crate::memory::MemoryParam::of::<$ty>().with_allocator($allocator)
    };
    ($bytes:expr) => {
        $crate::memory::MemoryParam::new($bytes)
    };
    ($bytes:expr, $allocator:expr) => {
        $crate::memory::MemoryParam::new($bytes).with_allocator($allocator)
    };
}
