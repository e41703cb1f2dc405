/*!
 * Allocators
 * Concrete allocation strategies behind the `Allocator` trait
 */

mod heap;
mod malloc;
mod pool;
mod stack;

pub use heap::{FreeRange, HeapAllocator};
pub use malloc::MallocAllocator;
pub use pool::PoolAllocator;
pub use stack::StackAllocator;
