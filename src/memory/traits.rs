/*!
 * Memory Traits
 * Allocator strategy abstraction
 */

use super::space::AddressSpace;
use super::types::*;
use crate::core::types::{Priority, Size};

/// Memory allocator interface
///
/// Sizes passed in are totals: the facade has already added the header.
/// Allocators grow their own backing storage, so a failed `alloc` means the
/// address space itself refused to grow.
pub trait Allocator: Send + Sync {
    /// Human-readable name for logs and stats
    fn name(&self) -> &str;

    fn kind(&self) -> AllocatorKind;

    /// Selection order, ascending
    fn priority(&self) -> Priority;

    /// Acceptance predicate used by priority dispatch
    fn should_allocate(&self, param: &MemoryParam, total: Size) -> bool;

    /// Allocate `bytes` of raw memory
    fn alloc(&self, space: &AddressSpace, bytes: Size) -> MemoryResult<Allocation>;

    /// Return a block previously produced by `alloc`
    fn free(&self, space: &AddressSpace, ptr: MemPtr, private: u64) -> MemoryResult<()>;

    /// Bytes usable at `ptr` for a block carrying `private`
    fn usable_size(&self, private: u64) -> Size;

    /// Resize a block, moving it if needed
    ///
    /// Default: allocate, copy the overlapping prefix, free the original.
    fn realloc(
        &self,
        space: &AddressSpace,
        ptr: MemPtr,
        private: u64,
        new_bytes: Size,
    ) -> MemoryResult<Allocation> {
        let fresh = self.alloc(space, new_bytes)?;
        let keep = self.usable_size(private).min(new_bytes);
        space.copy(ptr, fresh.ptr, keep)?;
        self.free(space, ptr, private)?;
        Ok(fresh)
    }

    /// Tear down all backing memory
    ///
    /// Releases everything even when allocations are still live, then reports
    /// them as [`MemoryError::LiveAllocations`].
    fn release(&self, space: &AddressSpace) -> MemoryResult<()>;

    /// Blocks handed out and not yet freed
    fn live_allocations(&self) -> usize;

    fn stats(&self) -> AllocatorStats;
}
