/*!
 * Malloc Allocator
 * Fallback allocator backed directly by address-space regions
 */

use crate::core::limits::{LAST_PRIORITY, MIN_MALLOC_ALIGNMENT};
use crate::core::types::{checked_align_up, Priority, RegionId, Size};
use crate::memory::space::AddressSpace;
use crate::memory::traits::Allocator;
use crate::memory::types::*;
use ahash::RandomState;
use log::{trace, warn};
use parking_lot::Mutex;
use std::collections::HashMap;

/// One region per allocation; accepts every request
pub struct MallocAllocator {
    alignment: Size,
    live: Mutex<HashMap<RegionId, Size, RandomState>>,
}

impl MallocAllocator {
    pub fn new(alignment: Size) -> Self {
        Self {
            alignment: alignment.max(MIN_MALLOC_ALIGNMENT),
            live: Mutex::new(HashMap::with_hasher(RandomState::new())),
        }
    }

    #[inline]
    pub fn alignment(&self) -> Size {
        self.alignment
    }

    fn rounded(&self, bytes: Size) -> MemoryResult<Size> {
        checked_align_up(bytes.max(1), self.alignment).ok_or_else(|| MemoryError::OutOfMemory {
            allocator: self.name().to_string(),
            requested: bytes,
        })
    }
}

impl Allocator for MallocAllocator {
    fn name(&self) -> &str {
        "malloc"
    }

    fn kind(&self) -> AllocatorKind {
        AllocatorKind::Malloc
    }

    fn priority(&self) -> Priority {
        LAST_PRIORITY
    }

    fn should_allocate(&self, _param: &MemoryParam, _total: Size) -> bool {
        true
    }

    fn alloc(&self, space: &AddressSpace, bytes: Size) -> MemoryResult<Allocation> {
        let size = self.rounded(bytes)?;
        let region = space.reserve(size).ok_or_else(|| MemoryError::OutOfMemory {
            allocator: self.name().to_string(),
            requested: size,
        })?;
        self.live.lock().insert(region, size);
        trace!("malloc: {} bytes in region {}", size, region);

        Ok(Allocation {
            ptr: MemPtr::new(region, 0),
            private: size as u64,
        })
    }

    fn free(&self, space: &AddressSpace, ptr: MemPtr, _private: u64) -> MemoryResult<()> {
        if ptr.offset != 0 || self.live.lock().remove(&ptr.region).is_none() {
            warn!("malloc: free of unknown block {}", ptr);
            return Err(MemoryError::InvalidAddress(ptr.address()));
        }
        space.release(ptr.region);
        Ok(())
    }

    fn usable_size(&self, private: u64) -> Size {
        private as Size
    }

    /// Resizes the backing region in place; the pointer never moves
    fn realloc(
        &self,
        space: &AddressSpace,
        ptr: MemPtr,
        _private: u64,
        new_bytes: Size,
    ) -> MemoryResult<Allocation> {
        let size = self.rounded(new_bytes)?;
        let mut live = self.live.lock();
        let entry = live
            .get_mut(&ptr.region)
            .filter(|_| ptr.offset == 0)
            .ok_or(MemoryError::InvalidAddress(ptr.address()))?;

        space.resize(ptr.region, size)?;
        *entry = size;
        Ok(Allocation {
            ptr,
            private: size as u64,
        })
    }

    fn release(&self, space: &AddressSpace) -> MemoryResult<()> {
        let mut live = self.live.lock();
        let count = live.len();
        for (region, _) in live.drain() {
            space.release(region);
        }

        if count > 0 {
            return Err(MemoryError::LiveAllocations {
                allocator: self.name().to_string(),
                count,
            });
        }
        Ok(())
    }

    fn live_allocations(&self) -> usize {
        self.live.lock().len()
    }

    fn stats(&self) -> AllocatorStats {
        let live = self.live.lock();
        AllocatorStats {
            name: self.name().to_string(),
            kind: AllocatorKind::Malloc,
            priority: LAST_PRIORITY,
            arenas: live.len(),
            reserved_bytes: live.values().sum(),
            live_allocations: live.len(),
            expansions: 0,
            free_blocks: 0,
        }
    }
}
