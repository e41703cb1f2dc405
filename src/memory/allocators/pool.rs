/*!
 * Pool Allocator
 * Fixed block-size slab allocator that grows in groups
 */

use crate::core::limits::{POOL_BASE_PRIORITY, POOL_GROUP_SIZE};
use crate::core::types::{align_up, Priority, RegionId, Size};
use crate::memory::space::AddressSpace;
use crate::memory::traits::Allocator;
use crate::memory::types::*;
use log::{debug, info, warn};
use parking_lot::Mutex;

/// Handle to one pool slot, packed into the header's private word
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct PoolHandle {
    group: u32,
    slot: u32,
}

impl PoolHandle {
    #[inline]
    fn pack(self) -> u64 {
        ((self.group as u64) << 32) | self.slot as u64
    }

    #[inline]
    fn unpack(private: u64) -> Self {
        Self {
            group: (private >> 32) as u32,
            slot: private as u32,
        }
    }
}

/// Batch of slots reserved together as one region
#[derive(Debug)]
struct PoolGroup {
    region: RegionId,
    in_use: Vec<bool>,
}

#[derive(Debug, Default)]
struct PoolState {
    groups: Vec<PoolGroup>,
    // LIFO free list: alloc pops the most recently freed slot
    free: Vec<PoolHandle>,
    live: usize,
    expansions: u64,
}

/// Fixed block-size allocator
///
/// # Performance
/// - Alloc/free: O(1) pop/push on the free list under the allocator lock
/// - Growth: one region of `GROUP_SIZE` blocks, reserved while the lock is held
pub struct PoolAllocator {
    name: String,
    block_size: Size,
    initial_count: Size,
    group_size: Size,
    state: Mutex<PoolState>,
}

impl PoolAllocator {
    /// Pool of `block_size` blocks; the first group holds `initial_count` of them
    pub fn new(block_size: Size, initial_count: Size, alignment: Size) -> Self {
        let block_size = align_up(block_size.max(1), alignment);
        Self {
            name: format!("pool({})", block_size),
            block_size,
            initial_count: initial_count.max(1),
            group_size: POOL_GROUP_SIZE,
            state: Mutex::new(PoolState::default()),
        }
    }

    /// Override the number of blocks added per expansion
    pub fn with_group_size(mut self, group_size: Size) -> Self {
        self.group_size = group_size.max(1);
        self
    }

    #[inline]
    pub fn block_size(&self) -> Size {
        self.block_size
    }

    pub fn expansions(&self) -> u64 {
        self.state.lock().expansions
    }

    pub fn free_count(&self) -> usize {
        self.state.lock().free.len()
    }

    /// Total slots across all groups
    pub fn capacity(&self) -> usize {
        self.state.lock().groups.iter().map(|g| g.in_use.len()).sum()
    }

    fn grow(&self, state: &mut PoolState, space: &AddressSpace) -> MemoryResult<()> {
        let first = state.groups.is_empty();
        let slots = if first {
            self.initial_count
        } else {
            self.group_size
        };

        let region = space
            .reserve(slots * self.block_size)
            .ok_or_else(|| MemoryError::OutOfMemory {
                allocator: self.name.clone(),
                requested: slots * self.block_size,
            })?;

        let group = state.groups.len() as u32;
        state.groups.push(PoolGroup {
            region,
            in_use: vec![false; slots],
        });
        // Reverse so the lowest slot is popped first
        state.free.extend(
            (0..slots as u32)
                .rev()
                .map(|slot| PoolHandle { group, slot }),
        );

        if first {
            debug!(
                "{} initialized with {} blocks in region {}",
                self.name, slots, region
            );
        } else {
            state.expansions += 1;
            info!(
                "{} expanded: group {} adds {} blocks ({} live, expansion #{})",
                self.name, group, slots, state.live, state.expansions
            );
        }
        Ok(())
    }
}

impl Allocator for PoolAllocator {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> AllocatorKind {
        AllocatorKind::Pool
    }

    /// Smaller blocks are preferred over larger ones
    fn priority(&self) -> Priority {
        (POOL_BASE_PRIORITY as usize + self.block_size / 8).min(254) as Priority
    }

    fn should_allocate(&self, _param: &MemoryParam, total: Size) -> bool {
        total < self.block_size
    }

    fn alloc(&self, space: &AddressSpace, bytes: Size) -> MemoryResult<Allocation> {
        if bytes > self.block_size {
            return Err(MemoryError::RequestTooLarge {
                allocator: self.name.clone(),
                requested: bytes,
                limit: self.block_size,
            });
        }

        let mut state = self.state.lock();
        if state.free.is_empty() {
            self.grow(&mut state, space)?;
        }

        let handle = state.free.pop().ok_or_else(|| MemoryError::OutOfMemory {
            allocator: self.name.clone(),
            requested: bytes,
        })?;
        let group = &mut state.groups[handle.group as usize];
        group.in_use[handle.slot as usize] = true;
        let ptr = MemPtr::new(group.region, handle.slot as usize * self.block_size);
        state.live += 1;

        Ok(Allocation {
            ptr,
            private: handle.pack(),
        })
    }

    fn free(&self, _space: &AddressSpace, ptr: MemPtr, private: u64) -> MemoryResult<()> {
        let handle = PoolHandle::unpack(private);
        let mut state = self.state.lock();

        let group = state
            .groups
            .get_mut(handle.group as usize)
            .ok_or(MemoryError::InvalidAddress(ptr.address()))?;
        let expected = MemPtr::new(group.region, handle.slot as usize * self.block_size);
        if expected != ptr {
            warn!(
                "{} free of {} does not match pool slot {:?}",
                self.name, ptr, handle
            );
            return Err(MemoryError::InvalidAddress(ptr.address()));
        }

        let in_use = group
            .in_use
            .get_mut(handle.slot as usize)
            .ok_or(MemoryError::InvalidAddress(ptr.address()))?;
        if !*in_use {
            warn!("{} double free of {}", self.name, ptr);
            return Err(MemoryError::InvalidAddress(ptr.address()));
        }
        *in_use = false;

        state.free.push(handle);
        state.live -= 1;
        Ok(())
    }

    fn usable_size(&self, _private: u64) -> Size {
        self.block_size
    }

    fn release(&self, space: &AddressSpace) -> MemoryResult<()> {
        let mut state = self.state.lock();
        let live = state.live;

        for group in state.groups.drain(..) {
            space.release(group.region);
        }
        let expansions = state.expansions;
        *state = PoolState {
            expansions,
            ..PoolState::default()
        };

        if live > 0 {
            return Err(MemoryError::LiveAllocations {
                allocator: self.name.clone(),
                count: live,
            });
        }
        debug!("{} released", self.name);
        Ok(())
    }

    fn live_allocations(&self) -> usize {
        self.state.lock().live
    }

    fn stats(&self) -> AllocatorStats {
        let state = self.state.lock();
        let slots: usize = state.groups.iter().map(|g| g.in_use.len()).sum();
        AllocatorStats {
            name: self.name.clone(),
            kind: AllocatorKind::Pool,
            priority: self.priority(),
            arenas: state.groups.len(),
            reserved_bytes: slots * self.block_size,
            live_allocations: state.live,
            expansions: state.expansions,
            free_blocks: state.free.len(),
        }
    }
}
