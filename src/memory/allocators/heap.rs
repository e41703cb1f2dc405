/*!
 * Heap Allocator
 *
 * Variable-size allocation out of large arenas with a per-arena free list.
 *
 * ## Strategy
 * - Best-fit across every heap: the block with the smallest excess wins and an
 *   exact fit stops the search
 * - Exact fits unlink the block; larger blocks are carved from their front
 * - Frees merge with the first free block found directly before or after the
 *   range, one direction per call, and otherwise push a new block
 */

use crate::core::data_structures::{SlotArena, SlotKey};
use crate::core::limits::{HEAP_ACCEPT_DIVISOR, HEAP_PRIORITY};
use crate::core::types::{align_up, checked_align_up, Priority, RegionId, Size};
use crate::memory::space::AddressSpace;
use crate::memory::traits::Allocator;
use crate::memory::types::*;
use log::{debug, info, warn};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// Free range inside one heap
#[derive(Debug, Clone, Copy)]
struct FreeBlock {
    offset: Size,
    size: Size,
    next: Option<SlotKey>,
}

#[derive(Debug)]
struct Heap {
    region: RegionId,
    capacity: Size,
    free_head: Option<SlotKey>,
    live: usize,
}

#[derive(Debug, Default)]
struct HeapState {
    heaps: Vec<Heap>,
    blocks: SlotArena<FreeBlock>,
    live: usize,
    expansions: u64,
}

/// Best-fit candidate found during a scan
struct Fit {
    heap: usize,
    key: SlotKey,
    prev: Option<SlotKey>,
    excess: Size,
}

/// Public view of one free block
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FreeRange {
    pub region: RegionId,
    pub offset: Size,
    pub size: Size,
}

pub struct HeapAllocator {
    name: String,
    heap_size: Size,
    alignment: Size,
    state: Mutex<HeapState>,
}

impl HeapAllocator {
    pub fn new(heap_size: Size, alignment: Size) -> Self {
        let heap_size = align_up(heap_size.max(alignment), alignment);
        Self {
            name: format!("heap({})", heap_size),
            heap_size,
            alignment,
            state: Mutex::new(HeapState::default()),
        }
    }

    #[inline]
    pub fn heap_size(&self) -> Size {
        self.heap_size
    }

    pub fn heap_count(&self) -> usize {
        self.state.lock().heaps.len()
    }

    pub fn expansions(&self) -> u64 {
        self.state.lock().expansions
    }

    /// Free ranges of every heap, in list order
    pub fn free_blocks(&self) -> Vec<FreeRange> {
        let state = self.state.lock();
        let mut out = Vec::with_capacity(state.blocks.len());
        for heap in &state.heaps {
            let mut cursor = heap.free_head;
            while let Some(key) = cursor {
                let Some(block) = state.blocks.get(key) else {
                    break;
                };
                out.push(FreeRange {
                    region: heap.region,
                    offset: block.offset,
                    size: block.size,
                });
                cursor = block.next;
            }
        }
        out
    }

    fn best_fit(state: &HeapState, size: Size) -> Option<Fit> {
        let mut best: Option<Fit> = None;

        for (index, heap) in state.heaps.iter().enumerate() {
            let mut prev = None;
            let mut cursor = heap.free_head;
            while let Some(key) = cursor {
                let block = state.blocks.get(key)?;
                if block.size >= size {
                    let excess = block.size - size;
                    if best.as_ref().map_or(true, |fit| excess < fit.excess) {
                        best = Some(Fit {
                            heap: index,
                            key,
                            prev,
                            excess,
                        });
                        if excess == 0 {
                            return best;
                        }
                    }
                }
                prev = Some(key);
                cursor = block.next;
            }
        }

        best
    }

    fn add_heap(&self, state: &mut HeapState, space: &AddressSpace, size: Size) -> MemoryResult<()> {
        let capacity = align_up(self.heap_size.max(size), self.alignment);
        let region = space
            .reserve(capacity)
            .ok_or_else(|| MemoryError::OutOfMemory {
                allocator: self.name.clone(),
                requested: capacity,
            })?;

        let head = state.blocks.insert(FreeBlock {
            offset: 0,
            size: capacity,
            next: None,
        });
        state.heaps.push(Heap {
            region,
            capacity,
            free_head: Some(head),
            live: 0,
        });

        if state.heaps.len() == 1 {
            debug!("{} initialized in region {}", self.name, region);
        } else {
            state.expansions += 1;
            info!(
                "{} expanded: heap #{} of {} bytes in region {} (expansion #{})",
                self.name,
                state.heaps.len(),
                capacity,
                region,
                state.expansions
            );
        }
        Ok(())
    }
}

impl Allocator for HeapAllocator {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> AllocatorKind {
        AllocatorKind::Heap
    }

    fn priority(&self) -> Priority {
        HEAP_PRIORITY
    }

    fn should_allocate(&self, _param: &MemoryParam, total: Size) -> bool {
        total < self.heap_size / HEAP_ACCEPT_DIVISOR
    }

    fn alloc(&self, space: &AddressSpace, bytes: Size) -> MemoryResult<Allocation> {
        let size = checked_align_up(bytes.max(1), self.alignment).ok_or_else(|| {
            MemoryError::OutOfMemory {
                allocator: self.name.clone(),
                requested: bytes,
            }
        })?;
        let mut state = self.state.lock();

        let fit = match Self::best_fit(&state, size) {
            Some(fit) => fit,
            None => {
                self.add_heap(&mut state, space, size)?;
                Self::best_fit(&state, size).ok_or_else(|| MemoryError::OutOfMemory {
                    allocator: self.name.clone(),
                    requested: size,
                })?
            }
        };

        let state = &mut *state;
        let heap = &mut state.heaps[fit.heap];
        let block = state
            .blocks
            .get_mut(fit.key)
            .ok_or(MemoryError::InvalidAddress(MemPtr::new(heap.region, 0).address()))?;
        let offset = block.offset;

        if fit.excess == 0 {
            let next = block.next;
            match fit.prev.and_then(|prev| state.blocks.get_mut(prev)) {
                Some(prev) => prev.next = next,
                None => heap.free_head = next,
            }
            state.blocks.remove(fit.key);
        } else {
            block.offset += size;
            block.size -= size;
        }

        heap.live += 1;
        state.live += 1;

        Ok(Allocation {
            ptr: MemPtr::new(heap.region, offset),
            private: size as u64,
        })
    }

    fn free(&self, _space: &AddressSpace, ptr: MemPtr, private: u64) -> MemoryResult<()> {
        let size = private as Size;
        let offset = ptr.offset;
        let end = offset + size;
        let mut state = self.state.lock();
        let state = &mut *state;

        let heap = state
            .heaps
            .iter_mut()
            .find(|heap| heap.region == ptr.region)
            .ok_or(MemoryError::HeapNotFound {
                region: ptr.region,
                address: ptr.address(),
            })?;
        if end > heap.capacity || heap.live == 0 {
            return Err(MemoryError::InvalidAddress(ptr.address()));
        }

        let mut merge_into = None;
        let mut cursor = heap.free_head;
        while let Some(key) = cursor {
            let Some(block) = state.blocks.get(key) else {
                break;
            };
            let block_end = block.offset + block.size;
            if offset < block_end && block.offset < end {
                warn!("{} free of {} overlaps a free block", self.name, ptr);
                return Err(MemoryError::InvalidAddress(ptr.address()));
            }
            if merge_into.is_none() && (block_end == offset || end == block.offset) {
                merge_into = Some(key);
            }
            cursor = block.next;
        }

        match merge_into.and_then(|key| state.blocks.get_mut(key)) {
            Some(block) => {
                if block.offset + block.size == offset {
                    block.size += size;
                } else {
                    block.offset = offset;
                    block.size += size;
                }
            }
            None => {
                let key = state.blocks.insert(FreeBlock {
                    offset,
                    size,
                    next: heap.free_head,
                });
                heap.free_head = Some(key);
            }
        }

        heap.live -= 1;
        state.live -= 1;
        Ok(())
    }

    fn usable_size(&self, private: u64) -> Size {
        private as Size
    }

    fn release(&self, space: &AddressSpace) -> MemoryResult<()> {
        let mut state = self.state.lock();
        let live = state.live;

        for heap in state.heaps.drain(..) {
            if heap.live > 0 {
                warn!(
                    "{} releasing region {} with {} live blocks",
                    self.name, heap.region, heap.live
                );
            }
            space.release(heap.region);
        }
        state.blocks.clear();
        state.live = 0;

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
        AllocatorStats {
            name: self.name.clone(),
            kind: AllocatorKind::Heap,
            priority: HEAP_PRIORITY,
            arenas: state.heaps.len(),
            reserved_bytes: state.heaps.iter().map(|h| h.capacity).sum(),
            live_allocations: state.live,
            expansions: state.expansions,
            free_blocks: state.blocks.len(),
        }
    }
}
