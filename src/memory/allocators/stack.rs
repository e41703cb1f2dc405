/*!
 * Stack Allocator
 * LIFO bump allocation with chained arenas
 */

use crate::core::limits::LAST_PRIORITY;
use crate::core::types::{align_up, checked_align_up, Priority, RegionId, Size};
use crate::memory::space::AddressSpace;
use crate::memory::traits::Allocator;
use crate::memory::types::*;
use log::{debug, info, warn};
use parking_lot::Mutex;

#[derive(Debug, Clone, Copy)]
struct StackBlock {
    offset: Size,
    size: Size,
}

#[derive(Debug)]
struct Stack {
    region: RegionId,
    capacity: Size,
    position: Size,
    blocks: Vec<StackBlock>,
}

impl Stack {
    fn top(&self) -> Option<MemPtr> {
        self.blocks
            .last()
            .map(|block| MemPtr::new(self.region, block.offset))
    }
}

#[derive(Debug, Default)]
struct StackState {
    // Last entry is the current stack
    stacks: Vec<Stack>,
    live: usize,
    expansions: u64,
}

/// Strict LIFO allocator
///
/// Never chosen by priority dispatch; callers target it explicitly and must
/// free in exact reverse order.
pub struct StackAllocator {
    name: String,
    stack_size: Size,
    alignment: Size,
    state: Mutex<StackState>,
}

impl StackAllocator {
    pub fn new(stack_size: Size, alignment: Size) -> Self {
        let stack_size = align_up(stack_size.max(alignment), alignment);
        Self {
            name: format!("stack({})", stack_size),
            stack_size,
            alignment,
            state: Mutex::new(StackState::default()),
        }
    }

    #[inline]
    pub fn stack_size(&self) -> Size {
        self.stack_size
    }

    /// Cursor of the current stack, 0 when no stack is active
    pub fn position(&self) -> Size {
        self.state
            .lock()
            .stacks
            .last()
            .map_or(0, |stack| stack.position)
    }

    pub fn stack_count(&self) -> usize {
        self.state.lock().stacks.len()
    }

    pub fn expansions(&self) -> u64 {
        self.state.lock().expansions
    }

    fn rounded(&self, bytes: Size) -> MemoryResult<Size> {
        checked_align_up(bytes.max(1), self.alignment).ok_or_else(|| MemoryError::OutOfMemory {
            allocator: self.name.clone(),
            requested: bytes,
        })
    }

    fn push_stack(&self, state: &mut StackState, space: &AddressSpace, size: Size) -> MemoryResult<()> {
        let capacity = align_up(self.stack_size.max(size), self.alignment);
        let region = space
            .reserve(capacity)
            .ok_or_else(|| MemoryError::OutOfMemory {
                allocator: self.name.clone(),
                requested: capacity,
            })?;

        if !state.stacks.is_empty() {
            state.expansions += 1;
            info!(
                "{} expanded: stack #{} of {} bytes in region {} (expansion #{})",
                self.name,
                state.stacks.len() + 1,
                capacity,
                region,
                state.expansions
            );
        } else {
            debug!("{} opened region {}", self.name, region);
        }

        state.stacks.push(Stack {
            region,
            capacity,
            position: 0,
            blocks: Vec::new(),
        });
        Ok(())
    }
}

impl Allocator for StackAllocator {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> AllocatorKind {
        AllocatorKind::Stack
    }

    fn priority(&self) -> Priority {
        LAST_PRIORITY
    }

    fn should_allocate(&self, _param: &MemoryParam, _total: Size) -> bool {
        false
    }

    fn alloc(&self, space: &AddressSpace, bytes: Size) -> MemoryResult<Allocation> {
        let size = self.rounded(bytes)?;
        let mut state = self.state.lock();

        let fits = state
            .stacks
            .last()
            .map_or(false, |stack| stack.capacity - stack.position >= size);
        if !fits {
            self.push_stack(&mut state, space, size)?;
        }

        let stack = state
            .stacks
            .last_mut()
            .ok_or_else(|| MemoryError::OutOfMemory {
                allocator: self.name.clone(),
                requested: size,
            })?;
        let offset = stack.position;
        stack.blocks.push(StackBlock { offset, size });
        stack.position += size;
        let ptr = MemPtr::new(stack.region, offset);
        state.live += 1;

        Ok(Allocation {
            ptr,
            private: size as u64,
        })
    }

    fn free(&self, space: &AddressSpace, ptr: MemPtr, _private: u64) -> MemoryResult<()> {
        let mut state = self.state.lock();

        let stack = state
            .stacks
            .last_mut()
            .ok_or(MemoryError::StackOrderViolation {
                expected: 0,
                found: ptr.address(),
            })?;
        let expected = stack.top().map_or(0, MemPtr::address);
        if stack.top() != Some(ptr) {
            warn!(
                "{} out-of-order free: expected 0x{:x}, got {}",
                self.name, expected, ptr
            );
            return Err(MemoryError::StackOrderViolation {
                expected,
                found: ptr.address(),
            });
        }

        if let Some(block) = stack.blocks.pop() {
            stack.position = block.offset;
        }
        if stack.blocks.is_empty() {
            let region = stack.region;
            state.stacks.pop();
            space.release(region);
            debug!("{} unwound region {}", self.name, region);
        }

        state.live -= 1;
        Ok(())
    }

    fn usable_size(&self, private: u64) -> Size {
        private as Size
    }

    /// Grows or shrinks the top block in place; anything else is refused
    fn realloc(
        &self,
        _space: &AddressSpace,
        ptr: MemPtr,
        _private: u64,
        new_bytes: Size,
    ) -> MemoryResult<Allocation> {
        let size = self.rounded(new_bytes)?;
        let mut state = self.state.lock();

        let stack = state
            .stacks
            .last_mut()
            .filter(|stack| stack.top() == Some(ptr))
            .ok_or_else(|| MemoryError::ReallocUnsupported {
                allocator: self.name.clone(),
                reason: "only the most recent allocation can be resized",
            })?;
        let capacity = stack.capacity;
        let block = stack
            .blocks
            .last_mut()
            .ok_or(MemoryError::InvalidAddress(ptr.address()))?;
        if block.offset + size > capacity {
            return Err(MemoryError::ReallocUnsupported {
                allocator: self.name.clone(),
                reason: "resized block would overrun the stack arena",
            });
        }

        block.size = size;
        stack.position = block.offset + size;
        Ok(Allocation {
            ptr,
            private: size as u64,
        })
    }

    fn release(&self, space: &AddressSpace) -> MemoryResult<()> {
        let mut state = self.state.lock();
        let live = state.live;

        for stack in state.stacks.drain(..) {
            space.release(stack.region);
        }
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
            kind: AllocatorKind::Stack,
            priority: LAST_PRIORITY,
            arenas: state.stacks.len(),
            reserved_bytes: state.stacks.iter().map(|s| s.capacity).sum(),
            live_allocations: state.live,
            expansions: state.expansions,
            free_blocks: 0,
        }
    }
}
