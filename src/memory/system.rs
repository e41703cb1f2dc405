/*!
 * Memory System
 *
 * Facade over every registered allocator, the address space and the tracker.
 *
 * ## Dispatch
 *
 * Allocators are kept sorted by ascending priority. A request goes to its
 * explicit override when one is set, otherwise to the first allocator whose
 * acceptance predicate takes `header_size + bytes`. Malloc is registered first
 * (id 0), always accepts and always sorts last, so it is both the last resort
 * and the fallback.
 *
 * ## Failure handling
 *
 * `alloc`/`free`/`realloc` route failures through the installed
 * [`AssertHandler`]: critical failures panic after the hook, the rest log and
 * degrade to `None`. The `try_*` variants return the error instead.
 */

use super::allocators::{HeapAllocator, MallocAllocator, PoolAllocator, StackAllocator};
use super::config::MemoryConfig;
use super::header::{
    header_ptr, header_size, read_header, user_ptr, write_header, AllocHeader, DefaultHeader,
};
use super::space::AddressSpace;
use super::tracker::{LiveAllocation, MemoryStatistics, MemoryTracker};
use super::traits::Allocator;
use super::types::*;
use crate::core::assert::AssertHandler;
use crate::core::types::{AllocatorId, Size};
use crate::monitoring::span_operation;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Memory management context
///
/// Created once by the application entry point and shared by reference or
/// `Arc`. Allocator registration needs `&mut self` and therefore happens
/// before the system is shared.
pub struct MemorySystem<H: AllocHeader = DefaultHeader> {
    space: AddressSpace,
    allocators: Vec<Arc<dyn Allocator>>,
    // Registry ids sorted by ascending priority
    order: Vec<AllocatorId>,
    config: MemoryConfig,
    header_size: Size,
    tracker: MemoryTracker,
    handler: AssertHandler,
    destroyed: bool,
    _header: PhantomData<fn() -> H>,
}

impl MemorySystem {
    /// Memory system with the default header layout
    pub fn create(config: MemoryConfig) -> MemoryResult<Self> {
        Self::create_with_header(config)
    }

    /// Memory system with default sizing and the given alignment
    pub fn create_memory(alignment: Size) -> MemoryResult<Self> {
        Self::create(MemoryConfig::default().with_alignment(alignment))
    }

    /// Memory system with one pool per configured block size and one heap
    pub fn with_default_allocators(config: MemoryConfig) -> MemoryResult<Self> {
        let span = span_operation("memory.default_allocators");
        let mut memory = Self::create(config)?;

        let pools = memory.config.pools.clone();
        for pool in &pools {
            memory.add_pool(pool.block_size, pool.initial_count);
        }
        memory.add_heap(memory.config.heap_size);

        span.record_items_processed(memory.allocator_count());
        Ok(memory)
    }
}

impl<H: AllocHeader> MemorySystem<H> {
    /// Memory system using header layout `H`
    pub fn create_with_header(config: MemoryConfig) -> MemoryResult<Self> {
        config.validate()?;

        let space = match config.address_limit {
            Some(limit) => AddressSpace::with_limit(limit),
            None => AddressSpace::new(),
        };
        let header_size = header_size::<H>(config.alignment);

        let mut memory = Self {
            space,
            allocators: Vec::new(),
            order: Vec::new(),
            header_size,
            tracker: MemoryTracker::new(),
            handler: AssertHandler::default(),
            destroyed: false,
            _header: PhantomData,
            config,
        };
        memory.add_allocator(Arc::new(MallocAllocator::new(memory.config.alignment)));

        info!(
            alignment = memory.config.alignment,
            header_size = header_size,
            instrumented = H::INSTRUMENTED,
            "memory system created"
        );
        Ok(memory)
    }

    /// Install the hook that receives assert and critical failures
    pub fn with_assert_handler(mut self, handler: AssertHandler) -> Self {
        self.handler = handler;
        self
    }

    pub fn set_assert_handler(&mut self, handler: AssertHandler) {
        self.handler = handler;
    }

    #[inline]
    pub fn alignment(&self) -> Size {
        self.config.alignment
    }

    /// Aligned size of the header stamped before every allocation
    #[inline]
    pub fn header_size(&self) -> Size {
        self.header_size
    }

    pub fn config(&self) -> &MemoryConfig {
        &self.config
    }

    /// Backing address space, for inspection
    pub fn space(&self) -> &AddressSpace {
        &self.space
    }

    // =========================================================================
    // Registry
    // =========================================================================

    /// Register an allocator, keeping the priority order sorted
    ///
    /// Registering the same `Arc` twice returns the existing id.
    pub fn add_allocator(&mut self, allocator: Arc<dyn Allocator>) -> AllocatorId {
        let raw = Arc::as_ptr(&allocator) as *const ();
        if let Some(index) = self
            .allocators
            .iter()
            .position(|existing| Arc::as_ptr(existing) as *const () == raw)
        {
            return AllocatorId(index as u32);
        }

        let id = AllocatorId(self.allocators.len() as u32);
        let priority = allocator.priority();
        let slot = self
            .order
            .iter()
            .position(|other| {
                let other = &self.allocators[other.index()];
                other.priority() > priority
                    || (other.priority() == priority && other.kind() == AllocatorKind::Malloc)
            })
            .unwrap_or(self.order.len());

        debug!(
            id = %id,
            name = allocator.name(),
            kind = %allocator.kind(),
            priority = priority,
            "allocator registered"
        );
        self.allocators.push(allocator);
        self.order.insert(slot, id);
        id
    }

    /// Register a pool of `block_size` blocks at the system alignment
    pub fn add_pool(&mut self, block_size: Size, initial_count: Size) -> AllocatorId {
        let alignment = self.alignment();
        self.add_allocator(Arc::new(PoolAllocator::new(
            block_size,
            initial_count,
            alignment,
        )))
    }

    pub fn add_heap(&mut self, heap_size: Size) -> AllocatorId {
        let alignment = self.alignment();
        self.add_allocator(Arc::new(HeapAllocator::new(heap_size, alignment)))
    }

    /// Register a stack; it only serves requests that name it explicitly
    pub fn add_stack(&mut self, stack_size: Size) -> AllocatorId {
        let alignment = self.alignment();
        self.add_allocator(Arc::new(StackAllocator::new(stack_size, alignment)))
    }

    pub fn get_allocator(&self, id: AllocatorId) -> Option<&Arc<dyn Allocator>> {
        self.allocators.get(id.index())
    }

    pub fn allocator_count(&self) -> usize {
        self.allocators.len()
    }

    /// Registry ids in dispatch order
    pub fn priority_order(&self) -> &[AllocatorId] {
        &self.order
    }

    /// Total bytes requested from an allocator for `param`
    ///
    /// Fails with `OutOfMemory` when the header pushes the total past `usize::MAX`.
    #[inline]
    pub fn bytes_for_allocation(&self, param: &MemoryParam) -> MemoryResult<Size> {
        self.header_size
            .checked_add(param.bytes)
            .ok_or_else(|| MemoryError::OutOfMemory {
                allocator: "memory system".to_string(),
                requested: param.bytes,
            })
    }

    /// Allocator that would serve `param`
    pub fn select_allocator(&self, param: &MemoryParam) -> MemoryResult<AllocatorId> {
        if let Some(id) = param.allocator {
            return self
                .get_allocator(id)
                .map(|_| id)
                .ok_or(MemoryError::UnknownAllocator(id));
        }

        let total = self.bytes_for_allocation(param)?;
        Ok(self
            .order
            .iter()
            .copied()
            .find(|id| self.allocators[id.index()].should_allocate(param, total))
            .unwrap_or(AllocatorId::FALLBACK))
    }

    fn allocator(&self, id: AllocatorId) -> MemoryResult<&Arc<dyn Allocator>> {
        self.get_allocator(id)
            .ok_or(MemoryError::UnknownAllocator(id))
    }

    // =========================================================================
    // Allocation
    // =========================================================================

    /// Allocate `param.bytes`; `None` for zero bytes or on failure
    #[track_caller]
    pub fn alloc(&self, param: MemoryParam) -> Option<MemPtr> {
        match self.try_alloc(param) {
            Ok(ptr) => ptr,
            Err(err) => {
                self.handler.raise(&err);
                None
            }
        }
    }

    #[track_caller]
    pub fn free(&self, ptr: MemPtr) {
        if let Err(err) = self.try_free(ptr) {
            self.handler.raise(&err);
        }
    }

    /// Resize an allocation, possibly moving it to another allocator
    ///
    /// A zero-byte request frees `ptr` and returns `None`.
    #[track_caller]
    pub fn realloc(&self, ptr: MemPtr, param: MemoryParam) -> Option<MemPtr> {
        match self.try_realloc(ptr, param) {
            Ok(ptr) => ptr,
            Err(err) => {
                self.handler.raise(&err);
                None
            }
        }
    }

    pub fn try_alloc(&self, param: MemoryParam) -> MemoryResult<Option<MemPtr>> {
        if param.bytes == 0 {
            return Ok(None);
        }

        let started = Instant::now();
        let total = self.bytes_for_allocation(&param)?;
        let id = self.select_allocator(&param)?;
        let block = self.allocator(id)?.alloc(&self.space, total)?;
        self.stamp(id, block, &param, started).map(Some)
    }

    pub fn try_free(&self, ptr: MemPtr) -> MemoryResult<()> {
        let at = header_ptr(ptr, self.header_size)?;
        let header: H = read_header(&self.space, at)?;
        if let Some(tracked) = header.tracked() {
            self.tracker.check(tracked, at.address())?;
        }

        self.allocator(header.allocator())?
            .free(&self.space, at, header.private())?;
        if let Some(tracked) = header.tracked() {
            self.tracker.untrack(tracked, at.address())?;
        }
        Ok(())
    }

    pub fn try_realloc(&self, ptr: MemPtr, param: MemoryParam) -> MemoryResult<Option<MemPtr>> {
        if param.bytes == 0 {
            self.try_free(ptr)?;
            return Ok(None);
        }

        let started = Instant::now();
        let at = header_ptr(ptr, self.header_size)?;
        let old: H = read_header(&self.space, at)?;
        if let Some(tracked) = old.tracked() {
            self.tracker.check(tracked, at.address())?;
        }

        let total = self.bytes_for_allocation(&param)?;
        let id = self.select_allocator(&param)?;
        let target = self.allocator(id)?;

        let block = if id == old.allocator() {
            target.realloc(&self.space, at, old.private(), total)?
        } else {
            let source = self.allocator(old.allocator())?;
            let old_bytes = match old.tracked() {
                Some(tracked) => tracked.bytes as Size,
                None => source
                    .usable_size(old.private())
                    .saturating_sub(self.header_size),
            };

            let fresh = target.alloc(&self.space, total)?;
            let moved = self
                .space
                .copy(
                    ptr,
                    user_ptr(fresh.ptr, self.header_size),
                    old_bytes.min(param.bytes),
                )
                .and_then(|()| source.free(&self.space, at, old.private()));
            if let Err(err) = moved {
                // The old block stays live and tracked; hand the new one back
                if let Err(undo) = target.free(&self.space, fresh.ptr, fresh.private) {
                    warn!(error = %undo, "failed to return block after aborted realloc");
                }
                return Err(err);
            }
            fresh
        };

        if let Some(tracked) = old.tracked() {
            self.tracker.untrack(tracked, at.address())?;
        }
        self.stamp(id, block, &param, started).map(Some)
    }

    /// Write the header for a fresh block and hand out the user pointer
    fn stamp(
        &self,
        id: AllocatorId,
        block: Allocation,
        param: &MemoryParam,
        started: Instant,
    ) -> MemoryResult<MemPtr> {
        let mut header = H::new(id, block.private);
        if let Some(tracked) = header.tracked_mut() {
            self.tracker
                .track(tracked, param, started, block.ptr.address());
        }
        write_header(&self.space, block.ptr, &header)?;
        Ok(user_ptr(block.ptr, self.header_size))
    }

    // =========================================================================
    // Byte access
    // =========================================================================

    pub fn write_bytes(&self, ptr: MemPtr, data: &[u8]) -> MemoryResult<()> {
        self.space.write(ptr, data)
    }

    pub fn read_bytes(&self, ptr: MemPtr, len: Size) -> MemoryResult<Vec<u8>> {
        self.space.read(ptr, len)
    }

    // =========================================================================
    // Diagnostics
    // =========================================================================

    pub fn statistics(&self) -> MemoryStatistics {
        self.tracker.statistics()
    }

    pub fn live_allocations(&self) -> Vec<LiveAllocation> {
        self.tracker.live_allocations()
    }

    pub fn log_statistics(&self) {
        self.tracker.log_statistics();
        for (id, stats) in self.allocator_stats() {
            info!(
                id = %id,
                name = %stats.name,
                arenas = stats.arenas,
                reserved_bytes = stats.reserved_bytes,
                live = stats.live_allocations,
                expansions = stats.expansions,
                "allocator statistics"
            );
        }
    }

    pub fn log_allocations(&self) {
        self.tracker.log_allocations();
    }

    /// Per-allocator snapshots in registration order
    pub fn allocator_stats(&self) -> Vec<(AllocatorId, AllocatorStats)> {
        self.allocators
            .iter()
            .enumerate()
            .map(|(index, allocator)| (AllocatorId(index as u32), allocator.stats()))
            .collect()
    }

    // =========================================================================
    // Teardown
    // =========================================================================

    /// Tear down, reporting leaks and live allocations through the hook
    ///
    /// A leak is critical: the default hook panics after logging every entry.
    #[track_caller]
    pub fn destroy(mut self) {
        for err in self.teardown() {
            self.handler.raise(&err);
        }
    }

    /// Tear down, returning the first failure instead of raising it
    pub fn try_destroy(mut self) -> MemoryResult<()> {
        match self.teardown().into_iter().next() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Leak check first, then every allocator in registration order
    fn teardown(&mut self) -> Vec<MemoryError> {
        let span = span_operation("memory.destroy");
        self.destroyed = true;

        let mut errors = Vec::new();
        if let Err(err) = self.tracker.check_leaks() {
            errors.push(err);
        }
        for allocator in &self.allocators {
            if let Err(err) = allocator.release(&self.space) {
                errors.push(err);
            }
        }

        if errors.is_empty() {
            span.record_result(true);
            info!(
                peak_reserved_bytes = self.space.peak_reserved_bytes(),
                "memory system destroyed"
            );
        } else {
            span.record_result(false);
        }
        errors
    }
}

impl<H: AllocHeader> Drop for MemorySystem<H> {
    fn drop(&mut self) {
        if !self.destroyed {
            warn!(
                regions = self.space.region_count(),
                "memory system dropped without destroy"
            );
        }
    }
}
