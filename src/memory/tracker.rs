/*!
 * Memory Tracker
 *
 * Leak detection and allocation statistics for instrumented headers.
 *
 * Live allocations form a doubly linked list threaded through a slot arena.
 * Each tracked header stores its node's key, so untracking is O(1) and a stale
 * key (double free, reused header bytes) is caught by the generation check.
 */

use super::header::TrackedHeader;
use super::types::{MemoryError, MemoryParam, MemoryResult};
use crate::core::data_structures::{SlotArena, SlotKey};
use crate::core::types::{Address, Size};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// Aggregate allocation statistics
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MemoryStatistics {
    pub current_allocations: usize,
    pub current_bytes: Size,
    pub total_allocations: u64,
    pub total_bytes: u64,
    pub average_allocation_size: Size,
    pub average_allocation_time: Duration,
    pub peak_allocations: usize,
    pub peak_bytes: Size,
}

impl MemoryStatistics {
    /// Pretty JSON dump for diagnostics
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

/// One live allocation, as seen by the tracker
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LiveAllocation {
    /// Linear address of the allocation header
    pub address: Address,
    pub bytes: Size,
    pub type_name: &'static str,
    pub file: &'static str,
    pub line: u32,
}

#[derive(Debug)]
struct TrackedNode {
    info: LiveAllocation,
    prev: Option<SlotKey>,
    next: Option<SlotKey>,
}

#[derive(Debug, Default)]
struct TrackerState {
    nodes: SlotArena<TrackedNode>,
    head: Option<SlotKey>,
    tail: Option<SlotKey>,
    live_bytes: Size,
    total_allocations: u64,
    total_bytes: u64,
    total_alloc_time: Duration,
    peak_allocations: usize,
    peak_bytes: Size,
}

impl TrackerState {
    fn push_back(&mut self, info: LiveAllocation) -> SlotKey {
        let key = self.nodes.insert(TrackedNode {
            info,
            prev: self.tail,
            next: None,
        });
        match self.tail.and_then(|tail| self.nodes.get_mut(tail)) {
            Some(tail) => tail.next = Some(key),
            None => self.head = Some(key),
        }
        self.tail = Some(key);
        key
    }

    fn unlink(&mut self, key: SlotKey) -> Option<LiveAllocation> {
        let node = self.nodes.remove(key)?;
        match node.prev.and_then(|prev| self.nodes.get_mut(prev)) {
            Some(prev) => prev.next = node.next,
            None => self.head = node.next,
        }
        match node.next.and_then(|next| self.nodes.get_mut(next)) {
            Some(next) => next.prev = node.prev,
            None => self.tail = node.prev,
        }
        Some(node.info)
    }

    fn walk(&self) -> impl Iterator<Item = &LiveAllocation> + '_ {
        let mut cursor = self.head;
        std::iter::from_fn(move || {
            let node = self.nodes.get(cursor?)?;
            cursor = node.next;
            Some(&node.info)
        })
    }
}

/// Tracker for instrumented allocations
///
/// Guarded by its own lock, independent from every allocator's.
#[derive(Debug, Default)]
pub struct MemoryTracker {
    state: Mutex<TrackerState>,
}

impl MemoryTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a fresh allocation and seal its header
    ///
    /// `address` is the linear address of the header itself.
    pub fn track(
        &self,
        header: &mut TrackedHeader,
        param: &MemoryParam,
        started: Instant,
        address: Address,
    ) {
        header.bytes = param.bytes as u64;
        header.line = param.line;

        let mut state = self.state.lock();
        let key = state.push_back(LiveAllocation {
            address,
            bytes: param.bytes,
            type_name: param.type_name,
            file: param.file,
            line: param.line,
        });
        header.slot = Some(key);
        header.seal(address);

        state.live_bytes += param.bytes;
        state.total_allocations += 1;
        state.total_bytes += param.bytes as u64;
        state.total_alloc_time += started.elapsed();
        state.peak_allocations = state.peak_allocations.max(state.nodes.len());
        state.peak_bytes = state.peak_bytes.max(state.live_bytes);
    }

    /// Verify the checksum and that the header's slot is live and points back at it
    pub fn check(&self, header: &TrackedHeader, address: Address) -> MemoryResult<()> {
        let state = self.state.lock();
        Self::owned_slot(&state, header, address).map(|_| ())
    }

    /// Verify a header and drop it from the live list
    pub fn untrack(&self, header: &TrackedHeader, address: Address) -> MemoryResult<()> {
        let mut state = self.state.lock();
        let key = Self::owned_slot(&state, header, address)?;
        if let Some(info) = state.unlink(key) {
            state.live_bytes -= info.bytes;
        }
        Ok(())
    }

    fn owned_slot(
        state: &TrackerState,
        header: &TrackedHeader,
        address: Address,
    ) -> MemoryResult<SlotKey> {
        header.verify(address)?;
        let key = header.slot.ok_or(MemoryError::InvalidAddress(address))?;

        let owned = state
            .nodes
            .get(key)
            .map_or(false, |node| node.info.address == address);
        if !owned {
            warn!(address = address, "header is not tracked by this tracker");
            return Err(MemoryError::InvalidAddress(address));
        }
        Ok(key)
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().nodes.is_empty()
    }

    /// Snapshot of every live allocation, oldest first
    pub fn live_allocations(&self) -> Vec<LiveAllocation> {
        self.state.lock().walk().cloned().collect()
    }

    pub fn statistics(&self) -> MemoryStatistics {
        let state = self.state.lock();
        let (current_allocations, current_bytes) = state
            .walk()
            .fold((0, 0), |(count, bytes), info| (count + 1, bytes + info.bytes));

        let (average_allocation_size, average_allocation_time) = match state.total_allocations {
            0 => (0, Duration::ZERO),
            n => (
                (state.total_bytes / n) as Size,
                state.total_alloc_time / n.min(u32::MAX as u64) as u32,
            ),
        };

        MemoryStatistics {
            current_allocations,
            current_bytes,
            total_allocations: state.total_allocations,
            total_bytes: state.total_bytes,
            average_allocation_size,
            average_allocation_time,
            peak_allocations: state.peak_allocations,
            peak_bytes: state.peak_bytes,
        }
    }

    pub fn log_statistics(&self) {
        let stats = self.statistics();
        info!(
            current_allocations = stats.current_allocations,
            current_bytes = stats.current_bytes,
            total_allocations = stats.total_allocations,
            total_bytes = stats.total_bytes,
            average_size = stats.average_allocation_size,
            average_time_ns = stats.average_allocation_time.as_nanos() as u64,
            peak_allocations = stats.peak_allocations,
            peak_bytes = stats.peak_bytes,
            "memory statistics"
        );
    }

    pub fn log_allocations(&self) {
        let state = self.state.lock();
        info!(live = state.nodes.len(), "live allocations");
        for info in state.walk() {
            info!(
                address = %format!("0x{:x}", info.address),
                bytes = info.bytes,
                type_name = info.type_name,
                file = info.file,
                line = info.line,
                "live allocation"
            );
        }
    }

    /// Fail with [`MemoryError::LeakDetected`] when anything is still live
    ///
    /// Every leaked allocation is logged first.
    pub fn check_leaks(&self) -> MemoryResult<()> {
        let (count, bytes) = {
            let state = self.state.lock();
            (state.nodes.len(), state.live_bytes)
        };
        if count == 0 {
            return Ok(());
        }

        warn!(count = count, bytes = bytes, "memory leaks at teardown");
        self.log_allocations();
        Err(MemoryError::LeakDetected { count, bytes })
    }
}
