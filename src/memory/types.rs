/*!
 * Memory Types
 * Common types for memory management
 */

use crate::core::assert::Severity;
use crate::core::types::{Address, AllocatorId, Priority, RegionId, Size};
use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::panic::Location;
use thiserror::Error;

/// Memory operation result
pub type MemoryResult<T> = Result<T, MemoryError>;

/// Memory errors
#[derive(Error, Debug, Clone, PartialEq, Eq, Diagnostic)]
pub enum MemoryError {
    #[error("Out of memory: {allocator} could not reserve {requested} bytes")]
    #[diagnostic(
        code(memory::out_of_memory),
        help("The address space refused to grow. Check arena sizing and region limits.")
    )]
    OutOfMemory { allocator: String, requested: Size },

    #[error("Memory corruption detected at 0x{address:x}: checksum 0x{found:x}, expected 0x{expected:x}")]
    #[diagnostic(
        code(memory::corruption),
        help("A header was overwritten. Look for buffer underruns on the preceding allocation.")
    )]
    CorruptionDetected {
        address: Address,
        expected: u64,
        found: u64,
    },

    #[error("No heap owns region {region} (freed pointer 0x{address:x})")]
    #[diagnostic(
        code(memory::heap_not_found),
        help("The pointer was not allocated by this heap allocator or was already released.")
    )]
    HeapNotFound { region: RegionId, address: Address },

    #[error("Stack free out of order: expected 0x{expected:x}, got 0x{found:x}")]
    #[diagnostic(
        code(memory::stack_order),
        help("Stack allocations must be freed in exact reverse order of allocation.")
    )]
    StackOrderViolation { expected: Address, found: Address },

    #[error("{count} allocations ({bytes} bytes) still live at tracker teardown")]
    #[diagnostic(
        code(memory::leak),
        help("Run log_allocations() before teardown to see where each leak was allocated.")
    )]
    LeakDetected { count: usize, bytes: Size },

    #[error("Allocator {allocator} released with {count} live allocations")]
    #[diagnostic(code(memory::live_allocations))]
    LiveAllocations { allocator: String, count: usize },

    #[error("Invalid memory address: 0x{0:x}")]
    #[diagnostic(code(memory::invalid_address))]
    InvalidAddress(Address),

    #[error("Unknown allocator {0}")]
    #[diagnostic(code(memory::unknown_allocator))]
    UnknownAllocator(AllocatorId),

    #[error("Access of {len} bytes at offset {offset} overruns region {region} ({capacity} bytes)")]
    #[diagnostic(code(memory::out_of_bounds))]
    OutOfBounds {
        region: RegionId,
        offset: Size,
        len: Size,
        capacity: Size,
    },

    #[error("Reallocation not supported by {allocator}: {reason}")]
    #[diagnostic(code(memory::realloc_unsupported))]
    ReallocUnsupported {
        allocator: String,
        reason: &'static str,
    },

    #[error("{allocator} cannot serve {requested} bytes (limit {limit})")]
    #[diagnostic(
        code(memory::request_too_large),
        help("Route the request to an allocator whose block or arena size fits it.")
    )]
    RequestTooLarge {
        allocator: String,
        requested: Size,
        limit: Size,
    },

    #[error("Invalid memory configuration: {0}")]
    #[diagnostic(code(memory::invalid_config))]
    InvalidConfig(String),
}

impl MemoryError {
    /// How the assert hook must treat this error
    pub fn severity(&self) -> Severity {
        match self {
            MemoryError::OutOfMemory { .. }
            | MemoryError::CorruptionDetected { .. }
            | MemoryError::HeapNotFound { .. }
            | MemoryError::StackOrderViolation { .. }
            | MemoryError::LeakDetected { .. } => Severity::Critical,
            _ => Severity::Assert,
        }
    }

    /// Stable error code, shared with the diagnostic metadata
    pub fn code(&self) -> &'static str {
        match self {
            MemoryError::OutOfMemory { .. } => "memory::out_of_memory",
            MemoryError::CorruptionDetected { .. } => "memory::corruption",
            MemoryError::HeapNotFound { .. } => "memory::heap_not_found",
            MemoryError::StackOrderViolation { .. } => "memory::stack_order",
            MemoryError::LeakDetected { .. } => "memory::leak",
            MemoryError::LiveAllocations { .. } => "memory::live_allocations",
            MemoryError::InvalidAddress(_) => "memory::invalid_address",
            MemoryError::UnknownAllocator(_) => "memory::unknown_allocator",
            MemoryError::OutOfBounds { .. } => "memory::out_of_bounds",
            MemoryError::ReallocUnsupported { .. } => "memory::realloc_unsupported",
            MemoryError::RequestTooLarge { .. } => "memory::request_too_large",
            MemoryError::InvalidConfig(_) => "memory::invalid_config",
        }
    }
}

/// Checked fat pointer into the simulated address space
///
/// Pairs the backing region with a byte offset. The linear [`address`](Self::address)
/// packs both into a single `u64` for display and checksums.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MemPtr {
    pub region: RegionId,
    pub offset: Size,
}

impl MemPtr {
    const OFFSET_BITS: u32 = 40;

    #[inline]
    pub const fn new(region: RegionId, offset: Size) -> Self {
        Self { region, offset }
    }

    /// Linear address: region in the high bits, offset in the low 40
    #[inline]
    pub const fn address(self) -> Address {
        ((self.region.0 as u64) << Self::OFFSET_BITS) | self.offset as u64
    }

    #[inline]
    #[must_use]
    pub const fn add(self, bytes: Size) -> Self {
        Self::new(self.region, self.offset + bytes)
    }

    /// Step back `bytes`, or `None` when that would leave the region
    #[inline]
    #[must_use]
    pub fn checked_sub(self, bytes: Size) -> Option<Self> {
        self.offset
            .checked_sub(bytes)
            .map(|offset| Self::new(self.region, offset))
    }
}

impl fmt::Display for MemPtr {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "0x{:x}", self.address())
    }
}

/// Allocation request
///
/// Source location is captured at construction via `#[track_caller]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryParam {
    pub bytes: Size,
    pub allocator: Option<AllocatorId>,
    pub type_name: &'static str,
    pub file: &'static str,
    pub line: u32,
}

impl MemoryParam {
    #[track_caller]
    pub fn new(bytes: Size) -> Self {
        let location = Location::caller();
        Self {
            bytes,
            allocator: None,
            type_name: "bytes",
            file: location.file(),
            line: location.line(),
        }
    }

    /// Request room for one `T`, tagged with its type name
    #[track_caller]
    pub fn of<T>() -> Self {
        Self::new(std::mem::size_of::<T>()).with_type(std::any::type_name::<T>())
    }

    /// Target a specific allocator instead of priority selection
    pub fn with_allocator(mut self, allocator: AllocatorId) -> Self {
        self.allocator = Some(allocator);
        self
    }

    pub fn with_type(mut self, type_name: &'static str) -> Self {
        self.type_name = type_name;
        self
    }

    pub fn with_bytes(mut self, bytes: Size) -> Self {
        self.bytes = bytes;
        self
    }
}

/// Closed set of allocator strategies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AllocatorKind {
    Malloc,
    Pool,
    Heap,
    Stack,
}

impl fmt::Display for AllocatorKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            AllocatorKind::Malloc => write!(f, "malloc"),
            AllocatorKind::Pool => write!(f, "pool"),
            AllocatorKind::Heap => write!(f, "heap"),
            AllocatorKind::Stack => write!(f, "stack"),
        }
    }
}

/// Raw block handed back by an allocator
///
/// `ptr` is where the header goes; `private` is the allocator's own word,
/// stored in the header and handed back on free.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Allocation {
    pub ptr: MemPtr,
    pub private: u64,
}

/// Per-allocator snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AllocatorStats {
    pub name: String,
    pub kind: AllocatorKind,
    pub priority: Priority,
    /// Backing regions currently reserved (groups, heaps, stacks)
    pub arenas: usize,
    pub reserved_bytes: Size,
    pub live_allocations: usize,
    /// Times new backing storage was reserved after the first arena
    pub expansions: u64,
    /// Free-list length (pools or heap blocks), zero where not applicable
    pub free_blocks: usize,
}
