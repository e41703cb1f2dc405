/*!
 * Core Types
 * Common types used across the memory subsystem
 */

use serde::{Deserialize, Serialize};
use std::fmt;

/// Linear address type for memory operations
pub type Address = u64;

/// Size type for memory operations
pub type Size = usize;

/// Allocator selection priority (0-255, lower is checked first)
pub type Priority = u8;

/// Identifier of a region handed out by the address space
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RegionId(pub u32);

impl fmt::Display for RegionId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "r{}", self.0)
    }
}

/// Registration index of an allocator inside a memory system
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AllocatorId(pub u32);

impl AllocatorId {
    /// The malloc fallback is always registered first
    pub const FALLBACK: AllocatorId = AllocatorId(0);

    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for AllocatorId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Round `value` up to the next multiple of `align` (a power of two)
#[inline]
#[must_use]
pub const fn align_up(value: Size, align: Size) -> Size {
    (value + align - 1) & !(align - 1)
}

/// [`align_up`] that returns `None` instead of wrapping past `usize::MAX`
#[inline]
#[must_use]
pub const fn checked_align_up(value: Size, align: Size) -> Option<Size> {
    match value.checked_add(align - 1) {
        Some(sum) => Some(sum & !(align - 1)),
        None => None,
    }
}
