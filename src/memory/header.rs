/*!
 * Allocation Headers
 *
 * Fixed-layout metadata encoded immediately before every user allocation.
 *
 * ## Layouts (little-endian)
 *
 * `ThinHeader` (16 bytes raw):
 * - `0..4`   owning allocator id
 * - `8..16`  allocator-private word
 *
 * `TrackedHeader` (40 bytes raw):
 * - `0..4`   owning allocator id
 * - `4..8`   source line
 * - `8..16`  allocator-private word
 * - `16..24` user byte count
 * - `24..32` tracker slot (index, generation)
 * - `32..40` checksum
 *
 * Both are rounded up to the system alignment so that
 * `header_ptr + header_size == user_ptr` keeps user memory aligned.
 */

use super::space::AddressSpace;
use super::types::{MemPtr, MemoryError, MemoryResult};
use crate::core::data_structures::SlotKey;
use crate::core::limits::CHECKSUM_SEED;
use crate::core::types::{align_up, Address, AllocatorId, Size};
use std::fmt::Debug;

/// Minimal accessor contract shared by both header layouts
pub trait AllocHeader: Copy + Debug + Send + Sync + 'static {
    /// Encoded size before alignment padding
    const RAW_SIZE: usize;

    /// Whether allocations carrying this header are tracked
    const INSTRUMENTED: bool;

    fn new(allocator: AllocatorId, private: u64) -> Self;

    fn allocator(&self) -> AllocatorId;

    fn private(&self) -> u64;

    fn encode(&self, out: &mut [u8]);

    fn decode(bytes: &[u8]) -> Self;

    /// Instrumented view, `None` for thin headers
    fn tracked(&self) -> Option<&TrackedHeader> {
        None
    }

    fn tracked_mut(&mut self) -> Option<&mut TrackedHeader> {
        None
    }
}

/// Header layout selected by the `track_memory` feature
#[cfg(feature = "track_memory")]
pub type DefaultHeader = TrackedHeader;

/// Header layout selected by the `track_memory` feature
#[cfg(not(feature = "track_memory"))]
pub type DefaultHeader = ThinHeader;

/// Allocator identity only
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThinHeader {
    allocator: AllocatorId,
    private: u64,
}

impl AllocHeader for ThinHeader {
    const RAW_SIZE: usize = 16;
    const INSTRUMENTED: bool = false;

    fn new(allocator: AllocatorId, private: u64) -> Self {
        Self { allocator, private }
    }

    fn allocator(&self) -> AllocatorId {
        self.allocator
    }

    fn private(&self) -> u64 {
        self.private
    }

    fn encode(&self, out: &mut [u8]) {
        put_u32(out, 0, self.allocator.0);
        put_u32(out, 4, 0);
        put_u64(out, 8, self.private);
    }

    fn decode(bytes: &[u8]) -> Self {
        Self {
            allocator: AllocatorId(get_u32(bytes, 0)),
            private: get_u64(bytes, 8),
        }
    }
}

/// Allocator identity plus the tracker's bookkeeping
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrackedHeader {
    pub allocator: AllocatorId,
    pub private: u64,
    pub bytes: u64,
    pub line: u32,
    pub slot: Option<SlotKey>,
    pub checksum: u64,
}

impl TrackedHeader {
    pub const LINE_OFFSET: usize = 4;
    pub const BYTES_OFFSET: usize = 16;
    pub const SLOT_OFFSET: usize = 24;
    pub const CHECKSUM_OFFSET: usize = 32;

    const NO_SLOT: u32 = u32::MAX;

    /// Stamp the checksum for a header living at `address`
    pub fn seal(&mut self, address: Address) {
        self.checksum = checksum(address, self.bytes);
    }

    /// Check the stored checksum against the header's own address and size
    pub fn verify(&self, address: Address) -> MemoryResult<()> {
        let expected = checksum(address, self.bytes);
        if self.checksum != expected {
            return Err(MemoryError::CorruptionDetected {
                address,
                expected,
                found: self.checksum,
            });
        }
        Ok(())
    }
}

impl AllocHeader for TrackedHeader {
    const RAW_SIZE: usize = 40;
    const INSTRUMENTED: bool = true;

    fn new(allocator: AllocatorId, private: u64) -> Self {
        Self {
            allocator,
            private,
            bytes: 0,
            line: 0,
            slot: None,
            checksum: 0,
        }
    }

    fn allocator(&self) -> AllocatorId {
        self.allocator
    }

    fn private(&self) -> u64 {
        self.private
    }

    fn encode(&self, out: &mut [u8]) {
        put_u32(out, 0, self.allocator.0);
        put_u32(out, Self::LINE_OFFSET, self.line);
        put_u64(out, 8, self.private);
        put_u64(out, Self::BYTES_OFFSET, self.bytes);
        let (index, generation) = match self.slot {
            Some(key) => (key.index, key.generation),
            None => (Self::NO_SLOT, 0),
        };
        put_u32(out, Self::SLOT_OFFSET, index);
        put_u32(out, Self::SLOT_OFFSET + 4, generation);
        put_u64(out, Self::CHECKSUM_OFFSET, self.checksum);
    }

    fn decode(bytes: &[u8]) -> Self {
        let index = get_u32(bytes, Self::SLOT_OFFSET);
        let slot = (index != Self::NO_SLOT)
            .then(|| SlotKey::new(index, get_u32(bytes, Self::SLOT_OFFSET + 4)));
        Self {
            allocator: AllocatorId(get_u32(bytes, 0)),
            line: get_u32(bytes, Self::LINE_OFFSET),
            private: get_u64(bytes, 8),
            bytes: get_u64(bytes, Self::BYTES_OFFSET),
            slot,
            checksum: get_u64(bytes, Self::CHECKSUM_OFFSET),
        }
    }

    fn tracked(&self) -> Option<&TrackedHeader> {
        Some(self)
    }

    fn tracked_mut(&mut self) -> Option<&mut TrackedHeader> {
        Some(self)
    }
}

/// XOR of the seed, the header's own address and the user byte count
#[inline]
pub fn checksum(address: Address, bytes: u64) -> u64 {
    CHECKSUM_SEED ^ address ^ bytes
}

/// Aligned size of header `H`
#[inline]
pub fn header_size<H: AllocHeader>(alignment: Size) -> Size {
    align_up(H::RAW_SIZE, alignment)
}

/// Pointer handed to the caller for a block whose header starts at `header`
#[inline]
pub fn user_ptr(header: MemPtr, header_size: Size) -> MemPtr {
    header.add(header_size)
}

/// Header location for a user pointer
pub fn header_ptr(user: MemPtr, header_size: Size) -> MemoryResult<MemPtr> {
    user.checked_sub(header_size)
        .ok_or(MemoryError::InvalidAddress(user.address()))
}

pub fn write_header<H: AllocHeader>(
    space: &AddressSpace,
    at: MemPtr,
    header: &H,
) -> MemoryResult<()> {
    let mut buf = [0u8; 64];
    header.encode(&mut buf[..H::RAW_SIZE]);
    space.write(at, &buf[..H::RAW_SIZE])
}

pub fn read_header<H: AllocHeader>(space: &AddressSpace, at: MemPtr) -> MemoryResult<H> {
    let mut buf = [0u8; 64];
    space.read_into(at, &mut buf[..H::RAW_SIZE])?;
    Ok(H::decode(&buf[..H::RAW_SIZE]))
}

#[inline]
fn put_u32(out: &mut [u8], at: usize, value: u32) {
    out[at..at + 4].copy_from_slice(&value.to_le_bytes());
}

#[inline]
fn put_u64(out: &mut [u8], at: usize, value: u64) {
    out[at..at + 8].copy_from_slice(&value.to_le_bytes());
}

#[inline]
fn get_u32(bytes: &[u8], at: usize) -> u32 {
    let mut raw = [0u8; 4];
    raw.copy_from_slice(&bytes[at..at + 4]);
    u32::from_le_bytes(raw)
}

#[inline]
fn get_u64(bytes: &[u8], at: usize) -> u64 {
    let mut raw = [0u8; 8];
    raw.copy_from_slice(&bytes[at..at + 8]);
    u64::from_le_bytes(raw)
}
