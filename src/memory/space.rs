/*!
 * Address Space
 *
 * Simulated OS memory backing every allocator.
 *
 * Regions are zero-initialised byte buffers reserved and released as a whole.
 * All byte-level access to allocator memory goes through this module, which
 * bounds-checks every read and write against the owning region.
 */

use super::types::{MemPtr, MemoryError, MemoryResult};
use crate::core::limits::{MAX_REGION_ID, MAX_REGION_SIZE};
use crate::core::types::{RegionId, Size};
use ahash::RandomState;
use dashmap::DashMap;
use log::{debug, warn};
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};

/// Region table shared by all allocators of one memory system
pub struct AddressSpace {
    regions: DashMap<RegionId, Box<[u8]>, RandomState>,
    next_region: AtomicU32,
    reserved_bytes: AtomicUsize,
    peak_reserved: AtomicUsize,
    // Upper bound on reserved bytes, None for unbounded
    limit: Option<Size>,
}

impl AddressSpace {
    pub fn new() -> Self {
        Self::build(None)
    }

    /// Address space that refuses reservations past `limit` bytes in total
    pub fn with_limit(limit: Size) -> Self {
        Self::build(Some(limit))
    }

    fn build(limit: Option<Size>) -> Self {
        Self {
            regions: DashMap::with_hasher(RandomState::new()),
            // Region 0 is never handed out so that linear address 0 stays invalid
            next_region: AtomicU32::new(1),
            reserved_bytes: AtomicUsize::new(0),
            peak_reserved: AtomicUsize::new(0),
            limit,
        }
    }

    /// Reserve a zeroed region of `len` bytes
    ///
    /// Returns `None` when the request exceeds the region size cap, the
    /// configured limit, or the region id space; callers turn that into an
    /// out-of-memory failure.
    pub fn reserve(&self, len: Size) -> Option<RegionId> {
        if len == 0 || len > MAX_REGION_SIZE {
            warn!("Refusing region reservation of {} bytes", len);
            return None;
        }

        let limit = self.limit.unwrap_or(usize::MAX);
        let reserved = self
            .reserved_bytes
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |used| {
                used.checked_add(len).filter(|total| *total <= limit)
            });

        let previous = match reserved {
            Ok(previous) => previous,
            Err(used) => {
                warn!(
                    "Address space exhausted: requested {} bytes with {} of {} reserved",
                    len, used, limit
                );
                return None;
            }
        };
        // Ids are never reused and must fit above the 40 offset bits
        let next = self
            .next_region
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |next| {
                (next < MAX_REGION_ID).then_some(next + 1)
            });
        let id = match next {
            Ok(id) => RegionId(id),
            Err(_) => {
                self.reserved_bytes.fetch_sub(len, Ordering::SeqCst);
                warn!("Address space exhausted: all {} region ids used", MAX_REGION_ID - 1);
                return None;
            }
        };
        self.peak_reserved
            .fetch_max(previous + len, Ordering::SeqCst);
        self.regions.insert(id, vec![0u8; len].into_boxed_slice());
        debug!("Reserved region {} ({} bytes)", id, len);
        Some(id)
    }

    /// Release a region, returning its length
    pub fn release(&self, id: RegionId) -> Option<Size> {
        let (_, bytes) = self.regions.remove(&id)?;
        let len = bytes.len();
        self.reserved_bytes.fetch_sub(len, Ordering::SeqCst);
        debug!("Released region {} ({} bytes)", id, len);
        Some(len)
    }

    /// Grow or shrink a region in place, preserving its prefix
    pub fn resize(&self, id: RegionId, new_len: Size) -> MemoryResult<()> {
        if new_len == 0 || new_len > MAX_REGION_SIZE {
            return Err(MemoryError::InvalidConfig(format!(
                "region size {} out of range",
                new_len
            )));
        }

        let mut entry = self
            .regions
            .get_mut(&id)
            .ok_or(MemoryError::InvalidAddress(MemPtr::new(id, 0).address()))?;
        let old_len = entry.len();
        if new_len > old_len {
            let limit = self.limit.unwrap_or(usize::MAX);
            let grow = new_len - old_len;
            self.reserved_bytes
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |used| {
                    used.checked_add(grow).filter(|total| *total <= limit)
                })
                .map_err(|_| MemoryError::OutOfMemory {
                    allocator: "address space".to_string(),
                    requested: new_len,
                })?;
        } else {
            self.reserved_bytes
                .fetch_sub(old_len - new_len, Ordering::SeqCst);
        }

        let mut resized = std::mem::take(&mut *entry).into_vec();
        resized.resize(new_len, 0);
        *entry = resized.into_boxed_slice();
        Ok(())
    }

    /// Length of a region, if it exists
    pub fn region_len(&self, id: RegionId) -> Option<Size> {
        self.regions.get(&id).map(|bytes| bytes.len())
    }

    pub fn contains(&self, id: RegionId) -> bool {
        self.regions.contains_key(&id)
    }

    /// Copy bytes out of a region
    pub fn read_into(&self, ptr: MemPtr, out: &mut [u8]) -> MemoryResult<()> {
        let bytes = self
            .regions
            .get(&ptr.region)
            .ok_or(MemoryError::InvalidAddress(ptr.address()))?;
        let end = Self::checked_end(ptr, out.len(), bytes.len())?;
        out.copy_from_slice(&bytes[ptr.offset..end]);
        Ok(())
    }

    pub fn read(&self, ptr: MemPtr, len: Size) -> MemoryResult<Vec<u8>> {
        let mut out = vec![0u8; len];
        self.read_into(ptr, &mut out)?;
        Ok(out)
    }

    /// Copy bytes into a region
    pub fn write(&self, ptr: MemPtr, data: &[u8]) -> MemoryResult<()> {
        let mut bytes = self
            .regions
            .get_mut(&ptr.region)
            .ok_or(MemoryError::InvalidAddress(ptr.address()))?;
        let end = Self::checked_end(ptr, data.len(), bytes.len())?;
        bytes[ptr.offset..end].copy_from_slice(data);
        Ok(())
    }

    /// Copy `len` bytes between two (possibly identical) regions
    pub fn copy(&self, src: MemPtr, dst: MemPtr, len: Size) -> MemoryResult<()> {
        if len == 0 {
            return Ok(());
        }
        // Staged through a buffer: both ends may live in the same shard
        let staged = self.read(src, len)?;
        self.write(dst, &staged)
    }

    pub fn region_count(&self) -> usize {
        self.regions.len()
    }

    pub fn reserved_bytes(&self) -> Size {
        self.reserved_bytes.load(Ordering::SeqCst)
    }

    pub fn peak_reserved_bytes(&self) -> Size {
        self.peak_reserved.load(Ordering::SeqCst)
    }

    fn checked_end(ptr: MemPtr, len: Size, capacity: Size) -> MemoryResult<Size> {
        ptr.offset
            .checked_add(len)
            .filter(|end| *end <= capacity)
            .ok_or(MemoryError::OutOfBounds {
                region: ptr.region,
                offset: ptr.offset,
                len,
                capacity,
            })
    }
}

impl Default for AddressSpace {
    fn default() -> Self {
        Self::new()
    }
}
