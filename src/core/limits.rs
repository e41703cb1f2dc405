/*!
 * System Limits and Constants
 *
 * Centralized location for the memory subsystem's sizing defaults and magic numbers.
 *
 * ## Conventions
 * - Values are grouped by allocator
 * - Performance-critical constants are marked with [PERF]
 * - Values that are part of the header format are marked with [FORMAT]
 */

// =============================================================================
// GLOBAL
// =============================================================================

/// Default byte alignment applied uniformly by all allocators
pub const GLOBAL_ALIGNMENT: usize = 16;

/// Minimum alignment enforced by the malloc fallback
pub const MIN_MALLOC_ALIGNMENT: usize = 16;

/// Largest single region the address space will hand out (1TB)
/// Offsets live in the low 40 bits of a linear address
pub const MAX_REGION_SIZE: usize = 1 << 40;

/// Region ids fill the remaining high 24 bits of a linear address
pub const MAX_REGION_ID: u32 = 1 << 24;

// =============================================================================
// HEADER
// =============================================================================

/// Seed folded into every tracked header checksum
/// [FORMAT]
pub const CHECKSUM_SEED: u64 = 0xC0DE_F00D_5EED_BA5E;

// =============================================================================
// POOL ALLOCATOR
// =============================================================================

/// Pools allocated together whenever a pool allocator runs dry
/// [PERF] One region per group amortizes address-space reservations
pub const POOL_GROUP_SIZE: usize = 1024;

/// Base selection priority for pool allocators (block size / 8 is added)
pub const POOL_BASE_PRIORITY: u8 = 100;

/// Default pool block sizes registered by `with_default_allocators`
pub const POOL_BLOCK_SIZES: [usize; 4] = [64, 128, 256, 512];

/// Default initial pool counts, paired with `POOL_BLOCK_SIZES`
pub const POOL_COUNTS: [usize; 4] = [4096, 2048, 1024, 512];

// =============================================================================
// HEAP ALLOCATOR
// =============================================================================

/// Default heap arena capacity (1MB)
pub const HEAP_SIZE: usize = 1024 * 1024;

/// Heap allocator selection priority (after pools, before malloc)
pub const HEAP_PRIORITY: u8 = 200;

/// Heap accepts requests strictly below capacity / this divisor
pub const HEAP_ACCEPT_DIVISOR: usize = 4;

// =============================================================================
// STACK ALLOCATOR
// =============================================================================

/// Default stack arena capacity (256KB)
pub const STACK_SIZE: usize = 256 * 1024;

/// Stack and malloc allocators sit at the end of the selection order
pub const LAST_PRIORITY: u8 = 255;
