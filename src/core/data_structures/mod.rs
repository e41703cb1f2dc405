/*!
 * Data Structures
 *
 * Specialized data structures for allocator bookkeeping:
 * - Generational slot arena replacing intrusive pointer chains
 *
 * # Performance
 *
 * - Slot arena: O(1) insert/remove/lookup, vacant slots recycled LIFO
 *
 * # Use Cases
 *
 * - **Slot arena**: heap free-block records, tracker live list nodes
 */

mod slot_arena;

pub use slot_arena::{SlotArena, SlotKey};
