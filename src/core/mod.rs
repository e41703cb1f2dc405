/*!
 * Core Module
 * Fundamental types, limits, assert hooks and bookkeeping structures
 */

pub mod assert;
pub mod data_structures;
pub mod limits;
pub mod types;

// Re-export for convenience
pub use assert::{AssertHandler, AssertReport, Severity};
pub use data_structures::{SlotArena, SlotKey};
pub use types::*;
