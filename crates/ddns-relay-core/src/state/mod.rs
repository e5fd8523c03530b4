// # Durable Store Implementations
//
// This module provides implementations of the DurableStore trait for
// different persistence strategies. Both share the same versioned table.

mod table;

pub mod file;
pub mod memory;

pub use file::FileStore;
pub use memory::MemoryStore;
pub use table::QueuedMessage;
