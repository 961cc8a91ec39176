// Implementations of the mention store port.
#![allow(unused_imports)]

pub mod in_memory;
pub mod sqlite_store;

// Re-export for convenience
pub use in_memory::InMemoryMentionStore;
pub use sqlite_store::SqliteMentionStore;
