//! Store implementations
//!
//! - `memory`: in-process store, the default backend
//! - `test`: memory store wrapper with failure injection and write notifications

pub mod memory;

pub use memory::MemoryStore;
pub use test::TestStore;
