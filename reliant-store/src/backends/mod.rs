//! Store implementations:
//! - `memory`: in-process storage, for transient deployments and tests
//! - `test`: memory storage with synchronisation and failure injection

pub mod memory;

pub use memory::{MemoryMessageStore, StoredMessage};
pub use test::TestMessageStore;
