//! Queue backend implementations:
//! - `memory`: in-process storage for tests and transient setups
//! - `file`: durable one-file-pair-per-item storage with restart recovery
//! - `remote`: broker-backed storage over a [`crate::Transport`]

pub mod file;
pub mod memory;
pub mod remote;

pub use file::FileMailQueue;
pub use memory::MemoryMailQueue;
pub use remote::RemoteMailQueue;
