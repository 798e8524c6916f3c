//! In-memory backends: record store + mutation log, blob area и
//! checkpoint slot. Для тестов и локального прогона без диска.

mod bytes;
mod checkpoint;
mod store;

pub use bytes::MemoryByteStore;
pub use checkpoint::MemoryCheckpointStore;
pub use store::{MemoryStore, MemorySubscription};
