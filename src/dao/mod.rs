/// Persistence contract consumed by the coordinator.
pub mod match_store;
/// In-memory backend used by tests and single-node development runs.
pub mod memory;
/// Database model definitions.
pub mod models;
/// Storage abstraction layer shared by backends.
pub mod storage;
