//! Storage handlers

pub mod filesystem;
pub mod memory;

pub use filesystem::{FilesystemStorageConfig, FilesystemStorageHandler};
pub use memory::MemoryStorageHandler;
