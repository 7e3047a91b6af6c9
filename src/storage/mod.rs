//! Storage module for ledger persistence

pub mod persistence;

pub use persistence::{
    read_collection, write_collection, Collection, DocumentStore, JsonFileStore, MemoryStore,
    StorageConfig, StorageError,
};
