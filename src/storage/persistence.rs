//! Ledger persistence layer
//!
//! The ledger keeps two JSON documents, the block list and the pending
//! transaction pool. A [`DocumentStore`] saves and loads them whole.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::fs;
use std::io::{self, BufWriter, Write};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use thiserror::Error;

/// Storage errors
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("IO error: {0}")]
    IoError(#[from] io::Error),
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
    #[error("Invalid data: {0}")]
    InvalidData(String),
}

/// Documents owned by one ledger instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Collection {
    Blocks,
    Transactions,
}

impl Collection {
    pub fn file_name(&self) -> &'static str {
        match self {
            Self::Blocks => "blocks.json",
            Self::Transactions => "transactions.json",
        }
    }
}

/// Whole-document storage. A write replaces the previous document entirely.
pub trait DocumentStore: Send + Sync {
    fn write(&self, collection: Collection, document: &[u8]) -> Result<(), StorageError>;

    /// `None` when the document was never written
    fn read(&self, collection: Collection) -> Result<Option<Vec<u8>>, StorageError>;
}

/// Serialize `items` and store them as `collection`
pub fn write_collection<T: Serialize>(
    store: &dyn DocumentStore,
    collection: Collection,
    items: &[T],
) -> Result<(), StorageError> {
    let document = serde_json::to_vec_pretty(items)?;
    store.write(collection, &document)
}

/// Load `collection`, empty when it was never written
pub fn read_collection<T: DeserializeOwned>(
    store: &dyn DocumentStore,
    collection: Collection,
) -> Result<Vec<T>, StorageError> {
    match store.read(collection)? {
        Some(document) => Ok(serde_json::from_slice(&document)?),
        None => Ok(Vec::new()),
    }
}

/// Storage configuration
#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub data_dir: PathBuf,
    /// Instances sharing a data directory are kept apart by name
    pub instance_name: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from(".ledger_data"),
            instance_name: "main".to_string(),
        }
    }
}

impl StorageConfig {
    pub fn instance_dir(&self) -> PathBuf {
        self.data_dir.join(&self.instance_name)
    }
}

/// One JSON file per collection under `<data_dir>/<instance_name>/`
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    dir: PathBuf,
}

impl JsonFileStore {
    /// Create a store, creating its directory if needed
    pub fn new(config: &StorageConfig) -> Result<Self, StorageError> {
        let dir = config.instance_dir();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    fn path(&self, collection: Collection) -> PathBuf {
        self.dir.join(collection.file_name())
    }

    /// Check if a document has been saved
    pub fn exists(&self, collection: Collection) -> bool {
        self.path(collection).exists()
    }
}

impl DocumentStore for JsonFileStore {
    fn write(&self, collection: Collection, document: &[u8]) -> Result<(), StorageError> {
        let path = self.path(collection);

        // Write to temporary file first
        let temp_path = path.with_extension("json.tmp");
        let file = fs::File::create(&temp_path)?;
        let mut writer = BufWriter::new(file);
        writer.write_all(document)?;
        writer.flush()?;

        // Atomic rename
        fs::rename(&temp_path, &path)?;

        log::debug!("Saved {} ({} bytes)", path.display(), document.len());
        Ok(())
    }

    fn read(&self, collection: Collection) -> Result<Option<Vec<u8>>, StorageError> {
        let path = self.path(collection);
        if !path.exists() {
            return Ok(None);
        }
        Ok(Some(fs::read(path)?))
    }
}

/// Volatile store. Clones share the same documents, so a ledger can be
/// reopened over a store it wrote to.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    documents: Arc<Mutex<HashMap<Collection, Vec<u8>>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl DocumentStore for MemoryStore {
    fn write(&self, collection: Collection, document: &[u8]) -> Result<(), StorageError> {
        let mut documents = self
            .documents
            .lock()
            .map_err(|_| StorageError::InvalidData("memory store lock poisoned".to_string()))?;
        documents.insert(collection, document.to_vec());
        Ok(())
    }

    fn read(&self, collection: Collection) -> Result<Option<Vec<u8>>, StorageError> {
        let documents = self
            .documents
            .lock()
            .map_err(|_| StorageError::InvalidData("memory store lock poisoned".to_string()))?;
        Ok(documents.get(&collection).cloned())
    }
}
