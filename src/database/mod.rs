pub mod collection;

pub use collection::{Collection, InsertManyResult, document_id};

use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Sled(#[from] sled::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Documents must be JSON objects, got {0}")]
    NotAnObject(String),
}

/// Handle to the embedded document database. Each collection is a sled tree
/// holding JSON documents keyed by their `id`.
pub struct Database {
    db: sled::Db,
    location: Option<PathBuf>,
}

impl Database {
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let db = sled::open(path)?;
        info!(path = %path.display(), "opened database");
        Ok(Self {
            db,
            location: Some(path.to_path_buf()),
        })
    }

    /// A throwaway database removed when the handle is dropped.
    pub fn temporary() -> Result<Self, StoreError> {
        let db = sled::Config::new().temporary(true).open()?;
        Ok(Self { db, location: None })
    }

    pub fn location(&self) -> Option<&Path> {
        self.location.as_deref()
    }

    pub fn collection(&self, name: &str) -> Result<Collection, StoreError> {
        let tree = self.db.open_tree(name)?;
        Ok(Collection::new(name, tree))
    }

    /// Flush outstanding writes and release the handle.
    pub fn close(self) -> Result<(), StoreError> {
        let flushed = self.db.flush()?;
        debug!(bytes = flushed, "flushed database");
        info!("closed database");
        Ok(())
    }
}
