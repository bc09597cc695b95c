use crate::config::ConfigError;
use crate::core::{FetchError, LoadError};
use crate::database::StoreError;
use thiserror::Error;

/// Errors that abort a whole phase of a seeding run. Failures of a single
/// fixture file or card never surface here.
#[derive(Debug, Error)]
pub enum SeedError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Fixture loading error: {0}")]
    Load(#[from] LoadError),

    #[error("Database error: {0}")]
    Store(#[from] StoreError),

    #[error("Image client error: {0}")]
    Fetch(#[from] FetchError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
