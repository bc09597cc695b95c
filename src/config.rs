use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_DB_NAME: &str = "pokemontest";
pub const DEFAULT_USER_AGENT: &str = concat!("cardseed/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid config file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Names of the four collections the loader writes to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CollectionNames {
    pub decks: String,
    pub cards: String,
    pub sets: String,
    pub image_hashes: String,
}

impl Default for CollectionNames {
    fn default() -> Self {
        Self {
            decks: "decks".to_string(),
            cards: "cards".to_string(),
            sets: "sets".to_string(),
            image_hashes: "imghash".to_string(),
        }
    }
}

/// Everything a seeding run needs to know. Relative fixture and image
/// directories are resolved against `fixture_root`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SeedConfig {
    pub fixture_root: PathBuf,
    pub decks_dir: PathBuf,
    pub cards_dir: PathBuf,
    pub sets_dir: PathBuf,
    pub images_dir: PathBuf,
    pub db_path: PathBuf,
    pub db_name: String,
    pub collections: CollectionNames,
    pub http_timeout_secs: u64,
    pub user_agent: String,
    pub concurrency: usize,
}

impl Default for SeedConfig {
    fn default() -> Self {
        Self {
            fixture_root: PathBuf::from("."),
            decks_dir: PathBuf::from("decks/en"),
            cards_dir: PathBuf::from("cards/en"),
            sets_dir: PathBuf::from("sets"),
            images_dir: PathBuf::from("images"),
            db_path: default_db_path(),
            db_name: DEFAULT_DB_NAME.to_string(),
            collections: CollectionNames::default(),
            http_timeout_secs: 30,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            concurrency: 1,
        }
    }
}

impl SeedConfig {
    /// Load a JSON config file. Missing keys fall back to the defaults.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;

        serde_json::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })
    }

    pub fn fixture_path(&self, dir: &Path) -> PathBuf {
        self.fixture_root.join(dir)
    }

    pub fn images_path(&self) -> PathBuf {
        self.fixture_root.join(&self.images_dir)
    }

    pub fn database_path(&self) -> PathBuf {
        self.db_path.join(&self.db_name)
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }

    /// Worker count for the image phase; never zero.
    pub fn workers(&self) -> usize {
        self.concurrency.max(1)
    }
}

pub fn default_db_path() -> PathBuf {
    dirs::data_dir()
        .map(|dir| dir.join("cardseed"))
        .unwrap_or_else(|| PathBuf::from("data"))
}
