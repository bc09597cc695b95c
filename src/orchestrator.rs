use crate::config::SeedConfig;
use crate::core::{HttpFetcher, ImageFetcher};
use crate::database::{Collection, Database};
use crate::error::SeedError;
use crate::services::{FillReport, HashReport, ImageHashService, SeedService};
use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};

pub const DONE: &str = "done.";

#[derive(Debug, Clone, Copy, Default)]
pub struct RunOptions {
    /// Stop after the fixture collections are loaded.
    pub skip_images: bool,
    /// Empty all four collections before loading.
    pub drop_existing: bool,
    pub show_progress: bool,
}

/// Summary of one seeding run.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub started_at: String,
    pub finished_at: String,
    pub fixtures: Vec<FillReport>,
    pub images: Option<HashReport>,
    pub status: String,
}

/// Drives a full run: fixtures for decks, cards and sets, then card images.
pub struct Seeder {
    config: SeedConfig,
    fetcher: Arc<dyn ImageFetcher>,
    options: RunOptions,
}

impl Seeder {
    pub fn new(config: SeedConfig) -> Result<Self, SeedError> {
        let fetcher = HttpFetcher::new(config.http_timeout(), &config.user_agent)?;
        Ok(Self::with_fetcher(config, Arc::new(fetcher)))
    }

    pub fn with_fetcher(config: SeedConfig, fetcher: Arc<dyn ImageFetcher>) -> Self {
        Self {
            config,
            fetcher,
            options: RunOptions::default(),
        }
    }

    pub fn options(mut self, options: RunOptions) -> Self {
        self.options = options;
        self
    }

    pub fn config(&self) -> &SeedConfig {
        &self.config
    }

    /// Open the configured database, seed it and close it again. The
    /// database is closed whether or not seeding succeeded.
    pub async fn run(&self) -> Result<RunReport, SeedError> {
        let db = Database::open(&self.config.database_path())?;
        info!("connected successfully to database");

        let result = self.run_with(&db).await;

        match (result, db.close()) {
            (Ok(report), Ok(())) => Ok(report),
            (Ok(_), Err(e)) => Err(e.into()),
            (Err(e), Ok(())) => Err(e),
            (Err(e), Err(close_err)) => {
                warn!(error = %close_err, "failed to close database after error");
                Err(e)
            }
        }
    }

    /// Seed an already open database.
    pub async fn run_with(&self, db: &Database) -> Result<RunReport, SeedError> {
        let started_at = Utc::now().to_rfc3339();
        let names = &self.config.collections;

        let decks = db.collection(&names.decks)?;
        let cards = db.collection(&names.cards)?;
        let sets = db.collection(&names.sets)?;
        let hashes = db.collection(&names.image_hashes)?;

        if self.options.drop_existing {
            for collection in [&decks, &cards, &sets, &hashes] {
                drop_collection(collection)?;
            }
        }

        let seed = SeedService::new();
        let mut fixtures = Vec::with_capacity(3);
        for (collection, dir) in [
            (&decks, &self.config.decks_dir),
            (&cards, &self.config.cards_dir),
            (&sets, &self.config.sets_dir),
        ] {
            fixtures.push(seed.fill_collection(collection, &self.config.fixture_path(dir))?);
        }

        let images = if self.options.skip_images {
            info!("skipping image phase");
            None
        } else {
            let service =
                ImageHashService::new(Arc::clone(&self.fetcher), self.config.images_path())
                    .with_concurrency(self.config.workers())
                    .with_progress(self.options.show_progress);
            Some(service.hash_card_images(&cards, &hashes).await?)
        };

        Ok(RunReport {
            started_at,
            finished_at: Utc::now().to_rfc3339(),
            fixtures,
            images,
            status: DONE.to_string(),
        })
    }
}

fn drop_collection(collection: &Collection) -> Result<(), SeedError> {
    let removed = collection.len();
    collection.clear()?;
    info!(collection = collection.name(), removed, "dropped collection");
    Ok(())
}
