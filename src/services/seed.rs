use crate::core::{Aggregate, FileLoader};
use crate::database::{Collection, InsertManyResult};
use crate::error::SeedError;
use serde::Serialize;
use std::path::Path;
use tracing::{info, warn};

/// What one fixture directory contributed to its collection.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FillReport {
    pub collection: String,
    pub files: usize,
    pub skipped_files: Vec<String>,
    pub records: usize,
    pub inserted: usize,
    pub replaced: usize,
}

/// Bulk-loads fixture directories into collections.
pub struct SeedService {
    loader: FileLoader,
}

impl SeedService {
    pub fn new() -> Self {
        Self {
            loader: FileLoader::new(),
        }
    }

    /// Load every JSON file in `dir` and insert all of their records into
    /// `collection` in a single batch.
    pub fn fill_collection(
        &self,
        collection: &Collection,
        dir: &Path,
    ) -> Result<FillReport, SeedError> {
        let files = self.loader.list_json_files(dir)?;

        let mut report = FillReport {
            collection: collection.name().to_string(),
            files: files.len(),
            ..FillReport::default()
        };

        let records = match self.loader.aggregate(dir, &files) {
            Aggregate::NoInput => {
                warn!(
                    collection = collection.name(),
                    dir = %dir.display(),
                    "no fixture files provided"
                );
                return Ok(report);
            }
            Aggregate::Records { records, skipped } => {
                report.skipped_files = skipped;
                records
            }
        };

        let result = if records.is_empty() {
            InsertManyResult::default()
        } else {
            collection.insert_many(&records)?
        };

        info!(
            collection = collection.name(),
            records = records.len(),
            inserted = result.inserted,
            replaced = result.replaced,
            skipped_files = report.skipped_files.len(),
            "inserted fixture documents"
        );

        report.records = records.len();
        report.inserted = result.inserted;
        report.replaced = result.replaced;
        Ok(report)
    }
}

impl Default for SeedService {
    fn default() -> Self {
        Self::new()
    }
}
