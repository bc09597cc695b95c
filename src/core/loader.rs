use rayon::prelude::*;
use serde_json::Value;
use std::fs;
use std::path::Path;
use thiserror::Error;
use tracing::{debug, warn};
use walkdir::WalkDir;

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("Failed to list directory {path}: {source}")]
    ReadDir {
        path: String,
        #[source]
        source: walkdir::Error,
    },

    #[error("Failed to read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid JSON in {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Expected a JSON array in {path}, found {found}")]
    NotAnArray { path: String, found: &'static str },
}

/// Result of flattening a list of fixture files.
#[derive(Debug, Clone, PartialEq)]
pub enum Aggregate {
    /// No file names were supplied at all.
    NoInput,
    /// Records from every readable file, in file order then in-file order.
    /// `skipped` lists the files that contributed nothing because they
    /// could not be read or parsed.
    Records {
        records: Vec<Value>,
        skipped: Vec<String>,
    },
}

impl Aggregate {
    pub fn records(&self) -> &[Value] {
        match self {
            Aggregate::NoInput => &[],
            Aggregate::Records { records, .. } => records,
        }
    }

    pub fn skipped(&self) -> &[String] {
        match self {
            Aggregate::NoInput => &[],
            Aggregate::Records { skipped, .. } => skipped,
        }
    }

    pub fn is_no_input(&self) -> bool {
        matches!(self, Aggregate::NoInput)
    }
}

/// Reads fixture directories and the JSON record arrays inside them.
pub struct FileLoader;

impl FileLoader {
    pub fn new() -> Self {
        Self
    }

    /// File names directly inside `dir`, sorted by name.
    pub fn list_dir(&self, dir: &Path) -> Result<Vec<String>, LoadError> {
        let mut names = Vec::new();

        for entry in WalkDir::new(dir)
            .min_depth(1)
            .max_depth(1)
            .sort_by_file_name()
        {
            let entry = entry.map_err(|source| {
                warn!(dir = %dir.display(), error = %source, "failed to list directory");
                LoadError::ReadDir {
                    path: dir.display().to_string(),
                    source,
                }
            })?;

            // Follows symlinks; dangling ones are left out.
            if entry.path().is_file() {
                names.push(entry.file_name().to_string_lossy().into_owned());
            }
        }

        Ok(names)
    }

    /// Like [`list_dir`](Self::list_dir) but keeps only `.json` files.
    pub fn list_json_files(&self, dir: &Path) -> Result<Vec<String>, LoadError> {
        let (json, other): (Vec<String>, Vec<String>) = self
            .list_dir(dir)?
            .into_iter()
            .partition(|name| is_json_file(name));

        for name in &other {
            debug!(dir = %dir.display(), file = %name, "ignoring non-JSON file");
        }

        Ok(json)
    }

    /// Parse `dir/file` as JSON. Failures are logged and yield `None`.
    pub fn read_json(&self, dir: &Path, file: &str) -> Option<Value> {
        match self.try_read_json(dir, file) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(error = %e, "skipping fixture file");
                None
            }
        }
    }

    pub fn try_read_json(&self, dir: &Path, file: &str) -> Result<Value, LoadError> {
        let path = dir.join(file);
        let contents = fs::read_to_string(&path).map_err(|source| LoadError::Read {
            path: path.display().to_string(),
            source,
        })?;

        serde_json::from_str(&contents).map_err(|source| LoadError::Parse {
            path: path.display().to_string(),
            source,
        })
    }

    /// Flatten the record arrays of `files` (relative to `dir`) into one list.
    ///
    /// Files are parsed in parallel; output order is still the order of
    /// `files`, then the order inside each file.
    pub fn aggregate(&self, dir: &Path, files: &[String]) -> Aggregate {
        if files.is_empty() {
            return Aggregate::NoInput;
        }

        let parsed: Vec<(&String, Option<Vec<Value>>)> = files
            .par_iter()
            .map(|file| (file, self.read_array(dir, file)))
            .collect();

        let mut records = Vec::new();
        let mut skipped = Vec::new();
        for (file, docs) in parsed {
            match docs {
                Some(docs) => records.extend(docs),
                None => skipped.push(file.clone()),
            }
        }

        debug!(
            dir = %dir.display(),
            files = files.len(),
            records = records.len(),
            skipped = skipped.len(),
            "aggregated fixture files"
        );

        Aggregate::Records { records, skipped }
    }

    fn read_array(&self, dir: &Path, file: &str) -> Option<Vec<Value>> {
        match self.read_json(dir, file)? {
            Value::Array(docs) => Some(docs),
            other => {
                let e = LoadError::NotAnArray {
                    path: dir.join(file).display().to_string(),
                    found: json_kind(&other),
                };
                warn!(error = %e, "skipping fixture file");
                None
            }
        }
    }
}

impl Default for FileLoader {
    fn default() -> Self {
        Self::new()
    }
}

fn is_json_file(name: &str) -> bool {
    Path::new(name)
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"))
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
