use crate::core::{FetchError, HashError, ImageFetcher, PerceptualHasher};
use crate::database::{Collection, StoreError, document_id};
use crate::error::SeedError;
use futures::stream::{self, StreamExt};
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use serde_json::{Value, json};
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, info, warn};

#[derive(Debug, Error)]
enum CardError {
    #[error("card has no id")]
    MissingId,

    #[error("card {0} has no images.small url")]
    MissingImageUrl(String),

    #[error("card id {0:?} is not a plain file name")]
    UnsafeId(String),

    #[error("Download failed: {0}")]
    Fetch(#[from] FetchError),

    #[error("Hashing failed: {0}")]
    Hash(#[from] HashError),

    #[error("Hashing task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    #[error("Database error: {0}")]
    Store(#[from] StoreError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// What happened to a single card during the image phase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CardOutcome {
    Hashed {
        id: String,
        hash: String,
        downloaded: bool,
    },
    /// A hash for this card was already stored.
    Skipped { id: String },
    Failed { id: Option<String>, reason: String },
}

impl CardOutcome {
    pub fn id(&self) -> Option<&str> {
        match self {
            CardOutcome::Hashed { id, .. } | CardOutcome::Skipped { id } => Some(id.as_str()),
            CardOutcome::Failed { id, .. } => id.as_deref(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct HashReport {
    pub outcomes: Vec<CardOutcome>,
}

impl HashReport {
    pub fn total(&self) -> usize {
        self.outcomes.len()
    }

    pub fn succeeded(&self) -> usize {
        self.count(|o| matches!(o, CardOutcome::Hashed { .. }))
    }

    pub fn skipped(&self) -> usize {
        self.count(|o| matches!(o, CardOutcome::Skipped { .. }))
    }

    pub fn failed(&self) -> usize {
        self.count(|o| matches!(o, CardOutcome::Failed { .. }))
    }

    pub fn failures(&self) -> impl Iterator<Item = &CardOutcome> {
        self.outcomes
            .iter()
            .filter(|o| matches!(o, CardOutcome::Failed { .. }))
    }

    fn count(&self, pred: impl Fn(&CardOutcome) -> bool) -> usize {
        self.outcomes.iter().filter(|o| pred(o)).count()
    }
}

/// Downloads each card's thumbnail, stores its perceptual hash and removes
/// the scratch file again.
pub struct ImageHashService {
    fetcher: Arc<dyn ImageFetcher>,
    hasher: Arc<PerceptualHasher>,
    images_dir: PathBuf,
    concurrency: usize,
    show_progress: bool,
}

impl ImageHashService {
    pub fn new(fetcher: Arc<dyn ImageFetcher>, images_dir: PathBuf) -> Self {
        Self {
            fetcher,
            hasher: Arc::new(PerceptualHasher::new()),
            images_dir,
            concurrency: 1,
            show_progress: false,
        }
    }

    /// Process up to `workers` cards at once. One keeps cards strictly in order.
    pub fn with_concurrency(mut self, workers: usize) -> Self {
        self.concurrency = workers.max(1);
        self
    }

    pub fn with_progress(mut self, show: bool) -> Self {
        self.show_progress = show;
        self
    }

    /// Where the image of `card_id` is downloaded to. `None` when the id
    /// would resolve outside the images directory.
    pub fn scratch_path(&self, card_id: &str) -> Option<PathBuf> {
        is_plain_file_name(card_id).then(|| self.images_dir.join(format!("{}.png", card_id)))
    }

    pub async fn hash_card_images(
        &self,
        cards: &Collection,
        hashes: &Collection,
    ) -> Result<HashReport, SeedError> {
        tokio::fs::create_dir_all(&self.images_dir).await?;
        let docs = cards.find_all()?;
        info!(
            cards = docs.len(),
            workers = self.concurrency,
            "hashing card images"
        );

        let progress = self.progress_bar(docs.len() as u64);
        let outcomes: Vec<CardOutcome> = stream::iter(docs.iter())
            .map(|card| {
                let progress = progress.clone();
                async move {
                    let outcome = self.process_card(card, hashes, &progress).await;
                    progress.inc(1);
                    outcome
                }
            })
            .buffer_unordered(self.concurrency)
            .collect()
            .await;
        progress.finish_and_clear();

        let report = HashReport { outcomes };
        info!(
            total = report.total(),
            hashed = report.succeeded(),
            skipped = report.skipped(),
            failed = report.failed(),
            "image phase complete"
        );
        Ok(report)
    }

    async fn process_card(
        &self,
        card: &Value,
        hashes: &Collection,
        progress: &ProgressBar,
    ) -> CardOutcome {
        let Some(id) = document_id(card) else {
            let e = CardError::MissingId;
            progress.suspend(|| error!(error = %e, "error processing image"));
            return CardOutcome::Failed {
                id: None,
                reason: e.to_string(),
            };
        };

        let Some(path) = self.scratch_path(&id) else {
            let e = CardError::UnsafeId(id.clone());
            progress.suspend(|| error!(card_id = %id, error = %e, "error processing image"));
            return CardOutcome::Failed {
                id: Some(id),
                reason: e.to_string(),
            };
        };

        match self.try_process_card(&id, card, &path, hashes).await {
            Ok(outcome) => outcome,
            Err(e) => {
                progress.suspend(|| error!(card_id = %id, error = %e, "error processing image"));
                remove_scratch(&path).await;
                CardOutcome::Failed {
                    id: Some(id),
                    reason: e.to_string(),
                }
            }
        }
    }

    async fn try_process_card(
        &self,
        id: &str,
        card: &Value,
        path: &Path,
        hashes: &Collection,
    ) -> Result<CardOutcome, CardError> {
        if hashes.contains_id(id)? {
            debug!(card_id = id, "hash already stored");
            return Ok(CardOutcome::Skipped { id: id.to_string() });
        }

        let url =
            small_image_url(card).ok_or_else(|| CardError::MissingImageUrl(id.to_string()))?;

        let downloaded = if tokio::fs::try_exists(path).await? {
            debug!(card_id = id, path = %path.display(), "reusing downloaded image");
            false
        } else {
            let bytes = self.fetcher.fetch_to(url, path).await?;
            debug!(card_id = id, path = %path.display(), bytes, "downloaded image");
            true
        };

        let hasher = Arc::clone(&self.hasher);
        let owned = path.to_path_buf();
        let hash = tokio::task::spawn_blocking(move || hasher.hash_file(&owned)).await??;
        debug!(card_id = id, hash = %hash, "image hashed");

        hashes.insert_one(&json!({ "small": hash, "id": card["id"] }))?;
        debug!(card_id = id, "hash saved to database");

        tokio::fs::remove_file(path).await?;
        Ok(CardOutcome::Hashed {
            id: id.to_string(),
            hash,
            downloaded,
        })
    }

    fn progress_bar(&self, len: u64) -> ProgressBar {
        if !self.show_progress {
            return ProgressBar::hidden();
        }

        let bar = ProgressBar::new(len);
        let template = "{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} cards {msg}";
        match ProgressStyle::with_template(template) {
            Ok(style) => bar.set_style(style.progress_chars("=> ")),
            Err(e) => warn!(error = %e, "invalid progress template"),
        }
        bar
    }
}

fn is_plain_file_name(id: &str) -> bool {
    if id.contains(['/', '\\']) {
        return false;
    }
    let mut components = Path::new(id).components();
    matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    )
}

fn small_image_url(card: &Value) -> Option<&str> {
    card.get("images")?.get("small")?.as_str()
}

async fn remove_scratch(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        if e.kind() != ErrorKind::NotFound {
            warn!(path = %path.display(), error = %e, "failed to remove scratch image");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::Database;
    use async_trait::async_trait;
    use image::{DynamicImage, ImageBuffer, ImageFormat, Rgb};
    use std::io::Cursor;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    /// Serves generated PNGs; URLs containing "missing" answer 404.
    struct StubFetcher {
        calls: AtomicUsize,
    }

    impl StubFetcher {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    fn png_for(seed: u32) -> Vec<u8> {
        let img = DynamicImage::ImageRgb8(ImageBuffer::from_fn(64, 88, move |x, y| {
            let v = ((x * (seed + 1) + y * 3) % 256) as u8;
            Rgb([v, 255 - v, v / 2])
        }));
        let mut bytes = Vec::new();
        img.write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
            .unwrap();
        bytes
    }

    #[async_trait]
    impl ImageFetcher for StubFetcher {
        async fn fetch_to(&self, url: &str, dest: &Path) -> Result<u64, FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if url.contains("missing") {
                return Err(FetchError::Status {
                    status: 404,
                    url: url.to_string(),
                });
            }
            let bytes = png_for(url.len() as u32);
            tokio::fs::write(dest, &bytes).await?;
            Ok(bytes.len() as u64)
        }
    }

    fn card(id: &str) -> Value {
        json!({
            "id": id,
            "name": format!("Card {id}"),
            "images": { "small": format!("https://images.example.com/{id}.png") }
        })
    }

    fn scratch_files(dir: &Path) -> usize {
        std::fs::read_dir(dir).unwrap().count()
    }

    #[tokio::test]
    async fn test_two_cards_leave_two_hashes_and_empty_scratch_dir() {
        let temp_dir = TempDir::new().unwrap();
        let images_dir = temp_dir.path().join("images");
        let db = Database::temporary().unwrap();
        let cards = db.collection("cards").unwrap();
        let hashes = db.collection("imghash").unwrap();
        cards.insert_many(&[card("base1-1"), card("base1-2")]).unwrap();
        let fetcher = StubFetcher::new();

        let service = ImageHashService::new(fetcher.clone(), images_dir.clone());
        let report = service.hash_card_images(&cards, &hashes).await.unwrap();

        assert_eq!(report.total(), 2);
        assert_eq!(report.succeeded(), 2);
        assert_eq!(fetcher.calls(), 2);
        assert_eq!(scratch_files(&images_dir), 0);
        assert_eq!(hashes.len(), 2);
        for id in ["base1-1", "base1-2"] {
            let stored = hashes.find_by_id(id).unwrap().unwrap();
            assert_eq!(stored["id"], json!(id));
            assert_eq!(stored["small"].as_str().unwrap().len(), 16);
        }
    }

    #[tokio::test]
    async fn test_existing_hash_skips_download() {
        let temp_dir = TempDir::new().unwrap();
        let db = Database::temporary().unwrap();
        let cards = db.collection("cards").unwrap();
        let hashes = db.collection("imghash").unwrap();
        cards.insert_many(&[card("base1-1"), card("base1-2")]).unwrap();
        hashes
            .insert_one(&json!({"id": "base1-1", "small": "0123456789abcdef"}))
            .unwrap();
        let fetcher = StubFetcher::new();

        let service = ImageHashService::new(fetcher.clone(), temp_dir.path().join("images"));
        let report = service.hash_card_images(&cards, &hashes).await.unwrap();

        assert_eq!(report.skipped(), 1);
        assert_eq!(report.succeeded(), 1);
        assert_eq!(fetcher.calls(), 1);
        assert_eq!(
            hashes.find_by_id("base1-1").unwrap().unwrap()["small"],
            json!("0123456789abcdef")
        );
    }

    #[tokio::test]
    async fn test_existing_scratch_file_is_reused() {
        let temp_dir = TempDir::new().unwrap();
        let images_dir = temp_dir.path().join("images");
        std::fs::create_dir_all(&images_dir).unwrap();
        std::fs::write(images_dir.join("base1-7.png"), png_for(7)).unwrap();
        let db = Database::temporary().unwrap();
        let cards = db.collection("cards").unwrap();
        let hashes = db.collection("imghash").unwrap();
        cards.insert_many(&[card("base1-7")]).unwrap();
        let fetcher = StubFetcher::new();

        let service = ImageHashService::new(fetcher.clone(), images_dir.clone());
        let report = service.hash_card_images(&cards, &hashes).await.unwrap();

        assert_eq!(fetcher.calls(), 0);
        assert!(matches!(
            report.outcomes[0],
            CardOutcome::Hashed { downloaded: false, .. }
        ));
        assert_eq!(scratch_files(&images_dir), 0);
    }

    #[tokio::test]
    async fn test_failures_are_recorded_and_loop_continues() {
        let temp_dir = TempDir::new().unwrap();
        let images_dir = temp_dir.path().join("images");
        let db = Database::temporary().unwrap();
        let cards = db.collection("cards").unwrap();
        let hashes = db.collection("imghash").unwrap();
        cards
            .insert_many(&[
                card("a-1"),
                json!({"id": "a-2", "images": {"small": "https://images.example.com/missing.png"}}),
                json!({"id": "a-3", "name": "no artwork"}),
                json!({"name": "no id", "images": {"small": "https://images.example.com/x.png"}}),
                card("a-4"),
            ])
            .unwrap();
        let fetcher = StubFetcher::new();

        let service = ImageHashService::new(fetcher.clone(), images_dir.clone());
        let report = service.hash_card_images(&cards, &hashes).await.unwrap();

        assert_eq!(report.total(), 5);
        assert_eq!(report.succeeded(), 2);
        assert_eq!(report.failed(), 3);
        let failed: Vec<Option<&str>> = report.failures().map(|o| o.id()).collect();
        assert!(failed.contains(&Some("a-2")));
        assert!(failed.contains(&Some("a-3")));
        assert!(failed.contains(&None));
        assert_eq!(hashes.len(), 2);
        assert_eq!(scratch_files(&images_dir), 0);
    }

    #[tokio::test]
    async fn test_concurrent_workers_hash_every_card() {
        let temp_dir = TempDir::new().unwrap();
        let images_dir = temp_dir.path().join("images");
        let db = Database::temporary().unwrap();
        let cards = db.collection("cards").unwrap();
        let hashes = db.collection("imghash").unwrap();
        let docs: Vec<Value> = (1..=12).map(|n| card(&format!("sv1-{n}"))).collect();
        cards.insert_many(&docs).unwrap();

        let service =
            ImageHashService::new(StubFetcher::new(), images_dir.clone()).with_concurrency(4);
        let report = service.hash_card_images(&cards, &hashes).await.unwrap();

        assert_eq!(report.succeeded(), 12);
        assert_eq!(hashes.len(), 12);
        assert_eq!(scratch_files(&images_dir), 0);
    }

    #[test]
    fn test_scratch_path_is_keyed_by_card_id() {
        let service = ImageHashService::new(StubFetcher::new(), PathBuf::from("/tmp/images"));
        assert_eq!(
            service.scratch_path("base1-4"),
            Some(PathBuf::from("/tmp/images/base1-4.png"))
        );
    }

    #[test]
    fn test_scratch_path_rejects_ids_that_leave_the_images_dir() {
        let service = ImageHashService::new(StubFetcher::new(), PathBuf::from("/tmp/images"));
        for id in ["../keep", "a/b", "a\\b", "..", ".", "/etc/passwd", ""] {
            assert_eq!(service.scratch_path(id), None, "{id:?}");
        }
    }

    #[tokio::test]
    async fn test_card_without_url_fails_even_with_scratch_file() {
        let temp_dir = TempDir::new().unwrap();
        let images_dir = temp_dir.path().join("images");
        std::fs::create_dir_all(&images_dir).unwrap();
        std::fs::write(images_dir.join("x-1.png"), png_for(1)).unwrap();
        let db = Database::temporary().unwrap();
        let cards = db.collection("cards").unwrap();
        let hashes = db.collection("imghash").unwrap();
        cards.insert_one(&json!({"id": "x-1"})).unwrap();
        let fetcher = StubFetcher::new();

        let service = ImageHashService::new(fetcher.clone(), images_dir.clone());
        let report = service.hash_card_images(&cards, &hashes).await.unwrap();

        assert!(matches!(
            &report.outcomes[..],
            [CardOutcome::Failed { id: Some(id), .. }] if id == "x-1"
        ));
        assert_eq!(fetcher.calls(), 0);
        assert!(hashes.is_empty());
    }

    #[tokio::test]
    async fn test_id_with_parent_component_leaves_outside_file_alone() {
        let temp_dir = TempDir::new().unwrap();
        let images_dir = temp_dir.path().join("images");
        let outside = temp_dir.path().join("keep.png");
        std::fs::write(&outside, png_for(3)).unwrap();
        let db = Database::temporary().unwrap();
        let cards = db.collection("cards").unwrap();
        let hashes = db.collection("imghash").unwrap();
        cards.insert_one(&card("../keep")).unwrap();
        let fetcher = StubFetcher::new();

        let service = ImageHashService::new(fetcher.clone(), images_dir.clone());
        let report = service.hash_card_images(&cards, &hashes).await.unwrap();

        assert!(matches!(
            &report.outcomes[..],
            [CardOutcome::Failed { id: Some(id), .. }] if id == "../keep"
        ));
        assert!(outside.exists());
        assert_eq!(fetcher.calls(), 0);
        assert!(hashes.is_empty());
    }

    #[tokio::test]
    async fn test_visible_progress_bar_still_reports_every_card() {
        let temp_dir = TempDir::new().unwrap();
        let images_dir = temp_dir.path().join("images");
        let db = Database::temporary().unwrap();
        let cards = db.collection("cards").unwrap();
        let hashes = db.collection("imghash").unwrap();
        cards
            .insert_many(&[card("b-1"), json!({"id": "b-2"}), card("b-3")])
            .unwrap();

        let service = ImageHashService::new(StubFetcher::new(), images_dir.clone())
            .with_progress(true)
            .with_concurrency(2);
        let report = service.hash_card_images(&cards, &hashes).await.unwrap();

        assert_eq!(report.succeeded(), 2);
        assert_eq!(report.failed(), 1);
        assert_eq!(scratch_files(&images_dir), 0);
    }
}
