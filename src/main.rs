use anyhow::{Context, Result};
use cardseed::logging::init_logging;
use cardseed::services::CardOutcome;
use cardseed::{RunOptions, RunReport, SeedConfig, Seeder};
use clap::Parser;
use dialoguer::Confirm;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "cardseed",
    version,
    about = "Seed the card database from JSON fixtures and hash card artwork"
)]
struct Cli {
    /// Directory holding decks/en, cards/en and sets
    #[arg(short, long, value_name = "DIR", env = "CARDSEED_FIXTURES")]
    fixtures: Option<PathBuf>,

    /// JSON config file; flags override its values
    #[arg(short, long, value_name = "FILE", env = "CARDSEED_CONFIG")]
    config: Option<PathBuf>,

    /// Directory the database lives in
    #[arg(long, value_name = "DIR", env = "CARDSEED_DB_PATH")]
    db_path: Option<PathBuf>,

    /// Database name (default: pokemontest)
    #[arg(long, value_name = "NAME", env = "CARDSEED_DB_NAME")]
    db_name: Option<String>,

    /// Scratch directory for downloaded images (default: <fixtures>/images)
    #[arg(long, value_name = "DIR")]
    images_dir: Option<PathBuf>,

    /// Number of cards to process at once in the image phase
    #[arg(short = 'j', long, value_name = "N")]
    concurrency: Option<usize>,

    /// HTTP timeout in seconds for image downloads
    #[arg(long, value_name = "SECS")]
    timeout: Option<u64>,

    /// Only load the fixture collections
    #[arg(long)]
    skip_images: bool,

    /// Empty the collections before loading
    #[arg(long)]
    drop: bool,

    /// Don't ask before dropping collections
    #[arg(short, long)]
    yes: bool,

    /// Hide the progress bar
    #[arg(short, long)]
    quiet: bool,

    /// Print the run report as JSON
    #[arg(long)]
    json: bool,
}

impl Cli {
    fn seed_config(&self) -> Result<SeedConfig> {
        let mut config = match &self.config {
            Some(path) => SeedConfig::from_file(path)
                .with_context(|| format!("Failed to load config {:?}", path))?,
            None => SeedConfig::default(),
        };

        if let Some(fixtures) = &self.fixtures {
            config.fixture_root = fixtures.clone();
        }
        if let Some(db_path) = &self.db_path {
            config.db_path = db_path.clone();
        }
        if let Some(db_name) = &self.db_name {
            config.db_name = db_name.clone();
        }
        if let Some(images_dir) = &self.images_dir {
            config.images_dir = images_dir.clone();
        }
        if let Some(concurrency) = self.concurrency {
            config.concurrency = concurrency;
        }
        if let Some(timeout) = self.timeout {
            config.http_timeout_secs = timeout;
        }

        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging("cardseed=info")?;

    let config = cli.seed_config()?;

    if cli.drop && !cli.yes {
        let confirmed = Confirm::new()
            .with_prompt(format!(
                "Drop all collections in {}?",
                config.database_path().display()
            ))
            .default(false)
            .interact()
            .context("Failed to read confirmation")?;
        if !confirmed {
            println!("Aborted; nothing was changed.");
            return Ok(());
        }
    }

    println!(
        "▶ Seeding {} from {}",
        config.database_path().display(),
        config.fixture_root.display()
    );

    let seeder = Seeder::new(config)
        .context("Failed to set up seeder")?
        .options(RunOptions {
            skip_images: cli.skip_images,
            drop_existing: cli.drop,
            show_progress: !cli.quiet && !cli.json,
        });

    let report = seeder.run().await.context("Seeding failed")?;

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report);
    }

    Ok(())
}

fn print_report(report: &RunReport) {
    for fill in &report.fixtures {
        println!(
            "   📦 {}: {} record(s) from {} file(s), {} new, {} replaced",
            fill.collection, fill.records, fill.files, fill.inserted, fill.replaced
        );
        for file in &fill.skipped_files {
            println!("   ⚠️  skipped unreadable fixture {}", file);
        }
    }

    if let Some(images) = &report.images {
        println!(
            "   🖼️  images: {} of {} hashed, {} already stored, {} failed",
            images.succeeded(),
            images.total(),
            images.skipped(),
            images.failed()
        );
        for failure in images.failures() {
            if let CardOutcome::Failed { id, reason } = failure {
                println!(
                    "   ⚠️  {}: {}",
                    id.as_deref().unwrap_or("<no id>"),
                    reason
                );
            }
        }
    }

    println!("{}", report.status);
}
