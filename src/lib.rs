//! Seeds a card database from JSON fixture files and stores a perceptual
//! hash of every card's artwork.

pub mod config;
pub mod core;
pub mod database;
pub mod error;
pub mod logging;
pub mod orchestrator;
pub mod services;

pub use config::SeedConfig;
pub use error::SeedError;
pub use orchestrator::{RunOptions, RunReport, Seeder};
