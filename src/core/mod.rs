pub mod fetch;
pub mod hash;
pub mod loader;

pub use fetch::{FetchError, HttpFetcher, ImageFetcher};
pub use hash::{HashError, PerceptualHasher};
pub use loader::{Aggregate, FileLoader, LoadError};
