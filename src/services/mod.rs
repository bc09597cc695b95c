pub mod images;
pub mod seed;

pub use images::{CardOutcome, HashReport, ImageHashService};
pub use seed::{FillReport, SeedService};
