use image::{DynamicImage, ImageReader};
use image_hasher::{HashAlg, Hasher, HasherConfig};
use std::path::Path;
use thiserror::Error;

/// Grid size of the block hash; 8x8 gives a 64-bit hash (16 hex chars).
pub const HASH_SIZE: u32 = 8;

#[derive(Debug, Error)]
pub enum HashError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Image processing error: {0}")]
    Image(#[from] image::ImageError),
}

/// Computes block-mean perceptual hashes of card artwork.
pub struct PerceptualHasher {
    hasher: Hasher,
}

impl PerceptualHasher {
    pub fn new() -> Self {
        Self::with_size(HASH_SIZE)
    }

    pub fn with_size(size: u32) -> Self {
        let hasher = HasherConfig::new()
            .hash_alg(HashAlg::Blockhash)
            .hash_size(size, size)
            .to_hasher();
        Self { hasher }
    }

    /// Decode the image at `path` (format sniffed from content) and hash it.
    pub fn hash_file(&self, path: &Path) -> Result<String, HashError> {
        let img = ImageReader::open(path)?.with_guessed_format()?.decode()?;
        Ok(self.hash_image(&img))
    }

    /// Lowercase hex rendering of the image's hash bits.
    pub fn hash_image(&self, img: &DynamicImage) -> String {
        self.hasher
            .hash_image(img)
            .as_bytes()
            .iter()
            .map(|b| format!("{:02x}", b))
            .collect()
    }
}

impl Default for PerceptualHasher {
    fn default() -> Self {
        Self::new()
    }
}
