//! Local cover storage.
//!
//! Covers are downloaded from the catalog, scaled to a fixed width and kept
//! as JPEG files served under a public URL prefix.

use crate::error::{AppError, Result};
use image::ImageReader;
use image::codecs::jpeg::JpegEncoder;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// JPEG quality of stored covers.
const JPEG_QUALITY: u8 = 85;

/// Downloads, resizes and stores cover images.
#[derive(Debug, Clone)]
pub struct CoverStore {
    http: reqwest::Client,
    dir: PathBuf,
    public_url: String,
    width: u32,
}

impl CoverStore {
    /// Create a store writing into `dir` and publishing under `public_url`.
    pub fn new(dir: impl Into<PathBuf>, public_url: impl Into<String>, width: u32, timeout: Duration) -> Result<Self> {
        if width == 0 {
            return Err(AppError::Config("Cover width must be positive".to_string()));
        }
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            dir: dir.into(),
            public_url: public_url.into(),
            width,
        })
    }

    /// Directory holding stored covers.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Public URL of the stored cover for `key`.
    pub fn public_url_for(&self, key: &str) -> String {
        format!("{}{}", self.public_url, file_name(key))
    }

    /// Download the image at `url`, store a resized copy for `key` and
    /// return its public URL.
    pub async fn fetch_and_store(&self, url: &str, key: &str) -> Result<String> {
        let data = self
            .http
            .get(url)
            .send()
            .await?
            .error_for_status()?
            .bytes()
            .await?;

        let width = self.width;
        let jpeg = tokio::task::spawn_blocking(move || resize_cover(&data, width))
            .await
            .map_err(|e| AppError::Internal(format!("Cover task failed: {}", e)))??;

        tokio::fs::create_dir_all(&self.dir).await?;
        let path = self.dir.join(file_name(key));
        tokio::fs::write(&path, &jpeg).await?;

        tracing::debug!(key = %key, path = %path.display(), bytes = jpeg.len(), "Stored cover");
        Ok(self.public_url_for(key))
    }
}

/// File name for a catalog key. Anything outside `[A-Za-z0-9_-]` is
/// replaced so keys cannot escape the cover directory.
fn file_name(key: &str) -> String {
    let safe: String = key
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    format!("{}.jpg", safe)
}

/// Decode any supported image, scale it to `target_width` keeping the
/// aspect ratio and encode it as JPEG.
fn resize_cover(data: &[u8], target_width: u32) -> Result<Vec<u8>> {
    let img = ImageReader::new(Cursor::new(data))
        .with_guessed_format()?
        .decode()?;

    let scale = target_width as f32 / img.width().max(1) as f32;
    let target_height = ((img.height() as f32 * scale) as u32).max(1);

    let resized = img
        .resize_exact(target_width, target_height, image::imageops::FilterType::Lanczos3)
        .to_rgb8();

    let mut jpeg = Vec::new();
    JpegEncoder::new_with_quality(&mut jpeg, JPEG_QUALITY).encode_image(&resized)?;
    Ok(jpeg)
}
