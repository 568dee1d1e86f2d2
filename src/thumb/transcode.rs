use std::fs;
use std::io::Write;
use std::path::Path;

use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;

use super::ThumbError;

/// Produces a resized, re-encoded rendition of a source image.
pub trait Transcoder: Send + Sync {
    /// Decodes `source`, resizes it to exactly `width` x `height` and writes the encoded
    /// result to `out`.
    fn transcode(&self, source: &Path, width: u32, height: u32, out: &mut dyn Write) -> Result<(), ThumbError>;
}

/// Bilinear resize followed by a fixed-quality baseline JPEG encode.
#[derive(Debug, Clone, Copy)]
pub struct JpegTranscoder {
    quality: u8,
}

impl JpegTranscoder {
    pub fn new(quality: u8) -> Self {
        Self { quality: quality.clamp(1, 100) }
    }
}

impl Default for JpegTranscoder {
    fn default() -> Self {
        Self::new(90)
    }
}

impl Transcoder for JpegTranscoder {
    fn transcode(&self, source: &Path, width: u32, height: u32, out: &mut dyn Write) -> Result<(), ThumbError> {
        // Format is guessed from content, not from the extension
        let bytes = fs::read(source)?;
        let img = image::load_from_memory(&bytes)?;
        let resized = img.resize_exact(width, height, FilterType::Triangle).to_rgb8();

        let mut encoder = JpegEncoder::new_with_quality(out, self.quality);
        encoder.encode_image(&resized)?;
        Ok(())
    }
}
