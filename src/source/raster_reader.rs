use image::{DynamicImage, ImageDecoder, ImageReader};
use std::path::{Path, PathBuf};

use super::reader::{check_plane, SeriesReader};
use super::series::SeriesInfo;
use crate::{AlignError, Result};

/// Single-series, single-image raster formats decoded by the `image` crate
/// (PNG, JPEG, BMP, ...).
pub struct RasterReader {
    path: PathBuf,
    series: [SeriesInfo; 1],
}

impl RasterReader {
    pub(crate) fn recognizes(path: &Path) -> Result<bool> {
        let reader = ImageReader::open(path)
            .map_err(|e| AlignError::io(path, e))?
            .with_guessed_format()
            .map_err(|e| AlignError::io(path, e))?;
        Ok(reader.format().is_some())
    }

    pub fn open(path: &Path) -> Result<Self> {
        let reader = ImageReader::open(path)
            .map_err(|e| AlignError::io(path, e))?
            .with_guessed_format()
            .map_err(|e| AlignError::io(path, e))?;

        if reader.format().is_none() {
            return Err(AlignError::UnsupportedFormat {
                path: path.to_path_buf(),
            });
        }

        // Header only, no pixel decoding.
        let decoder = reader.into_decoder().map_err(|e| AlignError::decode(path, e))?;
        let (width, height) = decoder.dimensions();
        let color = decoder.color_type();
        let channels = color.channel_count();
        let bytes_per_sample = (color.bytes_per_pixel() / channels.max(1)).max(1);

        Ok(Self {
            path: path.to_path_buf(),
            series: [SeriesInfo::new(width, height, channels).with_bytes_per_sample(bytes_per_sample)],
        })
    }
}

impl SeriesReader for RasterReader {
    fn format_name(&self) -> &'static str {
        "raster"
    }

    fn series(&self) -> &[SeriesInfo] {
        &self.series
    }

    fn read_image(&mut self, series: usize, image: usize) -> Result<DynamicImage> {
        check_plane(&self.series, series, image)?;
        let reader = ImageReader::open(&self.path)
            .map_err(|e| AlignError::io(&self.path, e))?
            .with_guessed_format()
            .map_err(|e| AlignError::io(&self.path, e))?;
        reader.decode().map_err(|e| AlignError::decode(&self.path, e))
    }

    fn reopen(&self) -> Result<Box<dyn SeriesReader>> {
        Ok(Box::new(Self {
            path: self.path.clone(),
            series: self.series,
        }))
    }
}
