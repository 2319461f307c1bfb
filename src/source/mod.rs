//! Image Source Manager
//!
//! Opens (possibly multi-series) inputs, selects the working series within
//! the addressable pixel budget and exposes every plane of every source
//! through one flattened, contiguous index.

pub mod memory;
pub mod raster_reader;
pub mod reader;
pub mod series;
pub mod tiff_reader;

use image::DynamicImage;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub use memory::MemoryReader;
pub use reader::{FormatRegistry, SeriesReader};
pub use series::{select_working_series, SeriesInfo, DEFAULT_PIXEL_BUDGET};

use crate::config::SourceConfig;
use crate::{AlignError, Result};

/// One opened input and its readers.
pub struct ImageSource {
    path: PathBuf,
    series: Vec<SeriesInfo>,
    working_series: usize,
    reader: Box<dyn SeriesReader>,
    full_reader: Option<Box<dyn SeriesReader>>,
    thumbnails: Option<Vec<DynamicImage>>,
}

impl ImageSource {
    pub fn open(path: &Path, registry: &FormatRegistry, pixel_budget: u64) -> Result<Self> {
        let reader = registry.open(path)?;
        Self::from_reader(path, reader, pixel_budget)
    }

    pub fn from_reader(path: &Path, reader: Box<dyn SeriesReader>, pixel_budget: u64) -> Result<Self> {
        let series = reader.series().to_vec();
        let working_series = select_working_series(&series, pixel_budget).ok_or_else(|| {
            AlignError::ImageOversize {
                path: path.to_path_buf(),
                series: series.len(),
            }
        })?;

        if working_series > 0 {
            tracing::info!(
                path = %path.display(),
                working_series,
                full = ?series[0].dimensions(),
                working = ?series[working_series].dimensions(),
                "full resolution exceeds pixel budget, using reduced series"
            );
        }

        Ok(Self {
            path: path.to_path_buf(),
            series,
            working_series,
            reader,
            full_reader: None,
            thumbnails: None,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn format_name(&self) -> &'static str {
        self.reader.format_name()
    }

    pub fn series(&self) -> &[SeriesInfo] {
        &self.series
    }

    pub fn series_count(&self) -> usize {
        self.series.len()
    }

    pub fn working_series(&self) -> usize {
        self.working_series
    }

    /// Interactive work happens on a lower resolution than the file holds.
    pub fn is_reduced(&self) -> bool {
        self.working_series != 0
    }

    /// Addressable planes of this source.
    pub fn image_count(&self) -> usize {
        self.series[self.working_series].image_count
    }

    pub fn working_dimensions(&self) -> (u32, u32) {
        self.series[self.working_series].dimensions()
    }

    /// Dimensions of the first declared series, the full-resolution one.
    pub fn full_dimensions(&self) -> (u32, u32) {
        self.series[0].dimensions()
    }

    pub fn read_working(&mut self, local: usize) -> Result<DynamicImage> {
        self.reader.read_image(self.working_series, local)
    }

    /// Reads a plane from the full-resolution series. The reader for it is
    /// created on first use and kept; when the working series already is the
    /// full-resolution one the working reader serves both.
    pub fn read_full_resolution(&mut self, local: usize) -> Result<DynamicImage> {
        if self.working_series == 0 {
            return self.reader.read_image(0, local);
        }
        let reader = match self.full_reader.take() {
            Some(reader) => reader,
            None => {
                tracing::debug!(path = %self.path.display(), "opening full resolution reader");
                self.reader.reopen()?
            }
        };
        self.full_reader.insert(reader).read_image(0, local)
    }

    /// Thumbnails of every plane, decoded on first request and cached.
    pub fn thumbnails(&mut self, max_side: u32) -> Result<&[DynamicImage]> {
        if self.thumbnails.is_none() {
            let mut thumbs = Vec::with_capacity(self.image_count());
            for local in 0..self.image_count() {
                thumbs.push(self.reader.read_thumbnail(self.working_series, local, max_side)?);
            }
            self.thumbnails = Some(thumbs);
        }
        Ok(self.thumbnails.as_deref().unwrap_or_default())
    }

    fn release(&mut self) {
        self.full_reader = None;
        self.thumbnails = None;
    }
}

/// Advisory outcome of the pre-flight memory check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryCheck {
    pub estimated: u64,
    pub running_total: u64,
    pub budget: u64,
}

impl MemoryCheck {
    pub fn exceeds_budget(&self) -> bool {
        self.running_total >= self.budget
    }
}

/// Location of a flattened image index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageLocation {
    pub source: usize,
    pub local: usize,
}

pub struct ImageSourceManager {
    registry: FormatRegistry,
    config: SourceConfig,
    sources: Vec<ImageSource>,
    memory_total: u64,
}

impl ImageSourceManager {
    pub fn new(config: SourceConfig) -> Self {
        Self {
            registry: FormatRegistry::new(),
            config,
            sources: Vec::new(),
            memory_total: 0,
        }
    }

    pub fn config(&self) -> &SourceConfig {
        &self.config
    }

    pub fn open(&self, path: &Path) -> Result<ImageSource> {
        ImageSource::open(path, &self.registry, self.config.pixel_budget)
    }

    /// Bytes needed to decode every series of `path`. Geometry only.
    pub fn estimate_memory_usage(&self, path: &Path) -> Result<u64> {
        let reader = self.registry.open(path)?;
        Ok(reader.series().iter().map(SeriesInfo::byte_size).sum())
    }

    /// Adds the estimate for `path` to the running total and reports it
    /// against the configured budget. Never refuses; the caller decides.
    pub fn check_memory(&mut self, path: &Path) -> Result<MemoryCheck> {
        let estimated = self.estimate_memory_usage(path)?;
        self.memory_total = self.memory_total.saturating_add(estimated);
        let check = MemoryCheck {
            estimated,
            running_total: self.memory_total,
            budget: self.config.memory_budget_bytes,
        };
        if check.exceeds_budget() {
            tracing::warn!(path = %path.display(), ?check, "estimated memory exceeds budget");
        }
        Ok(check)
    }

    /// Opens `path` and appends it. Returns the new source's position.
    pub fn add_file(&mut self, path: &Path) -> Result<usize> {
        let source = self.open(path)?;
        Ok(self.add_source(source))
    }

    pub fn add_source(&mut self, source: ImageSource) -> usize {
        tracing::info!(
            path = %source.path().display(),
            format = source.format_name(),
            images = source.image_count(),
            reduced = source.is_reduced(),
            "source added"
        );
        self.sources.push(source);
        self.sources.len() - 1
    }

    pub fn insert_source(&mut self, position: usize, source: ImageSource) -> Result<()> {
        if position > self.sources.len() {
            return Err(AlignError::IndexOutOfRange {
                index: position as isize,
                len: self.sources.len(),
            });
        }
        self.sources.insert(position, source);
        Ok(())
    }

    /// Removes a source; later images shift down so the index stays dense.
    pub fn remove_source(&mut self, position: usize) -> Result<ImageSource> {
        if position >= self.sources.len() {
            return Err(AlignError::IndexOutOfRange {
                index: position as isize,
                len: self.sources.len(),
            });
        }
        let mut removed = self.sources.remove(position);
        removed.release();
        tracing::info!(path = %removed.path().display(), remaining = self.image_count(), "source removed");
        Ok(removed)
    }

    pub fn sources(&self) -> &[ImageSource] {
        &self.sources
    }

    pub fn source_mut(&mut self, position: usize) -> Option<&mut ImageSource> {
        self.sources.get_mut(position)
    }

    pub fn source_count(&self) -> usize {
        self.sources.len()
    }

    pub fn image_count(&self) -> usize {
        self.sources.iter().map(ImageSource::image_count).sum()
    }

    /// Flattened indices owned by the source at `position`.
    pub fn image_range(&self, position: usize) -> std::ops::Range<usize> {
        let start: usize = self.sources[..position.min(self.sources.len())]
            .iter()
            .map(ImageSource::image_count)
            .sum();
        let len = self.sources.get(position).map_or(0, ImageSource::image_count);
        start..start + len
    }

    /// Resolves a caller index; `-1` (nothing selected yet) means image 0.
    pub fn resolve_index(&self, index: isize) -> Result<usize> {
        let resolved = if index == -1 { 0 } else { index };
        let len = self.image_count();
        if resolved < 0 || resolved as usize >= len {
            return Err(AlignError::IndexOutOfRange { index, len });
        }
        Ok(resolved as usize)
    }

    pub fn locate(&self, index: usize) -> Result<ImageLocation> {
        let mut progressive = 0;
        for (source, file) in self.sources.iter().enumerate() {
            if progressive + file.image_count() > index {
                return Ok(ImageLocation {
                    source,
                    local: index - progressive,
                });
            }
            progressive += file.image_count();
        }
        Err(AlignError::IndexOutOfRange {
            index: index as isize,
            len: progressive,
        })
    }

    pub fn get_image(&mut self, index: isize, full_resolution: bool) -> Result<DynamicImage> {
        let index = self.resolve_index(index)?;
        let location = self.locate(index)?;
        let source = &mut self.sources[location.source];
        if full_resolution {
            source.read_full_resolution(location.local)
        } else {
            source.read_working(location.local)
        }
    }

    pub fn source_of(&self, index: usize) -> Result<&ImageSource> {
        let location = self.locate(index)?;
        Ok(&self.sources[location.source])
    }

    pub fn working_dimensions(&self, index: usize) -> Result<(u32, u32)> {
        Ok(self.source_of(index)?.working_dimensions())
    }

    pub fn full_dimensions(&self, index: usize) -> Result<(u32, u32)> {
        Ok(self.source_of(index)?.full_dimensions())
    }

    pub fn is_reduced(&self, index: usize) -> Result<bool> {
        Ok(self.source_of(index)?.is_reduced())
    }

    /// Full-resolution over working-resolution ratio per axis.
    pub fn full_resolution_scale(&self, index: usize) -> Result<(f64, f64)> {
        let source = self.source_of(index)?;
        let (fw, fh) = source.full_dimensions();
        let (ww, wh) = source.working_dimensions();
        Ok((fw as f64 / ww.max(1) as f64, fh as f64 / wh.max(1) as f64))
    }

    /// Releases every reader and buffer. Safe to call repeatedly.
    pub fn dispose(&mut self) {
        if self.sources.is_empty() && self.memory_total == 0 {
            return;
        }
        for source in &mut self.sources {
            source.release();
        }
        self.sources.clear();
        self.memory_total = 0;
        tracing::debug!("image sources disposed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{DynamicImage, RgbImage};

    fn memory_source(name: &str, series: Vec<Vec<DynamicImage>>, budget: u64) -> Result<ImageSource> {
        let reader = MemoryReader::new(series)?;
        ImageSource::from_reader(Path::new(name), Box::new(reader), budget)
    }

    fn planes(width: u32, height: u32, count: usize) -> Vec<DynamicImage> {
        (0..count)
            .map(|i| DynamicImage::ImageRgb8(RgbImage::from_pixel(width, height, image::Rgb([i as u8, 0, 0]))))
            .collect()
    }

    #[test]
    fn test_reduced_series_selected() {
        // 40x40x3 = 4800 > budget, 20x20x3 = 1200 fits
        let source = memory_source("slide", vec![planes(40, 40, 1), planes(20, 20, 1), planes(10, 10, 1)], 2000).unwrap();
        assert_eq!(source.working_series(), 1);
        assert!(source.is_reduced());
        assert_eq!(source.full_dimensions(), (40, 40));
        assert_eq!(source.working_dimensions(), (20, 20));
    }

    #[test]
    fn test_oversize_source_rejected() {
        let result = memory_source("huge", vec![planes(40, 40, 1), planes(30, 30, 1)], 100);
        assert!(matches!(result, Err(AlignError::ImageOversize { series: 2, .. })));
    }

    #[test]
    fn test_full_resolution_read_is_lazy_and_reused() {
        let mut source = memory_source("slide", vec![planes(40, 40, 1), planes(20, 20, 1)], 2000).unwrap();
        assert!(source.full_reader.is_none());
        let full = source.read_full_resolution(0).unwrap();
        assert_eq!((full.width(), full.height()), (40, 40));
        assert!(source.full_reader.is_some());
        let again = source.read_full_resolution(0).unwrap();
        assert_eq!(again.width(), 40);
    }

    #[test]
    fn test_flattened_index_spans_sources() {
        let mut manager = ImageSourceManager::new(SourceConfig::default());
        manager.add_source(memory_source("a", vec![planes(8, 8, 2)], DEFAULT_PIXEL_BUDGET).unwrap());
        manager.add_source(memory_source("b", vec![planes(8, 8, 3)], DEFAULT_PIXEL_BUDGET).unwrap());

        assert_eq!(manager.image_count(), 5);
        assert_eq!(manager.locate(1).unwrap(), ImageLocation { source: 0, local: 1 });
        assert_eq!(manager.locate(2).unwrap(), ImageLocation { source: 1, local: 0 });
        assert_eq!(manager.image_range(1), 2..5);
        assert!(manager.locate(5).is_err());

        let third_of_b = manager.get_image(4, false).unwrap();
        assert_eq!(third_of_b.to_rgb8().get_pixel(0, 0)[0], 2);
    }

    #[test]
    fn test_minus_one_means_first_image() {
        let mut manager = ImageSourceManager::new(SourceConfig::default());
        manager.add_source(memory_source("a", vec![planes(8, 8, 2)], DEFAULT_PIXEL_BUDGET).unwrap());
        assert_eq!(manager.resolve_index(-1).unwrap(), 0);
        assert!(manager.resolve_index(-2).is_err());
        assert!(manager.get_image(-1, false).is_ok());
    }

    #[test]
    fn test_dispose_is_idempotent() {
        let mut manager = ImageSourceManager::new(SourceConfig::default());
        manager.add_source(memory_source("a", vec![planes(8, 8, 1)], DEFAULT_PIXEL_BUDGET).unwrap());
        manager.dispose();
        manager.dispose();
        assert_eq!(manager.image_count(), 0);
    }
}
