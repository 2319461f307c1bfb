use image::DynamicImage;
use std::fs::File;
use std::io::Read;
use std::path::Path;

use super::raster_reader::RasterReader;
use super::series::SeriesInfo;
use super::tiff_reader::TiffSeriesReader;
use crate::{AlignError, Result};

/// A format plugin: exposes the series geometry of one input without
/// decoding pixels, and decodes single planes on request.
///
/// Readers are not safe for concurrent use; each source owns its own.
pub trait SeriesReader: Send {
    fn format_name(&self) -> &'static str;

    /// Every series, in the order the file declares them.
    fn series(&self) -> &[SeriesInfo];

    fn read_image(&mut self, series: usize, image: usize) -> Result<DynamicImage>;

    fn read_thumbnail(&mut self, series: usize, image: usize, max_side: u32) -> Result<DynamicImage> {
        let full = self.read_image(series, image)?;
        Ok(full.thumbnail(max_side, max_side))
    }

    /// A fresh, independent reader over the same data.
    fn reopen(&self) -> Result<Box<dyn SeriesReader>>;
}

pub(crate) fn check_plane(series: &[SeriesInfo], series_index: usize, image: usize) -> Result<()> {
    let info = series.get(series_index).ok_or(AlignError::IndexOutOfRange {
        index: series_index as isize,
        len: series.len(),
    })?;
    if image >= info.image_count {
        return Err(AlignError::IndexOutOfRange {
            index: image as isize,
            len: info.image_count,
        });
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Probe {
    Tiff,
    Raster,
}

/// Picks a reader for a path by probing its header.
#[derive(Debug, Clone, Default)]
pub struct FormatRegistry;

impl FormatRegistry {
    pub fn new() -> Self {
        Self
    }

    pub fn open(&self, path: &Path) -> Result<Box<dyn SeriesReader>> {
        match self.probe(path)? {
            Probe::Tiff => Ok(Box::new(TiffSeriesReader::open(path)?)),
            Probe::Raster => Ok(Box::new(RasterReader::open(path)?)),
        }
    }

    fn probe(&self, path: &Path) -> Result<Probe> {
        let mut header = [0u8; 4];
        let mut file = File::open(path).map_err(|e| AlignError::io(path, e))?;
        let read = file.read(&mut header).map_err(|e| AlignError::io(path, e))?;
        if read == header.len() && is_tiff_signature(&header) {
            return Ok(Probe::Tiff);
        }
        if RasterReader::recognizes(path)? {
            return Ok(Probe::Raster);
        }
        Err(AlignError::UnsupportedFormat {
            path: path.to_path_buf(),
        })
    }
}

/// Classic little/big endian TIFF and BigTIFF signatures.
fn is_tiff_signature(header: &[u8; 4]) -> bool {
    matches!(
        header,
        [0x49, 0x49, 0x2a, 0x00] | [0x4d, 0x4d, 0x00, 0x2a] | [0x49, 0x49, 0x2b, 0x00] | [0x4d, 0x4d, 0x00, 0x2b]
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_tiff_signatures() {
        assert!(is_tiff_signature(b"II*\0"));
        assert!(is_tiff_signature(&[0x4d, 0x4d, 0x00, 0x2a]));
        assert!(!is_tiff_signature(b"\x89PNG"));
    }

    #[test]
    fn test_unknown_format_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("notes.txt");
        std::fs::write(&path, "definitely not pixels").unwrap();

        match FormatRegistry::new().open(&path) {
            Err(AlignError::UnsupportedFormat { path: reported }) => assert_eq!(reported, path),
            Err(other) => panic!("unexpected error: {other}"),
            Ok(_) => panic!("text file must not open"),
        }
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let result = FormatRegistry::new().open(Path::new("/nonexistent/slide.tiff"));
        assert!(matches!(result, Err(AlignError::Io { .. })));
    }
}
