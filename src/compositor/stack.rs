use image::{imageops, RgbImage};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tiff::encoder::{colortype, TiffEncoder};

use crate::{AlignError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SliceKind {
    /// The image anchoring the coordinate frame.
    Reference,
    /// An image resampled through its registration.
    Transformed,
    /// Untouched source pixels, placed next to their transformed copy.
    Original,
}

#[derive(Debug)]
enum SliceStorage {
    InMemory(RgbImage),
    Spilled { path: PathBuf, width: u32, height: u32 },
}

#[derive(Debug)]
pub struct Slice {
    /// Flattened index of the image this slice came from.
    pub image: usize,
    pub kind: SliceKind,
    /// Top-left corner on the canvas.
    pub offset: (u32, u32),
    storage: SliceStorage,
}

impl Slice {
    pub fn dimensions(&self) -> (u32, u32) {
        match &self.storage {
            SliceStorage::InMemory(pixels) => pixels.dimensions(),
            SliceStorage::Spilled { width, height, .. } => (*width, *height),
        }
    }

    pub fn is_spilled(&self) -> bool {
        matches!(self.storage, SliceStorage::Spilled { .. })
    }
}

/// Ordered output of one alignment run.
///
/// Slices may be spilled to a private temporary directory as they are
/// produced; the directory and its files go away with the stack.
#[derive(Debug)]
pub struct CompositeStack {
    width: u32,
    height: u32,
    slices: Vec<Slice>,
    spill: Option<TempDir>,
}

impl CompositeStack {
    /// A stack holding every slice in memory.
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            slices: Vec::new(),
            spill: None,
        }
    }

    /// A stack writing each slice to a fresh temporary directory, created
    /// under `parent` or the system temporary directory.
    pub fn spilling(width: u32, height: u32, parent: Option<&Path>) -> Result<Self> {
        let dir = match parent {
            Some(parent) => TempDir::new_in(parent).map_err(|e| AlignError::io(parent, e))?,
            None => TempDir::new().map_err(|e| AlignError::io(std::env::temp_dir(), e))?,
        };
        tracing::debug!(dir = %dir.path().display(), "composite spill directory created");
        Ok(Self {
            spill: Some(dir),
            ..Self::new(width, height)
        })
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn slices(&self) -> &[Slice] {
        &self.slices
    }

    pub fn len(&self) -> usize {
        self.slices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slices.is_empty()
    }

    pub fn push(&mut self, image: usize, kind: SliceKind, offset: (u32, u32), pixels: RgbImage) -> Result<()> {
        let storage = match &self.spill {
            Some(dir) => {
                let path = dir.path().join(format!("slice-{:04}.tiff", self.slices.len()));
                let (width, height) = pixels.dimensions();
                pixels.save(&path).map_err(|e| AlignError::encode(&path, e))?;
                SliceStorage::Spilled { path, width, height }
            }
            None => SliceStorage::InMemory(pixels),
        };
        self.slices.push(Slice {
            image,
            kind,
            offset,
            storage,
        });
        Ok(())
    }

    /// Pixels of slice `index` at their own size.
    pub fn load(&self, index: usize) -> Result<RgbImage> {
        let slice = self.slices.get(index).ok_or(AlignError::IndexOutOfRange {
            index: index as isize,
            len: self.slices.len(),
        })?;
        match &slice.storage {
            SliceStorage::InMemory(pixels) => Ok(pixels.clone()),
            SliceStorage::Spilled { path, .. } => image::open(path)
                .map(|img| img.to_rgb8())
                .map_err(|e| AlignError::decode(path, e)),
        }
    }

    /// Slice `index` drawn at its offset on a black canvas-sized page.
    pub fn render_page(&self, index: usize) -> Result<RgbImage> {
        let pixels = self.load(index)?;
        let (x, y) = self.slices[index].offset;
        let mut page = RgbImage::new(self.width, self.height);
        imageops::replace(&mut page, &pixels, x as i64, y as i64);
        Ok(page)
    }

    /// Writes every page into one multi-page TIFF, one slice resident at a
    /// time.
    pub fn save_tiff(&self, path: &Path) -> Result<()> {
        let file = File::create(path).map_err(|e| AlignError::io(path, e))?;
        let mut encoder = TiffEncoder::new(BufWriter::new(file)).map_err(|e| AlignError::encode(path, e))?;
        for index in 0..self.slices.len() {
            let page = self.render_page(index)?;
            encoder
                .write_image::<colortype::RGB8>(self.width, self.height, page.as_raw())
                .map_err(|e| AlignError::encode(path, e))?;
        }
        tracing::info!(
            path = %path.display(),
            pages = self.slices.len(),
            width = self.width,
            height = self.height,
            "composite saved"
        );
        Ok(())
    }
}
