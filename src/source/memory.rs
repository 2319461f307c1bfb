use image::DynamicImage;
use std::sync::Arc;

use super::reader::{check_plane, SeriesReader};
use super::series::SeriesInfo;
use crate::{AlignError, Result};

/// Series held in memory: a re-opened composite or synthetic input.
#[derive(Clone)]
pub struct MemoryReader {
    planes: Arc<Vec<Vec<DynamicImage>>>,
    series: Vec<SeriesInfo>,
}

impl MemoryReader {
    /// One entry per series, each holding that series' planes. Every plane
    /// of a series must share its geometry.
    pub fn new(planes: Vec<Vec<DynamicImage>>) -> Result<Self> {
        let mut series = Vec::with_capacity(planes.len());
        for (index, images) in planes.iter().enumerate() {
            let first = images.first().ok_or(AlignError::IndexOutOfRange {
                index: index as isize,
                len: 0,
            })?;
            let (width, height) = (first.width(), first.height());
            if images.iter().any(|img| img.width() != width || img.height() != height) {
                return Err(AlignError::Config(format!(
                    "in-memory series {index} mixes plane sizes"
                )));
            }
            let color = first.color();
            let channels = color.channel_count();
            series.push(
                SeriesInfo::new(width, height, channels)
                    .with_bytes_per_sample((color.bytes_per_pixel() / channels.max(1)).max(1))
                    .with_image_count(images.len()),
            );
        }
        if series.is_empty() {
            return Err(AlignError::Config("in-memory source without series".to_string()));
        }

        Ok(Self {
            planes: Arc::new(planes),
            series,
        })
    }

    /// A single series holding one image.
    pub fn single(image: DynamicImage) -> Self {
        let color = image.color();
        let channels = color.channel_count();
        let info = SeriesInfo::new(image.width(), image.height(), channels)
            .with_bytes_per_sample((color.bytes_per_pixel() / channels.max(1)).max(1));
        Self {
            planes: Arc::new(vec![vec![image]]),
            series: vec![info],
        }
    }
}

impl SeriesReader for MemoryReader {
    fn format_name(&self) -> &'static str {
        "memory"
    }

    fn series(&self) -> &[SeriesInfo] {
        &self.series
    }

    fn read_image(&mut self, series: usize, image: usize) -> Result<DynamicImage> {
        check_plane(&self.series, series, image)?;
        Ok(self.planes[series][image].clone())
    }

    fn reopen(&self) -> Result<Box<dyn SeriesReader>> {
        Ok(Box::new(self.clone()))
    }
}
