use serde::{Deserialize, Serialize};

/// Largest `width * height * channels` a working series may hold: a third of
/// the 32-bit signed addressable range.
pub const DEFAULT_PIXEL_BUDGET: u64 = i32::MAX as u64 / 3;

/// Geometry of one series (one resolution level / layout) inside a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeriesInfo {
    pub width: u32,
    pub height: u32,
    pub channels: u8,
    pub bytes_per_sample: u8,
    /// Planes stored in this series; each one is an addressable image.
    pub image_count: usize,
}

impl SeriesInfo {
    pub fn new(width: u32, height: u32, channels: u8) -> Self {
        Self {
            width,
            height,
            channels,
            bytes_per_sample: 1,
            image_count: 1,
        }
    }

    pub fn with_image_count(mut self, image_count: usize) -> Self {
        self.image_count = image_count;
        self
    }

    pub fn with_bytes_per_sample(mut self, bytes_per_sample: u8) -> Self {
        self.bytes_per_sample = bytes_per_sample;
        self
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// `width * height * channels`, the quantity held against the pixel budget.
    pub fn pixel_load(&self) -> u64 {
        self.width as u64 * self.height as u64 * self.channels.max(1) as u64
    }

    pub fn exceeds_budget(&self, pixel_budget: u64) -> bool {
        self.pixel_load() > pixel_budget
    }

    /// Bytes needed to hold every plane of this series decoded.
    pub fn byte_size(&self) -> u64 {
        self.pixel_load() * self.bytes_per_sample.max(1) as u64 * self.image_count as u64
    }
}

/// First-fit selection in declaration order: the first series whose pixel
/// load stays within budget. A later, smaller series is never preferred over
/// an earlier one that fits.
pub fn select_working_series(series: &[SeriesInfo], pixel_budget: u64) -> Option<usize> {
    series.iter().position(|s| !s.exceeds_budget(pixel_budget))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pixel_load_counts_channels() {
        let rgb = SeriesInfo::new(100, 50, 3);
        assert_eq!(rgb.pixel_load(), 15_000);
        assert_eq!(rgb.with_bytes_per_sample(2).with_image_count(4).byte_size(), 120_000);
    }

    #[test]
    fn test_budget_boundary() {
        let budget = 30_000;
        assert!(!SeriesInfo::new(100, 100, 3).exceeds_budget(budget));
        assert!(SeriesInfo::new(100, 101, 3).exceeds_budget(budget));
    }

    #[test]
    fn test_first_fit_not_smallest_fit() {
        let budget = DEFAULT_PIXEL_BUDGET;
        let series = [
            SeriesInfo::new(60_000, 40_000, 3),
            SeriesInfo::new(15_000, 10_000, 3),
            SeriesInfo::new(3_750, 2_500, 3),
        ];
        assert!(series[0].exceeds_budget(budget));
        assert_eq!(select_working_series(&series, budget), Some(1));
    }

    #[test]
    fn test_all_series_oversize() {
        let series = [SeriesInfo::new(50_000, 50_000, 3), SeriesInfo::new(40_000, 40_000, 3)];
        assert_eq!(select_working_series(&series, DEFAULT_PIXEL_BUDGET), None);
    }

    #[test]
    fn test_full_resolution_fits() {
        let series = [SeriesInfo::new(1024, 768, 3), SeriesInfo::new(512, 384, 3)];
        assert_eq!(select_working_series(&series, DEFAULT_PIXEL_BUDGET), Some(0));
    }
}
