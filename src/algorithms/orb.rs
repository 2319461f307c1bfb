use image::{imageops, GrayImage};
use lazy_static::lazy_static;
use rand::{rngs::StdRng, Rng, SeedableRng};
use rayon::prelude::*;
use std::cmp::Ordering;
use std::collections::HashSet;

use crate::config::FeatureConfig;

/// Radius of the intensity-centroid disc used for orientation.
const ORIENTATION_RADIUS: i32 = 15;
/// Largest coordinate in the BRIEF test pattern.
const PATTERN_EXTENT: i32 = 13;
/// Keypoints closer than this to a border are not described.
const EDGE: u32 = 19;
const SUPPRESSION_CELL: f32 = 5.0;

lazy_static! {
    /// 256 point-pair tests drawn once from a fixed seed, so descriptors are
    /// comparable across runs and processes.
    static ref BRIEF_PATTERN: Vec<(i8, i8, i8, i8)> = {
        let mut rng = StdRng::seed_from_u64(0x0b_41ef);
        (0..256)
            .map(|_| {
                let mut coord = || {
                    // Triangular spread, denser near the keypoint.
                    let v: i32 = rng.gen_range(-PATTERN_EXTENT..=PATTERN_EXTENT)
                        + rng.gen_range(-PATTERN_EXTENT..=PATTERN_EXTENT);
                    (v / 2) as i8
                };
                (coord(), coord(), coord(), coord())
            })
            .collect()
    };
}

#[derive(Debug, Clone, Copy)]
pub struct Keypoint {
    /// Position in the input image's pixel space.
    pub x: f32,
    pub y: f32,
    pub response: f32,
    pub angle: f32,
    pub octave: u8,
}

#[derive(Debug, Clone)]
pub struct Feature {
    pub keypoint: Keypoint,
    pub descriptor: [u8; 32],
}

/// Oriented FAST keypoints with rotated BRIEF descriptors over a scale
/// pyramid.
#[derive(Debug, Clone)]
pub struct OrbExtractor {
    pub fast_threshold: u8,
    pub max_keypoints: usize,
    pub pyramid_levels: u8,
    pub scale_factor: f32,
    /// Images larger than this are downsampled before detection.
    pub max_detection_side: u32,
}

impl Default for OrbExtractor {
    fn default() -> Self {
        Self::from_config(&FeatureConfig::default())
    }
}

impl OrbExtractor {
    pub fn from_config(config: &FeatureConfig) -> Self {
        Self {
            fast_threshold: config.fast_threshold,
            max_keypoints: config.max_keypoints,
            pyramid_levels: config.pyramid_levels.max(1),
            scale_factor: config.scale_factor,
            max_detection_side: config.max_detection_side,
        }
    }

    /// Strongest features across all pyramid levels, coordinates in the
    /// input image's pixel space.
    pub fn extract(&self, image: &GrayImage) -> Vec<Feature> {
        let longest = image.width().max(image.height());
        let (base, shrink) = if self.max_detection_side > 0 && longest > self.max_detection_side {
            let factor = longest as f32 / self.max_detection_side as f32;
            let resized = imageops::resize(
                image,
                ((image.width() as f32 / factor) as u32).max(1),
                ((image.height() as f32 / factor) as u32).max(1),
                imageops::FilterType::Triangle,
            );
            (resized, factor)
        } else {
            (image.clone(), 1.0)
        };

        let pyramid = self.build_pyramid(base);
        let mut features: Vec<Feature> = pyramid
            .par_iter()
            .enumerate()
            .flat_map_iter(|(octave, (level, scale))| self.extract_level(level, octave as u8, *scale * shrink))
            .collect();

        features.par_sort_by(|a, b| {
            b.keypoint
                .response
                .partial_cmp(&a.keypoint.response)
                .unwrap_or(Ordering::Equal)
        });
        features.truncate(self.max_keypoints);
        features
    }

    fn build_pyramid(&self, image: GrayImage) -> Vec<(GrayImage, f32)> {
        let min_side = 2 * EDGE + 8;
        let mut scale = 1.0;
        let mut pyramid = vec![(image, 1.0)];

        for _ in 1..self.pyramid_levels {
            let Some((last, _)) = pyramid.last() else { break };
            let width = (last.width() as f32 / self.scale_factor) as u32;
            let height = (last.height() as f32 / self.scale_factor) as u32;
            if width < min_side || height < min_side {
                break;
            }
            scale *= self.scale_factor;
            let level = imageops::resize(last, width, height, imageops::FilterType::Gaussian);
            pyramid.push((level, scale));
        }
        pyramid
    }

    /// `scale` maps level coordinates back to input coordinates.
    fn extract_level(&self, image: &GrayImage, octave: u8, scale: f32) -> Vec<Feature> {
        if image.width() <= 2 * EDGE || image.height() <= 2 * EDGE {
            return Vec::new();
        }
        let corners = self.detect_corners(image);
        corners
            .into_par_iter()
            .map(|(x, y, response)| {
                let angle = orientation(image, x, y);
                let descriptor = describe(image, x, y, angle);
                Feature {
                    keypoint: Keypoint {
                        x: x as f32 * scale,
                        y: y as f32 * scale,
                        response,
                        angle,
                        octave,
                    },
                    descriptor,
                }
            })
            .collect()
    }

    fn detect_corners(&self, image: &GrayImage) -> Vec<(u32, u32, f32)> {
        let (width, height) = image.dimensions();
        let corners: Vec<(u32, u32, f32)> = (EDGE..height - EDGE)
            .into_par_iter()
            .flat_map_iter(|y| {
                (EDGE..width - EDGE).filter_map(move |x| {
                    let center = image.get_pixel(x, y)[0];
                    if self.passes_pre_check(image, x, y, center) && self.is_corner(image, x, y, center) {
                        Some((x, y, corner_response(image, x, y)))
                    } else {
                        None
                    }
                })
            })
            .collect();
        self.suppress(corners)
    }

    fn passes_pre_check(&self, image: &GrayImage, x: u32, y: u32, center: u8) -> bool {
        let bright = center.saturating_add(self.fast_threshold);
        let dark = center.saturating_sub(self.fast_threshold);
        let cardinal = [
            image.get_pixel(x, y - 3)[0],
            image.get_pixel(x + 3, y)[0],
            image.get_pixel(x, y + 3)[0],
            image.get_pixel(x - 3, y)[0],
        ];
        cardinal.iter().filter(|&&p| p > bright).count() >= 2 || cardinal.iter().filter(|&&p| p < dark).count() >= 2
    }

    /// FAST-9 on the 16-pixel Bresenham circle of radius 3.
    fn is_corner(&self, image: &GrayImage, x: u32, y: u32, center: u8) -> bool {
        const CIRCLE: [(i32, i32); 16] = [
            (0, -3), (1, -3), (2, -2), (3, -1), (3, 0), (3, 1), (2, 2), (1, 3),
            (0, 3), (-1, 3), (-2, 2), (-3, 1), (-3, 0), (-3, -1), (-2, -2), (-1, -3),
        ];
        let bright = center.saturating_add(self.fast_threshold);
        let dark = center.saturating_sub(self.fast_threshold);

        let (mut run_bright, mut run_dark) = (0, 0);
        for i in 0..CIRCLE.len() * 2 {
            let (dx, dy) = CIRCLE[i % CIRCLE.len()];
            let pixel = image.get_pixel((x as i32 + dx) as u32, (y as i32 + dy) as u32)[0];
            if pixel > bright {
                run_bright += 1;
                run_dark = 0;
            } else if pixel < dark {
                run_dark += 1;
                run_bright = 0;
            } else {
                run_bright = 0;
                run_dark = 0;
            }
            if run_bright >= 9 || run_dark >= 9 {
                return true;
            }
        }
        false
    }

    /// Grid non-maximum suppression, strongest first.
    fn suppress(&self, mut corners: Vec<(u32, u32, f32)>) -> Vec<(u32, u32, f32)> {
        corners.par_sort_by(|a, b| b.2.partial_cmp(&a.2).unwrap_or(Ordering::Equal));

        let mut occupied = HashSet::new();
        let mut selected = Vec::new();
        for corner in corners {
            let cell = (
                (corner.0 as f32 / SUPPRESSION_CELL) as i32,
                (corner.1 as f32 / SUPPRESSION_CELL) as i32,
            );
            let blocked = (-1..=1).any(|dy| (-1..=1).any(|dx| occupied.contains(&(cell.0 + dx, cell.1 + dy))));
            if !blocked {
                occupied.insert(cell);
                selected.push(corner);
                if selected.len() >= self.max_keypoints {
                    break;
                }
            }
        }
        selected
    }
}

/// Standard deviation of the 5x5 neighbourhood.
fn corner_response(image: &GrayImage, x: u32, y: u32) -> f32 {
    let mut sum = 0.0;
    let mut sum_sq = 0.0;
    for dy in -2..=2i32 {
        for dx in -2..=2i32 {
            let v = image.get_pixel((x as i32 + dx) as u32, (y as i32 + dy) as u32)[0] as f32;
            sum += v;
            sum_sq += v * v;
        }
    }
    let mean = sum / 25.0;
    (sum_sq / 25.0 - mean * mean).max(0.0).sqrt()
}

/// Intensity-centroid angle.
fn orientation(image: &GrayImage, x: u32, y: u32) -> f32 {
    let (mut m01, mut m10) = (0.0f32, 0.0f32);
    for dy in -ORIENTATION_RADIUS..=ORIENTATION_RADIUS {
        for dx in -ORIENTATION_RADIUS..=ORIENTATION_RADIUS {
            if dx * dx + dy * dy > ORIENTATION_RADIUS * ORIENTATION_RADIUS {
                continue;
            }
            let px = x as i32 + dx;
            let py = y as i32 + dy;
            if px < 0 || py < 0 || px as u32 >= image.width() || py as u32 >= image.height() {
                continue;
            }
            let v = image.get_pixel(px as u32, py as u32)[0] as f32;
            m01 += v * dy as f32;
            m10 += v * dx as f32;
        }
    }
    m01.atan2(m10)
}

/// Rotated BRIEF: 256 intensity comparisons steered by `angle`.
fn describe(image: &GrayImage, x: u32, y: u32, angle: f32) -> [u8; 32] {
    let (sin, cos) = angle.sin_cos();
    let (max_x, max_y) = (image.width() as i32 - 1, image.height() as i32 - 1);
    let sample = |dx: i8, dy: i8| {
        let rx = (dx as f32 * cos - dy as f32 * sin).round() as i32;
        let ry = (dx as f32 * sin + dy as f32 * cos).round() as i32;
        let px = (x as i32 + rx).clamp(0, max_x) as u32;
        let py = (y as i32 + ry).clamp(0, max_y) as u32;
        image.get_pixel(px, py)[0]
    };

    let mut descriptor = [0u8; 32];
    for (byte, tests) in descriptor.iter_mut().zip(BRIEF_PATTERN.chunks(8)) {
        for (bit, &(x1, y1, x2, y2)) in tests.iter().enumerate() {
            if sample(x1, y1) < sample(x2, y2) {
                *byte |= 1 << bit;
            }
        }
    }
    descriptor
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    /// Dark field with scattered bright squares of varied size and level.
    fn squares(width: u32, height: u32) -> GrayImage {
        let rects: Vec<(u32, u32, u32, u8)> = (0..40u32)
            .map(|k| {
                let x = 20 + (k * 53) % (width - 40);
                let y = 20 + (k * 31 + k * k * 7) % (height - 40);
                (x, y, 6 + (k * 5) % 10, 120 + ((k * 37) % 130) as u8)
            })
            .collect();
        GrayImage::from_fn(width, height, |x, y| {
            let v = rects
                .iter()
                .filter(|&&(rx, ry, size, _)| x >= rx && x < rx + size && y >= ry && y < ry + size)
                .map(|r| r.3)
                .max()
                .unwrap_or(20);
            Luma([v])
        })
    }

    #[test]
    fn test_pattern_within_patch() {
        assert_eq!(BRIEF_PATTERN.len(), 256);
        let limit = PATTERN_EXTENT as i8;
        assert!(BRIEF_PATTERN
            .iter()
            .all(|&(a, b, c, d)| [a, b, c, d].iter().all(|v| v.abs() <= limit)));
    }

    #[test]
    fn test_flat_image_has_no_features() {
        let flat = GrayImage::from_pixel(120, 120, Luma([90]));
        assert!(OrbExtractor::default().extract(&flat).is_empty());
    }

    #[test]
    fn test_features_found_and_bounded() {
        let extractor = OrbExtractor {
            max_keypoints: 40,
            ..OrbExtractor::default()
        };
        let image = squares(160, 120);
        let features = extractor.extract(&image);
        assert!(!features.is_empty());
        assert!(features.len() <= 40);
        assert!(features
            .iter()
            .all(|f| f.keypoint.x >= 0.0 && f.keypoint.x < 160.0 && f.keypoint.y < 120.0));
    }

    #[test]
    fn test_downsampled_detection_reports_input_coordinates() {
        let extractor = OrbExtractor {
            max_detection_side: 100,
            pyramid_levels: 1,
            ..OrbExtractor::default()
        };
        let features = extractor.extract(&squares(200, 200));
        assert!(features.iter().any(|f| f.keypoint.x > 100.0));
    }
}
