use image::RgbImage;
use rayon::prelude::*;

use crate::landmarks::Point;
use crate::registration::AffineTransform;
use crate::{AlignError, Result};

/// Resamples `image` through `transform` into a `width x height` output.
///
/// Each output pixel is pulled back through the inverse map and
/// interpolated bilinearly; pixels that land outside the source stay black.
/// Rows are filled in parallel.
pub fn warp_rgb(
    image: &RgbImage,
    transform: &AffineTransform,
    width: u32,
    height: u32,
    index: usize,
) -> Result<RgbImage> {
    let inverse = transform
        .inverse()
        .ok_or(AlignError::DegenerateLandmarks { image: index })?;

    let mut out = RgbImage::new(width, height);
    let row_len = width as usize * 3;
    if row_len == 0 {
        return Ok(out);
    }
    out.par_chunks_mut(row_len).enumerate().for_each(|(y, row)| {
        for x in 0..width as usize {
            let src = inverse.apply(Point::new(x as f64, y as f64));
            if let Some(rgb) = bilinear(image, src.x, src.y) {
                row[x * 3..x * 3 + 3].copy_from_slice(&rgb);
            }
        }
    });
    Ok(out)
}

fn bilinear(image: &RgbImage, x: f64, y: f64) -> Option<[u8; 3]> {
    let (width, height) = image.dimensions();
    if width == 0 || height == 0 {
        return None;
    }
    let (max_x, max_y) = (width as f64 - 1.0, height as f64 - 1.0);
    // Half a pixel of slack around the border.
    if x < -0.5 || y < -0.5 || x > max_x + 0.5 || y > max_y + 0.5 {
        return None;
    }
    let x = x.clamp(0.0, max_x);
    let y = y.clamp(0.0, max_y);

    let x1 = x.floor() as u32;
    let y1 = y.floor() as u32;
    let x2 = (x1 + 1).min(width - 1);
    let y2 = (y1 + 1).min(height - 1);
    let fx = x - x1 as f64;
    let fy = y - y1 as f64;

    let p11 = image.get_pixel(x1, y1).0;
    let p21 = image.get_pixel(x2, y1).0;
    let p12 = image.get_pixel(x1, y2).0;
    let p22 = image.get_pixel(x2, y2).0;

    let mut rgb = [0u8; 3];
    for c in 0..3 {
        let v = p11[c] as f64 * (1.0 - fx) * (1.0 - fy)
            + p21[c] as f64 * fx * (1.0 - fy)
            + p12[c] as f64 * (1.0 - fx) * fy
            + p22[c] as f64 * fx * fy;
        rgb[c] = v.round().clamp(0.0, 255.0) as u8;
    }
    Some(rgb)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    fn gradient() -> RgbImage {
        RgbImage::from_fn(20, 10, |x, y| Rgb([x as u8 * 10, y as u8 * 20, 99]))
    }

    #[test]
    fn test_identity_is_lossless() {
        let image = gradient();
        let out = warp_rgb(&image, &AffineTransform::identity(), 20, 10, 0).unwrap();
        assert_eq!(out, image);
    }

    #[test]
    fn test_integer_translation_moves_pixels() {
        let image = gradient();
        let out = warp_rgb(&image, &AffineTransform::translation(5.0, 2.0), 30, 15, 0).unwrap();
        assert_eq!(out.get_pixel(5, 2), image.get_pixel(0, 0));
        assert_eq!(out.get_pixel(12, 9), image.get_pixel(7, 7));
        assert_eq!(out.get_pixel(0, 0), &Rgb([0, 0, 0]));
        assert_eq!(out.get_pixel(29, 14), &Rgb([0, 0, 0]));
    }

    #[test]
    fn test_singular_transform_rejected() {
        let result = warp_rgb(&gradient(), &AffineTransform::scale(0.0, 1.0), 20, 10, 3);
        assert!(matches!(result, Err(AlignError::DegenerateLandmarks { image: 3 })));
    }
}
