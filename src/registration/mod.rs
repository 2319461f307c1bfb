//! Affine Registration Solver
//!
//! Least-squares fits from positional landmark correspondences, expressed
//! as 2x3 affine maps into the reference image's coordinate space.

pub mod solver;
pub mod transform;

use serde::{Deserialize, Serialize};

pub use solver::{rms_residual, solve, TransformModel};
pub use transform::AffineTransform;

use crate::landmarks::Point;
use crate::Result;

/// Transform of one image into the reference frame.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Registration {
    pub image: usize,
    pub transform: AffineTransform,
    pub residual: f64,
}

impl Registration {
    pub fn identity(image: usize) -> Self {
        Self {
            image,
            transform: AffineTransform::identity(),
            residual: 0.0,
        }
    }
}

/// Registers every landmark set onto `sets[reference]`.
///
/// The reference maps by identity. Each other image succeeds or fails on its
/// own, so one degenerate set leaves the rest usable.
pub fn register_to_reference(
    sets: &[Vec<Point>],
    reference: usize,
    model: TransformModel,
    tolerance: f64,
) -> Vec<Result<Registration>> {
    let anchor = sets.get(reference).map(Vec::as_slice).unwrap_or_default();
    sets.iter()
        .enumerate()
        .map(|(image, points)| {
            if image == reference {
                return Ok(Registration::identity(image));
            }
            let transform = solve(anchor, points, model, tolerance, image)?;
            let residual = rms_residual(&transform, anchor, points);
            tracing::debug!(image, reference, residual, "landmark registration solved");
            Ok(Registration {
                image,
                transform,
                residual,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::AlignError;

    #[test]
    fn test_failures_stay_per_image() {
        let good = vec![Point::new(0.0, 0.0), Point::new(40.0, 0.0), Point::new(0.0, 30.0)];
        let shifted: Vec<Point> = good.iter().map(|p| Point::new(p.x - 5.0, p.y + 2.0)).collect();
        let collinear = vec![Point::new(0.0, 0.0), Point::new(1.0, 1.0), Point::new(2.0, 2.0)];

        let results = register_to_reference(&[good, collinear, shifted], 0, TransformModel::Affine, 1e-9);
        assert!(results[0].as_ref().unwrap().transform.is_identity(0.0));
        assert!(matches!(results[1], Err(AlignError::DegenerateLandmarks { image: 1 })));
        let (dx, dy) = results[2].as_ref().unwrap().transform.translation_part();
        assert!((dx - 5.0).abs() < 1e-9 && (dy + 2.0).abs() < 1e-9);
    }
}
