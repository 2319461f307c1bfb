use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};

use super::transform::AffineTransform;
use crate::landmarks::{Point, MINIMUM_LANDMARKS};
use crate::{AlignError, Result};

/// Degrees of freedom allowed in a fit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransformModel {
    /// Full 6-coefficient affine map.
    Affine,
    /// Rotation, uniform scale and translation.
    Similarity,
    /// Independent axis scales and translation, no rotation or shear.
    ScaleTranslation,
    Translation,
}

impl TransformModel {
    /// Model chosen by the user-facing "rotate" switch.
    pub fn from_rotate(rotate: bool) -> Self {
        if rotate {
            TransformModel::Affine
        } else {
            TransformModel::ScaleTranslation
        }
    }

    pub fn unknowns(self) -> usize {
        match self {
            TransformModel::Affine => 6,
            TransformModel::Similarity | TransformModel::ScaleTranslation => 4,
            TransformModel::Translation => 2,
        }
    }

    /// The two design-matrix rows contributed by source point `p`.
    fn rows(self, p: Point) -> [[f64; 6]; 2] {
        let Point { x, y } = p;
        match self {
            TransformModel::Affine => [[x, y, 1.0, 0.0, 0.0, 0.0], [0.0, 0.0, 0.0, x, y, 1.0]],
            TransformModel::Similarity => [[x, -y, 1.0, 0.0, 0.0, 0.0], [y, x, 0.0, 1.0, 0.0, 0.0]],
            TransformModel::ScaleTranslation => [[x, 0.0, 1.0, 0.0, 0.0, 0.0], [0.0, y, 0.0, 1.0, 0.0, 0.0]],
            TransformModel::Translation => [[1.0, 0.0, 0.0, 0.0, 0.0, 0.0], [0.0, 1.0, 0.0, 0.0, 0.0, 0.0]],
        }
    }

    fn to_transform(self, c: &Array1<f64>) -> AffineTransform {
        match self {
            TransformModel::Affine => AffineTransform::new([[c[0], c[1], c[2]], [c[3], c[4], c[5]]]),
            TransformModel::Similarity => AffineTransform::new([[c[0], -c[1], c[2]], [c[1], c[0], c[3]]]),
            TransformModel::ScaleTranslation => AffineTransform::new([[c[0], 0.0, c[2]], [0.0, c[1], c[3]]]),
            TransformModel::Translation => AffineTransform::translation(c[0], c[1]),
        }
    }
}

/// Centroid shift and isotropic scale bringing a point set to unit RMS
/// radius around the origin.
fn normalization(points: &[Point]) -> AffineTransform {
    let n = points.len() as f64;
    let cx = points.iter().map(|p| p.x).sum::<f64>() / n;
    let cy = points.iter().map(|p| p.y).sum::<f64>() / n;
    let rms = (points
        .iter()
        .map(|p| (p.x - cx).powi(2) + (p.y - cy).powi(2))
        .sum::<f64>()
        / n)
        .sqrt();
    let k = if rms > f64::EPSILON { 1.0 / rms } else { 1.0 };
    AffineTransform::new([[k, 0.0, -k * cx], [0.0, k, -k * cy]])
}

/// Solves `m x = rhs` by Gaussian elimination with partial pivoting. A pivot
/// smaller than `tolerance` relative to the largest diagonal entry means the
/// system is singular.
fn solve_linear(mut m: Array2<f64>, mut rhs: Array1<f64>, tolerance: f64) -> Option<Array1<f64>> {
    let n = rhs.len();
    let scale = m.diag().iter().fold(0.0f64, |acc, v| acc.max(v.abs()));
    if scale <= 0.0 {
        return None;
    }

    for col in 0..n {
        let pivot_row = (col..n).max_by(|&a, &b| m[[a, col]].abs().total_cmp(&m[[b, col]].abs()))?;
        if m[[pivot_row, col]].abs() < tolerance * scale {
            return None;
        }
        if pivot_row != col {
            for k in 0..n {
                m.swap([col, k], [pivot_row, k]);
            }
            rhs.swap(col, pivot_row);
        }
        for row in col + 1..n {
            let factor = m[[row, col]] / m[[col, col]];
            if factor == 0.0 {
                continue;
            }
            for k in col..n {
                m[[row, k]] -= factor * m[[col, k]];
            }
            rhs[row] -= factor * rhs[col];
        }
    }

    let mut x = Array1::zeros(n);
    for row in (0..n).rev() {
        let tail: f64 = (row + 1..n).map(|k| m[[row, k]] * x[k]).sum();
        x[row] = (rhs[row] - tail) / m[[row, row]];
    }
    Some(x)
}

/// Least-squares transform taking `source` points onto `reference` points.
///
/// Correspondence is positional. Both sets must hold the same number of
/// points, at least [`MINIMUM_LANDMARKS`]. `image` only labels the error.
pub fn solve(
    reference: &[Point],
    source: &[Point],
    model: TransformModel,
    tolerance: f64,
    image: usize,
) -> Result<AffineTransform> {
    if reference.len() != source.len() || source.len() < MINIMUM_LANDMARKS {
        return Err(AlignError::LandmarkCardinalityMismatch {
            counts: vec![reference.len(), source.len()],
        });
    }

    // One normalization for both sets keeps every model closed under it.
    let norm = normalization(source);
    let k = model.unknowns();
    let n = source.len();

    let mut design = Array2::<f64>::zeros((2 * n, k));
    let mut target = Array1::<f64>::zeros(2 * n);
    for (i, (s, r)) in source.iter().zip(reference).enumerate() {
        let s = norm.apply(*s);
        let r = norm.apply(*r);
        let rows = model.rows(s);
        for c in 0..k {
            design[[2 * i, c]] = rows[0][c];
            design[[2 * i + 1, c]] = rows[1][c];
        }
        target[2 * i] = r.x;
        target[2 * i + 1] = r.y;
    }

    let normal = design.t().dot(&design);
    let rhs = design.t().dot(&target);
    let coefficients = solve_linear(normal, rhs, tolerance).ok_or(AlignError::DegenerateLandmarks { image })?;

    let fitted = model.to_transform(&coefficients);
    let denormalize = norm.inverse().ok_or(AlignError::DegenerateLandmarks { image })?;
    let transform = denormalize.compose(&fitted).compose(&norm);

    if transform.determinant().abs() < tolerance {
        return Err(AlignError::DegenerateLandmarks { image });
    }
    Ok(transform)
}

/// Root-mean-square distance between mapped source points and their
/// reference counterparts.
pub fn rms_residual(transform: &AffineTransform, reference: &[Point], source: &[Point]) -> f64 {
    if source.is_empty() {
        return 0.0;
    }
    let sum: f64 = source
        .iter()
        .zip(reference)
        .map(|(s, r)| transform.apply(*s).distance(*r).powi(2))
        .sum();
    (sum / source.len() as f64).sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;

    const TOL: f64 = 1e-9;

    fn points(raw: &[(f64, f64)]) -> Vec<Point> {
        raw.iter().map(|&p| p.into()).collect()
    }

    #[test]
    fn test_three_points_exact() {
        let source = points(&[(0.0, 0.0), (100.0, 0.0), (0.0, 50.0)]);
        let truth = AffineTransform::new([[1.1, 0.2, 15.0], [-0.1, 0.9, -4.0]]);
        let reference: Vec<Point> = source.iter().map(|p| truth.apply(*p)).collect();

        let fit = solve(&reference, &source, TransformModel::Affine, TOL, 1).unwrap();
        assert!(rms_residual(&fit, &reference, &source) < 1e-9);
        for (a, b) in fit.matrix.iter().flatten().zip(truth.matrix.iter().flatten()) {
            assert!((a - b).abs() < 1e-9);
        }
    }

    #[test]
    fn test_scale_translation_has_no_rotation() {
        let source = points(&[(10.0, 10.0), (90.0, 15.0), (40.0, 80.0), (70.0, 60.0)]);
        let truth = AffineTransform::new([[2.0, 0.0, 3.0], [0.0, 0.5, 7.0]]);
        let reference: Vec<Point> = source.iter().map(|p| truth.apply(*p)).collect();

        let fit = solve(&reference, &source, TransformModel::from_rotate(false), TOL, 1).unwrap();
        assert_eq!(fit.matrix[0][1], 0.0);
        assert_eq!(fit.matrix[1][0], 0.0);
        assert!((fit.matrix[0][0] - 2.0).abs() < 1e-9);
        assert!((fit.matrix[1][2] - 7.0).abs() < 1e-9);
    }

    #[test]
    fn test_translation_only_averages_shift() {
        let source = points(&[(0.0, 0.0), (10.0, 0.0), (0.0, 10.0)]);
        let reference = points(&[(5.0, 1.0), (15.0, 2.0), (5.0, 12.0)]);
        let fit = solve(&reference, &source, TransformModel::Translation, TOL, 1).unwrap();
        let (dx, dy) = fit.translation_part();
        assert!((dx - 5.0).abs() < 1e-9);
        assert!((dy - 5.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_collinear_points_are_degenerate() {
        let source = points(&[(0.0, 0.0), (1.0, 1.0), (2.0, 2.0), (3.0, 3.0)]);
        let reference = points(&[(5.0, 0.0), (6.0, 1.0), (7.0, 2.0), (8.0, 3.0)]);
        let result = solve(&reference, &source, TransformModel::Affine, TOL, 4);
        assert!(matches!(result, Err(AlignError::DegenerateLandmarks { image: 4 })));
    }

    #[test]
    fn test_coincident_points_are_degenerate() {
        let source = points(&[(3.0, 3.0); 3]);
        let reference = points(&[(1.0, 1.0); 3]);
        let result = solve(&reference, &source, TransformModel::Similarity, TOL, 2);
        assert!(matches!(result, Err(AlignError::DegenerateLandmarks { image: 2 })));
    }

    #[test]
    fn test_cardinality_checked_before_solving() {
        let two = points(&[(0.0, 0.0), (1.0, 0.0)]);
        assert!(matches!(
            solve(&two, &two, TransformModel::Affine, TOL, 0),
            Err(AlignError::LandmarkCardinalityMismatch { .. })
        ));
        let three = points(&[(0.0, 0.0), (1.0, 0.0), (0.0, 1.0)]);
        let four = points(&[(0.0, 0.0), (1.0, 0.0), (0.0, 1.0), (1.0, 1.0)]);
        assert!(solve(&three, &four, TransformModel::Affine, TOL, 0).is_err());
    }
}
