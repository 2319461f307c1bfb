use rand::{rngs::StdRng, seq::index, SeedableRng};

use crate::config::RansacConfig;
use crate::landmarks::Point;
use crate::registration::{solve, AffineTransform, TransformModel};

/// Points drawn per hypothesis; three correspondences fix an affine map.
const SAMPLE_SIZE: usize = 3;

#[derive(Debug, Clone)]
pub struct RansacFit {
    pub transform: AffineTransform,
    /// Indices into the input pairs that agree with `transform`.
    pub inliers: Vec<usize>,
    pub iterations: usize,
}

impl RansacFit {
    pub fn inlier_ratio(&self, total: usize) -> f32 {
        if total == 0 {
            0.0
        } else {
            self.inliers.len() as f32 / total as f32
        }
    }
}

fn inliers_of(transform: &AffineTransform, pairs: &[(Point, Point)], threshold: f64) -> Vec<usize> {
    pairs
        .iter()
        .enumerate()
        .filter(|(_, (moving, reference))| transform.apply(*moving).distance(*reference) < threshold)
        .map(|(i, _)| i)
        .collect()
}

/// Robust fit of `(moving, reference)` pairs.
///
/// Draws minimal samples from a seeded generator so a run is reproducible,
/// keeps the hypothesis with most inliers and refits on those with least
/// squares. `None` when no hypothesis reaches `config.min_inliers`.
pub fn estimate(
    pairs: &[(Point, Point)],
    model: TransformModel,
    config: &RansacConfig,
    tolerance: f64,
) -> Option<RansacFit> {
    let min_inliers = config.min_inliers.max(SAMPLE_SIZE);
    if pairs.len() < min_inliers {
        return None;
    }

    let mut rng = StdRng::seed_from_u64(config.seed);
    let mut best: Option<(AffineTransform, Vec<usize>)> = None;
    let mut iterations = 0;

    for _ in 0..config.max_iterations {
        iterations += 1;
        let sample = index::sample(&mut rng, pairs.len(), SAMPLE_SIZE);
        let (moving, reference): (Vec<Point>, Vec<Point>) = sample.iter().map(|i| pairs[i]).unzip();

        let Ok(hypothesis) = solve(&reference, &moving, model, tolerance, 0) else {
            continue;
        };
        let inliers = inliers_of(&hypothesis, pairs, config.inlier_threshold);
        if best.as_ref().map_or(true, |(_, b)| inliers.len() > b.len()) {
            let done = inliers.len() == pairs.len();
            best = Some((hypothesis, inliers));
            if done {
                break;
            }
        }
    }

    let (hypothesis, inliers) = best?;
    if inliers.len() < min_inliers {
        return None;
    }

    let (moving, reference): (Vec<Point>, Vec<Point>) = inliers.iter().map(|&i| pairs[i]).unzip();
    let transform = solve(&reference, &moving, model, tolerance, 0).unwrap_or(hypothesis);
    let inliers = inliers_of(&transform, pairs, config.inlier_threshold);

    Some(RansacFit {
        transform,
        inliers,
        iterations,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grid_pairs(truth: &AffineTransform) -> Vec<(Point, Point)> {
        (0..5)
            .flat_map(|i| (0..4).map(move |j| Point::new(i as f64 * 23.0 + 4.0, j as f64 * 17.0 + 9.0)))
            .map(|p| (p, truth.apply(p)))
            .collect()
    }

    #[test]
    fn test_outliers_rejected() {
        let truth = AffineTransform::similarity(0.1, 1.05, 12.0, -6.0);
        let mut pairs = grid_pairs(&truth);
        pairs[3].1 = Point::new(400.0, 400.0);
        pairs[11].1 = Point::new(-50.0, 3.0);

        let fit = estimate(&pairs, TransformModel::Affine, &RansacConfig::default(), 1e-9).unwrap();
        assert_eq!(fit.inliers.len(), pairs.len() - 2);
        assert!(!fit.inliers.contains(&3) && !fit.inliers.contains(&11));
        let p = Point::new(50.0, 50.0);
        assert!(fit.transform.apply(p).distance(truth.apply(p)) < 1e-6);
    }

    #[test]
    fn test_same_seed_same_result() {
        let truth = AffineTransform::translation(3.0, 4.0);
        let mut pairs = grid_pairs(&truth);
        pairs[0].1 = Point::new(0.0, 0.0);
        let config = RansacConfig::default();
        let a = estimate(&pairs, TransformModel::Affine, &config, 1e-9).unwrap();
        let b = estimate(&pairs, TransformModel::Affine, &config, 1e-9).unwrap();
        assert_eq!(a.inliers, b.inliers);
        assert_eq!(a.iterations, b.iterations);
    }

    #[test]
    fn test_too_few_pairs() {
        let pairs = vec![(Point::new(0.0, 0.0), Point::new(1.0, 1.0)); 2];
        assert!(estimate(&pairs, TransformModel::Affine, &RansacConfig::default(), 1e-9).is_none());
    }
}
