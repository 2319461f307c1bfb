use rayon::prelude::*;
use std::collections::HashMap;

use super::orb::Feature;
use crate::landmarks::Point;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeatureMatch {
    pub reference_idx: usize,
    pub moving_idx: usize,
    pub distance: u32,
}

pub fn hamming_distance(a: &[u8; 32], b: &[u8; 32]) -> u32 {
    a.iter().zip(b).map(|(x, y)| (x ^ y).count_ones()).sum()
}

/// Nearest-neighbour descriptor matching from `moving` into `reference`.
///
/// A match is kept when its Hamming distance is below `distance_threshold`
/// and the best distance is under `ratio` times the second best. When two
/// moving features claim the same reference feature only the closer one is
/// kept.
pub fn match_features(
    reference: &[Feature],
    moving: &[Feature],
    distance_threshold: u32,
    ratio: f32,
) -> Vec<FeatureMatch> {
    let candidates: Vec<FeatureMatch> = moving
        .par_iter()
        .enumerate()
        .filter_map(|(moving_idx, feature)| {
            let mut best = (u32::MAX, 0usize);
            let mut second = u32::MAX;
            for (reference_idx, candidate) in reference.iter().enumerate() {
                let distance = hamming_distance(&feature.descriptor, &candidate.descriptor);
                if distance < best.0 {
                    second = best.0;
                    best = (distance, reference_idx);
                } else if distance < second {
                    second = distance;
                }
            }

            let distinctive = second == u32::MAX || (best.0 as f32) < ratio * second as f32;
            (best.0 < distance_threshold && distinctive).then_some(FeatureMatch {
                reference_idx: best.1,
                moving_idx,
                distance: best.0,
            })
        })
        .collect();

    let mut unique: HashMap<usize, FeatureMatch> = HashMap::with_capacity(candidates.len());
    for m in candidates {
        unique
            .entry(m.reference_idx)
            .and_modify(|kept| {
                if m.distance < kept.distance {
                    *kept = m;
                }
            })
            .or_insert(m);
    }
    let mut matches: Vec<FeatureMatch> = unique.into_values().collect();
    matches.sort_by_key(|m| (m.distance, m.moving_idx));
    matches
}

/// `(moving, reference)` point pairs for each match.
pub fn matched_points(reference: &[Feature], moving: &[Feature], matches: &[FeatureMatch]) -> Vec<(Point, Point)> {
    matches
        .iter()
        .map(|m| {
            let r = &reference[m.reference_idx].keypoint;
            let s = &moving[m.moving_idx].keypoint;
            (Point::new(s.x as f64, s.y as f64), Point::new(r.x as f64, r.y as f64))
        })
        .collect()
}
