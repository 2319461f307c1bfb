//! Chained pairwise registration from detected features.

use image::GrayImage;
use rayon::prelude::*;

use super::matching::{match_features, matched_points};
use super::orb::{Feature, OrbExtractor};
use super::ransac;
use crate::config::{FeatureConfig, RansacConfig};
use crate::logging::AlignmentSpan;
use crate::registration::{AffineTransform, TransformModel};
use crate::{AlignError, Result};

/// Outcome of registering one consecutive pair.
#[derive(Debug, Clone)]
pub struct PairRegistration {
    pub reference: usize,
    pub moving: usize,
    /// Maps `moving` pixels onto `reference` pixels.
    pub transform: AffineTransform,
    pub matches: usize,
    pub inliers: usize,
}

#[derive(Debug, Default)]
pub struct AutoRegistration {
    /// Per image, the map into the first image's frame. `None` where the
    /// image could not be chained.
    pub transforms: Vec<Option<AffineTransform>>,
    pub pairs: Vec<PairRegistration>,
    pub failures: Vec<AlignError>,
}

impl AutoRegistration {
    pub fn registered(&self) -> usize {
        self.transforms.iter().filter(|t| t.is_some()).count()
    }

    /// Re-expresses every transform in the frame of image `reference`.
    /// `None` when that image itself is unregistered.
    pub fn relative_to(&self, reference: usize) -> Option<Vec<Option<AffineTransform>>> {
        let anchor = self.transforms.get(reference).copied().flatten()?.inverse()?;
        Some(
            self.transforms
                .iter()
                .map(|t| t.map(|t| anchor.compose(&t)))
                .collect(),
        )
    }
}

pub struct AutoRegistrar {
    pub extractor: OrbExtractor,
    pub distance_threshold: u32,
    pub ratio_threshold: f32,
    pub ransac: RansacConfig,
    pub model: TransformModel,
    pub tolerance: f64,
}

impl AutoRegistrar {
    pub fn new(features: &FeatureConfig, ransac: &RansacConfig, model: TransformModel, tolerance: f64) -> Self {
        Self {
            extractor: OrbExtractor::from_config(features),
            distance_threshold: features.distance_threshold,
            ratio_threshold: features.ratio_threshold,
            ransac: ransac.clone(),
            model,
            tolerance,
        }
    }

    /// Map taking `moving` features onto `reference` features.
    pub fn register_pair(
        &self,
        reference: (usize, &[Feature]),
        moving: (usize, &[Feature]),
        span: Option<&AlignmentSpan>,
    ) -> Result<PairRegistration> {
        let (reference_idx, reference_features) = reference;
        let (moving_idx, moving_features) = moving;

        let matches = match_features(
            reference_features,
            moving_features,
            self.distance_threshold,
            self.ratio_threshold,
        );
        if let Some(span) = span {
            span.record_matching(
                reference_idx,
                moving_idx,
                reference_features.len().min(moving_features.len()),
                matches.len(),
            );
        }

        let insufficient = |matches: usize| AlignError::InsufficientCorrespondence {
            reference: reference_idx,
            moving: moving_idx,
            matches,
        };
        if matches.len() < crate::landmarks::MINIMUM_LANDMARKS {
            return Err(insufficient(matches.len()));
        }

        let pairs = matched_points(reference_features, moving_features, &matches);
        let fit = ransac::estimate(&pairs, self.model, &self.ransac, self.tolerance)
            .ok_or_else(|| insufficient(matches.len()))?;
        if let Some(span) = span {
            span.record_ransac(reference_idx, moving_idx, fit.iterations, fit.inliers.len());
        }

        Ok(PairRegistration {
            reference: reference_idx,
            moving: moving_idx,
            transform: fit.transform,
            matches: matches.len(),
            inliers: fit.inliers.len(),
        })
    }

    /// Registers `images[i]` against the most recent successfully registered
    /// predecessor and chains the pair maps by composition, so every image is
    /// expressed in the frame of image 0. A failed pair is recorded and the
    /// next image is tried against the same predecessor.
    pub fn register(&self, images: &[GrayImage], span: Option<&AlignmentSpan>) -> AutoRegistration {
        let features: Vec<Vec<Feature>> = images.par_iter().map(|image| self.extractor.extract(image)).collect();
        if let Some(span) = span {
            for (image, f) in features.iter().enumerate() {
                span.record_feature_detection(image, f.len());
            }
        }

        let mut result = AutoRegistration {
            transforms: vec![None; images.len()],
            ..AutoRegistration::default()
        };
        if images.is_empty() {
            return result;
        }
        result.transforms[0] = Some(AffineTransform::identity());

        let mut anchor = 0;
        for moving in 1..images.len() {
            match self.register_pair((anchor, &features[anchor]), (moving, &features[moving]), span) {
                Ok(pair) => {
                    let to_anchor = result.transforms[anchor].unwrap_or_default();
                    result.transforms[moving] = Some(to_anchor.compose(&pair.transform));
                    tracing::debug!(
                        reference = anchor,
                        moving,
                        matches = pair.matches,
                        inliers = pair.inliers,
                        "pair registered"
                    );
                    result.pairs.push(pair);
                    anchor = moving;
                }
                Err(error) => {
                    if let Some(span) = span {
                        span.record_pair_failure(anchor, moving, &error);
                    }
                    result.failures.push(error);
                }
            }
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_relative_to_reanchors_chain() {
        let shift = AffineTransform::translation(10.0, 0.0);
        let result = AutoRegistration {
            transforms: vec![Some(AffineTransform::identity()), Some(shift), None],
            ..AutoRegistration::default()
        };

        let relative = result.relative_to(1).unwrap();
        let (dx, _) = relative[0].unwrap().translation_part();
        assert!((dx + 10.0).abs() < 1e-12);
        assert!(relative[1].unwrap().is_identity(1e-12));
        assert!(relative[2].is_none());
        assert!(result.relative_to(2).is_none());
        assert_eq!(result.registered(), 2);
    }

    #[test]
    fn test_featureless_pair_fails_alone() {
        let registrar = AutoRegistrar::new(
            &FeatureConfig::default(),
            &RansacConfig::default(),
            TransformModel::Affine,
            1e-9,
        );
        let flat = GrayImage::from_pixel(80, 80, image::Luma([40]));
        let result = registrar.register(&[flat.clone(), flat.clone(), flat], None);

        assert_eq!(result.failures.len(), 2);
        assert!(matches!(
            result.failures[1],
            AlignError::InsufficientCorrespondence { reference: 0, moving: 2, matches: 0 }
        ));
        assert!(result.transforms[0].is_some());
        assert_eq!(result.registered(), 1);
    }
}
