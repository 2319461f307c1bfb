use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::logging::LoggingConfig;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub source: SourceConfig,
    pub registration: RegistrationConfig,
    pub features: FeatureConfig,
    pub ransac: RansacConfig,
    pub composite: CompositeConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    /// Maximum width * height * channels a working series may hold.
    pub pixel_budget: u64,
    /// Running memory estimate above which additions raise a warning.
    pub memory_budget_bytes: u64,
    pub thumbnail_side: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistrationConfig {
    pub rotate: bool,
    /// Relative pivot magnitude under which the normal equations are
    /// considered singular.
    pub degeneracy_tolerance: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FeatureConfig {
    pub fast_threshold: u8,
    pub max_keypoints: usize,
    pub pyramid_levels: u8,
    pub scale_factor: f32,
    /// Largest Hamming distance (out of 256 bits) a match may have.
    pub distance_threshold: u32,
    pub ratio_threshold: f32,
    /// Longest image side used for detection; larger images are downsampled.
    pub max_detection_side: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RansacConfig {
    pub max_iterations: usize,
    pub inlier_threshold: f64,
    pub min_inliers: usize,
    pub seed: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CompositeConfig {
    pub keep_original_pixels: bool,
    pub spill_to_disk: bool,
    pub temp_directory: Option<PathBuf>,
    /// Pause before heavy work so a busy indicator can render.
    pub loading_delay_ms: u64,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            pixel_budget: crate::source::DEFAULT_PIXEL_BUDGET,
            memory_budget_bytes: 4 * 1024 * 1024 * 1024,
            thumbnail_side: 256,
        }
    }
}

impl Default for RegistrationConfig {
    fn default() -> Self {
        Self {
            rotate: true,
            degeneracy_tolerance: 1e-9,
        }
    }
}

impl Default for FeatureConfig {
    fn default() -> Self {
        Self {
            fast_threshold: 20,
            max_keypoints: 500,
            pyramid_levels: 4,
            scale_factor: 1.2, // ORB typically uses 1.2
            distance_threshold: 64,
            ratio_threshold: 0.8,
            max_detection_side: 2048,
        }
    }
}

impl Default for RansacConfig {
    fn default() -> Self {
        Self {
            max_iterations: 1000,
            inlier_threshold: 3.0, // pixels
            min_inliers: 3,
            seed: 0x5eed,
        }
    }
}

impl Default for CompositeConfig {
    fn default() -> Self {
        Self {
            keep_original_pixels: true,
            spill_to_disk: true,
            temp_directory: None,
            loading_delay_ms: 10,
        }
    }
}

impl Config {
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;

        let config = if content.trim_start().starts_with('{') {
            serde_json::from_str(&content)
                .with_context(|| format!("parsing JSON config {}", path.display()))?
        } else {
            toml::from_str(&content)
                .with_context(|| format!("parsing TOML config {}", path.display()))?
        };
        Ok(config)
    }

    pub fn save_to_file<P: AsRef<Path>>(&self, path: P, format: ConfigFormat) -> anyhow::Result<()> {
        let content = match format {
            ConfigFormat::Json => serde_json::to_string_pretty(self)?,
            ConfigFormat::Toml => toml::to_string_pretty(self)?,
        };

        fs::write(path.as_ref(), content)
            .with_context(|| format!("writing config {}", path.as_ref().display()))?;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.source.pixel_budget == 0 {
            errors.push("source pixel_budget must be positive".to_string());
        }

        if self.source.thumbnail_side == 0 {
            errors.push("source thumbnail_side must be positive".to_string());
        }

        if !(self.registration.degeneracy_tolerance > 0.0) {
            errors.push("registration degeneracy_tolerance must be positive".to_string());
        }

        if self.features.max_keypoints < 3 {
            errors.push("features max_keypoints must be at least 3".to_string());
        }

        if self.features.pyramid_levels == 0 {
            errors.push("features pyramid_levels must be at least 1".to_string());
        }

        if self.features.scale_factor <= 1.0 {
            errors.push("features scale_factor must be greater than 1.0".to_string());
        }

        if !(0.0..=1.0).contains(&self.features.ratio_threshold) {
            errors.push("features ratio_threshold must lie in [0, 1]".to_string());
        }

        if self.features.distance_threshold > 256 {
            errors.push("features distance_threshold cannot exceed 256 bits".to_string());
        }

        if self.ransac.min_inliers < 3 {
            errors.push("ransac min_inliers must be at least 3".to_string());
        }

        if self.ransac.inlier_threshold <= 0.0 {
            errors.push("ransac inlier_threshold must be positive".to_string());
        }

        if let Err(message) = self.logging.validate() {
            errors.push(message);
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub enum ConfigFormat {
    Json,
    Toml,
}
