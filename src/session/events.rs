use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::compositor::CompositeStack;
use crate::config::Config;
use crate::registration::Registration;
use crate::source::MemoryCheck;
use crate::AlignError;

/// Advisory conditions. The caller decides whether to continue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Warning {
    InsufficientMemory { path: PathBuf, check: MemoryCheck },
    /// The source is edited at a reduced series.
    ReducedResolution { path: PathBuf },
    SingleImage,
    LandmarksOutOfBounds { image: usize, skipped: usize },
}

impl std::fmt::Display for Warning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Warning::InsufficientMemory { path, check } => write!(
                f,
                "loading {} brings the estimated memory use to {} of {} bytes",
                path.display(),
                check.running_total,
                check.budget
            ),
            Warning::ReducedResolution { path } => write!(
                f,
                "{} is too large to edit at full resolution; a reduced series is shown and the full one is used for the composite",
                path.display()
            ),
            Warning::SingleImage => write!(f, "only one image is loaded; alignment needs at least two"),
            Warning::LandmarksOutOfBounds { image, skipped } => {
                write!(f, "{skipped} landmark(s) fall outside image {image} and were not copied")
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlignmentMode {
    /// Registration from the user's landmarks.
    Manual,
    /// Registration from detected features.
    Auto,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlignmentRequest {
    pub mode: AlignmentMode,
    pub rotate: bool,
    pub keep_original_pixels: bool,
}

impl AlignmentRequest {
    /// Request using the configured rotate and keep-original defaults.
    pub fn from_config(mode: AlignmentMode, config: &Config) -> Self {
        Self {
            mode,
            rotate: config.registration.rotate,
            keep_original_pixels: config.composite.keep_original_pixels,
        }
    }
}

#[derive(Debug)]
pub struct AlignmentOutcome {
    pub stack: CompositeStack,
    /// Flattened index of the image anchoring the frame.
    pub reference: usize,
    pub registrations: Vec<Registration>,
    /// Images left out of the stack and why.
    pub failures: Vec<AlignError>,
}

/// Notifications sent from the worker to the presentation layer.
#[derive(Debug)]
pub enum Event {
    LoadingStarted,
    LoadingFinished,
    Warning(Warning),
    Error(AlignError),
    AlignmentFinished(AlignmentOutcome),
    ImageReplaced { old: PathBuf, new: PathBuf },
    /// A composite was written and reopened as the new input.
    CompositeReused { path: PathBuf },
}
