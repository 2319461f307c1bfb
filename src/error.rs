//! Error taxonomy for loading, registration and compositing.
//!
//! Per-file and per-image failures carry enough context (path, image index,
//! pair) for the caller to report them and keep going with unrelated work.
//! Failures that would make the whole output structurally invalid
//! (`LandmarkCardinalityMismatch`, `CanvasOversize`) abort an alignment run
//! before any slice is produced.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AlignError {
    #[error("unsupported image format: {}", path.display())]
    UnsupportedFormat { path: PathBuf },

    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to decode {}: {message}", path.display())]
    Decode { path: PathBuf, message: String },

    #[error("failed to write {}: {message}", path.display())]
    Encode { path: PathBuf, message: String },

    #[error("no series of {} fits the addressable pixel budget ({series} series inspected)", path.display())]
    ImageOversize { path: PathBuf, series: usize },

    #[error("landmarks of image {image} are degenerate (collinear or coincident)")]
    DegenerateLandmarks { image: usize },

    #[error("only {matches} correspondences between image {reference} and image {moving}, at least 3 are required")]
    InsufficientCorrespondence {
        reference: usize,
        moving: usize,
        matches: usize,
    },

    #[error("composite canvas {width}x{height} exceeds the addressable pixel area; retry in cropped mode")]
    CanvasOversize { width: u64, height: u64 },

    #[error("landmark sets differ in size or hold fewer than 3 points: {counts:?}")]
    LandmarkCardinalityMismatch { counts: Vec<usize> },

    #[error("image {image} has no landmark to anchor its placement")]
    MissingAnchor { image: usize },

    #[error("image index {index} out of range (stack holds {len} images)")]
    IndexOutOfRange { index: isize, len: usize },

    #[error("alignment needs at least two images, {count} loaded")]
    NotEnoughImages { count: usize },

    #[error("no image could be registered against the reference: {}", join_errors(failures))]
    NothingRegistered { failures: Vec<AlignError> },

    #[error("an alignment job is already running")]
    Busy,

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl AlignError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        AlignError::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn decode(path: impl Into<PathBuf>, message: impl ToString) -> Self {
        AlignError::Decode {
            path: path.into(),
            message: message.to_string(),
        }
    }

    pub(crate) fn encode(path: impl Into<PathBuf>, message: impl ToString) -> Self {
        AlignError::Encode {
            path: path.into(),
            message: message.to_string(),
        }
    }

    /// True for errors that invalidate the whole alignment run rather than a
    /// single file, image or pair.
    pub fn aborts_run(&self) -> bool {
        matches!(
            self,
            AlignError::CanvasOversize { .. }
                | AlignError::LandmarkCardinalityMismatch { .. }
                | AlignError::MissingAnchor { .. }
                | AlignError::NotEnoughImages { .. }
                | AlignError::NothingRegistered { .. }
                | AlignError::Busy
        )
    }
}

fn join_errors(errors: &[AlignError]) -> String {
    errors.iter().map(ToString::to_string).collect::<Vec<_>>().join("; ")
}

pub type Result<T> = std::result::Result<T, AlignError>;
