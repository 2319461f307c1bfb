//! Structured spans for alignment runs
//!
//! One `AlignmentSpan` covers a whole run (manual or automatic) and records
//! what each phase produced, tagged with the run's correlation id.

use instant::Instant;
use tracing::{field, span, Level, Span};
use uuid::Uuid;

pub struct AlignmentSpan {
    span: Span,
    start_time: Instant,
    mode: &'static str,
}

impl AlignmentSpan {
    pub fn new(mode: &'static str, image_count: usize, correlation_id: Option<Uuid>) -> Self {
        let correlation_id = correlation_id.or_else(super::get_correlation_id);
        let span = span!(
            Level::INFO,
            "alignment_run",
            mode = mode,
            images = image_count,
            correlation_id = field::debug(correlation_id),
            reference = field::Empty,
            canvas_width = field::Empty,
            canvas_height = field::Empty,
            slices = field::Empty,
            execution_time_ms = field::Empty,
        );

        Self {
            span,
            start_time: Instant::now(),
            mode,
        }
    }

    pub fn record_reference(&self, reference: usize) {
        self.span.record("reference", reference);
    }

    pub fn record_feature_detection(&self, image: usize, keypoints: usize) {
        tracing::debug!(parent: &self.span, image, keypoints, "feature detection completed");
    }

    pub fn record_matching(&self, reference: usize, moving: usize, raw_matches: usize, filtered_matches: usize) {
        tracing::debug!(
            parent: &self.span,
            reference,
            moving,
            raw_matches,
            filtered_matches,
            "feature matching completed"
        );
    }

    pub fn record_ransac(&self, reference: usize, moving: usize, iterations: usize, inliers: usize) {
        tracing::debug!(parent: &self.span, reference, moving, iterations, inliers, "RANSAC estimation completed");
    }

    pub fn record_solve(&self, image: usize, points: usize, rms_residual: f64) {
        tracing::debug!(parent: &self.span, image, points, rms_residual, "least squares fit solved");
    }

    pub fn record_pair_failure(&self, reference: usize, moving: usize, error: &dyn std::fmt::Display) {
        tracing::warn!(parent: &self.span, reference, moving, error = %error, "pair registration failed");
    }

    pub fn record_canvas(&self, width: u32, height: u32, slices: usize) {
        self.span.record("canvas_width", width);
        self.span.record("canvas_height", height);
        self.span.record("slices", slices);
        tracing::debug!(parent: &self.span, width, height, slices, "canvas planned");
    }

    pub fn record_result(&self, success: bool, description: &str) {
        let elapsed_ms = self.start_time.elapsed().as_millis() as u64;
        self.span.record("execution_time_ms", elapsed_ms);
        if success {
            tracing::info!(parent: &self.span, mode = self.mode, elapsed_ms, description, "alignment run completed");
        } else {
            tracing::warn!(parent: &self.span, mode = self.mode, elapsed_ms, description, "alignment run failed");
        }
    }

    pub fn span(&self) -> &Span {
        &self.span
    }

    pub fn enter(&self) -> tracing::span::Entered<'_> {
        self.span.enter()
    }
}
