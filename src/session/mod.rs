//! Alignment session
//!
//! The explicit state a front end drives: loaded sources, landmarks, the
//! image being edited and the temporary files a session owns. Long-running
//! calls are meant to go through [`worker::Worker`].

pub mod events;
pub mod worker;

use image::{DynamicImage, GrayImage};
use std::collections::hash_map::DefaultHasher;
use std::fs;
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};
use uuid::Uuid;

pub use events::{AlignmentMode, AlignmentOutcome, AlignmentRequest, Event, Warning};
pub use worker::{Job, Worker};

use crate::algorithms::AutoRegistrar;
use crate::compositor::{self, select_reference, CompositeMode, CompositePlan, CompositeStack, PlacementInput};
use crate::config::Config;
use crate::landmarks::{LandmarkEdit, LandmarkStore, Point};
use crate::logging::AlignmentSpan;
use crate::registration::{register_to_reference, AffineTransform, Registration, TransformModel};
use crate::source::{ImageSource, ImageSourceManager};
use crate::{AlignError, Result};

/// What a batch of file additions produced.
#[derive(Debug, Default)]
pub struct LoadReport {
    /// Source positions added.
    pub added: Vec<usize>,
    pub warnings: Vec<Warning>,
    /// Files that could not be added; the others are unaffected.
    pub errors: Vec<AlignError>,
}

pub struct AlignmentSession {
    config: Config,
    sources: ImageSourceManager,
    landmarks: LandmarkStore,
    current: Option<usize>,
    temp_files: Vec<PathBuf>,
}

impl AlignmentSession {
    pub fn new(config: Config) -> Self {
        Self {
            sources: ImageSourceManager::new(config.source.clone()),
            config,
            landmarks: LandmarkStore::new(),
            current: None,
            temp_files: Vec::new(),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn sources(&self) -> &ImageSourceManager {
        &self.sources
    }

    pub fn landmarks(&self) -> &LandmarkStore {
        &self.landmarks
    }

    pub fn temp_files(&self) -> &[PathBuf] {
        &self.temp_files
    }

    /// Starts over with `paths`. An empty selection aborts.
    pub fn initialize(&mut self, paths: &[PathBuf]) -> Result<LoadReport> {
        if paths.is_empty() {
            return Err(AlignError::Config("no input files selected".to_string()));
        }
        self.reset();
        let mut report = self.add_files(paths);
        if self.image_count() == 1 {
            report.warnings.push(Warning::SingleImage);
        }
        Ok(report)
    }

    pub fn add_files(&mut self, paths: &[PathBuf]) -> LoadReport {
        let mut report = LoadReport::default();
        for path in paths {
            match self.add_file(path) {
                Ok((position, warnings)) => {
                    report.added.push(position);
                    report.warnings.extend(warnings);
                }
                Err(error) => {
                    tracing::error!(path = %path.display(), %error, "file not added");
                    report.errors.push(error);
                }
            }
        }
        report
    }

    /// Appends one file. The memory estimate is advisory: exceeding the
    /// budget yields a warning and the file is still added.
    pub fn add_file(&mut self, path: &Path) -> Result<(usize, Vec<Warning>)> {
        let mut warnings = Vec::new();
        let check = self.sources.check_memory(path)?;
        if check.exceeds_budget() {
            warnings.push(Warning::InsufficientMemory {
                path: path.to_path_buf(),
                check,
            });
        }

        let source = self.sources.open(path)?;
        if source.is_reduced() {
            warnings.push(Warning::ReducedResolution {
                path: path.to_path_buf(),
            });
        }
        let position = self.push_source(source);
        Ok((position, warnings))
    }

    /// Appends an already opened source, e.g. one backed by memory.
    pub fn push_source(&mut self, source: ImageSource) -> usize {
        let position = self.sources.add_source(source);
        let range = self.sources.image_range(position);
        self.landmarks.insert_images(range.start, range.len());
        position
    }

    /// Drops a source and its landmarks; later images are renumbered.
    pub fn remove_source(&mut self, position: usize) -> Result<()> {
        let range = self.sources.image_range(position);
        self.sources.remove_source(position)?;
        self.landmarks.remove_images(range);

        let count = self.image_count();
        self.current = match self.current {
            _ if count == 0 => None,
            Some(current) if current >= count => Some(count - 1),
            other => other,
        };
        Ok(())
    }

    pub fn image_count(&self) -> usize {
        self.sources.image_count()
    }

    pub fn current_index(&self) -> usize {
        self.current.unwrap_or(0)
    }

    pub fn set_current(&mut self, index: usize) -> Result<()> {
        let len = self.image_count();
        if index >= len {
            return Err(AlignError::IndexOutOfRange {
                index: index as isize,
                len,
            });
        }
        self.current = Some(index);
        Ok(())
    }

    pub fn has_next(&self) -> bool {
        self.current_index() + 1 < self.image_count()
    }

    pub fn has_previous(&self) -> bool {
        self.current_index() > 0 && self.image_count() > 0
    }

    pub fn next(&mut self) -> Option<usize> {
        self.has_next().then(|| {
            let index = self.current_index() + 1;
            self.current = Some(index);
            index
        })
    }

    pub fn previous(&mut self) -> Option<usize> {
        self.has_previous().then(|| {
            let index = self.current_index() - 1;
            self.current = Some(index);
            index
        })
    }

    pub fn title(&self) -> String {
        format!("Editor Image {}/{}", self.current_index() + 1, self.image_count())
    }

    /// The edited image at working resolution.
    pub fn current_image(&mut self) -> Result<DynamicImage> {
        let index = self.current.map_or(-1, |i| i as isize);
        self.sources.get_image(index, false)
    }

    /// Cached thumbnails of every image of the source at `position`.
    pub fn thumbnails(&mut self, position: usize) -> Result<Vec<DynamicImage>> {
        let side = self.config.source.thumbnail_side;
        let count = self.sources.source_count();
        let source = self.sources.source_mut(position).ok_or(AlignError::IndexOutOfRange {
            index: position as isize,
            len: count,
        })?;
        Ok(source.thumbnails(side)?.to_vec())
    }

    pub fn apply_edit(&mut self, edit: LandmarkEdit) -> Result<()> {
        self.landmarks.apply(edit)
    }

    /// Copies landmarks of `from` onto `to`, skipping points outside `to`.
    pub fn copy_landmarks(&mut self, from: usize, to: usize) -> Result<Option<Warning>> {
        let bounds = self.sources.working_dimensions(to)?;
        let report = self.landmarks.copy(from, to, bounds)?;
        Ok((report.skipped > 0).then_some(Warning::LandmarksOutOfBounds {
            image: to,
            skipped: report.skipped,
        }))
    }

    /// Images whose landmarks can be copied onto the current one.
    pub fn copy_sources(&self) -> Vec<usize> {
        self.landmarks.images_with_landmarks(Some(self.current_index()))
    }

    /// Whether a manual run would pass the landmark gate: every image,
    /// including those without landmarks, must hold the same count.
    pub fn can_align(&self) -> bool {
        self.image_count() > 1 && self.landmarks.ensure_alignable().is_ok()
    }

    /// Landmarks of `image` in full-resolution pixels.
    fn full_resolution_landmarks(&self, image: usize) -> Result<Vec<Point>> {
        let (sx, sy) = self.sources.full_resolution_scale(image)?;
        Ok(self
            .landmarks
            .set(image)?
            .points()
            .iter()
            .map(|p| p.scaled(sx, sy))
            .collect())
    }

    /// Registers and composites every loaded image.
    ///
    /// Everything that would invalidate the whole run (too few images,
    /// unequal landmark sets, a missing anchor, an oversize canvas) is
    /// checked before any pixel is produced. Images that fail on their own
    /// are left out and reported in the outcome.
    pub fn align(&mut self, request: &AlignmentRequest) -> Result<AlignmentOutcome> {
        let count = self.image_count();
        let mode_name = match request.mode {
            AlignmentMode::Manual => "manual",
            AlignmentMode::Auto => "auto",
        };
        let span = AlignmentSpan::new(mode_name, count, None);
        let _enter = span.enter();

        let result = self.align_inner(request, &span);
        match &result {
            Ok(outcome) => span.record_result(true, &format!("{} slices", outcome.stack.len())),
            Err(error) => span.record_result(false, &error.to_string()),
        }
        result
    }

    fn align_inner(&mut self, request: &AlignmentRequest, span: &AlignmentSpan) -> Result<AlignmentOutcome> {
        let count = self.image_count();
        if count < 2 {
            return Err(AlignError::NotEnoughImages { count });
        }
        let sizes = (0..count)
            .map(|i| self.sources.full_dimensions(i))
            .collect::<Result<Vec<_>>>()?;
        let mut reference = select_reference(&sizes).unwrap_or(0);
        let model = TransformModel::from_rotate(request.rotate);
        let tolerance = self.config.registration.degeneracy_tolerance;

        let mut failures = Vec::new();
        let mut registrations = Vec::new();
        let mut anchors: Vec<Option<Point>> = Vec::with_capacity(count);

        match request.mode {
            AlignmentMode::Manual => {
                self.landmarks.ensure_alignable()?;
                let points = (0..count)
                    .map(|i| self.full_resolution_landmarks(i))
                    .collect::<Result<Vec<_>>>()?;
                anchors.extend(points.iter().map(|p| p.first().copied()));
                span.record_reference(reference);

                for result in register_to_reference(&points, reference, model, tolerance) {
                    match result {
                        Ok(registration) => {
                            span.record_solve(registration.image, points[registration.image].len(), registration.residual);
                            registrations.push(registration);
                        }
                        Err(error) => failures.push(error),
                    }
                }
            }
            AlignmentMode::Auto => {
                let images = (0..count)
                    .map(|i| self.sources.get_image(i as isize, false).map(|img| img.to_luma8()))
                    .collect::<Result<Vec<GrayImage>>>()?;
                let registrar = AutoRegistrar::new(&self.config.features, &self.config.ransac, model, tolerance);
                let auto = registrar.register(&images, Some(span));
                drop(images);

                let relative = match auto.relative_to(reference) {
                    Some(relative) => relative,
                    None => {
                        let registered: Vec<usize> = (0..count).filter(|&i| auto.transforms[i].is_some()).collect();
                        let registered_sizes: Vec<(u32, u32)> = registered.iter().map(|&i| sizes[i]).collect();
                        reference = select_reference(&registered_sizes)
                            .and_then(|position| registered.get(position).copied())
                            .unwrap_or(0);
                        tracing::warn!(reference, "largest image could not be registered, re-anchoring");
                        auto.relative_to(reference).unwrap_or_else(|| auto.transforms.clone())
                    }
                };
                span.record_reference(reference);
                failures.extend(auto.failures);

                let (ref_sx, ref_sy) = self.sources.full_resolution_scale(reference)?;
                let to_reference_full = AffineTransform::scale(ref_sx, ref_sy);
                for (image, transform) in relative.into_iter().enumerate() {
                    let Some(transform) = transform else { continue };
                    let (sx, sy) = self.sources.full_resolution_scale(image)?;
                    let from_full = AffineTransform::scale(1.0 / sx, 1.0 / sy);
                    registrations.push(Registration {
                        image,
                        transform: to_reference_full.compose(&transform).compose(&from_full),
                        residual: 0.0,
                    });
                }

                for (image, &(width, height)) in sizes.iter().enumerate() {
                    let first = self.full_resolution_landmarks(image)?.first().copied();
                    anchors.push(first.or(Some(Point::new(width as f64 / 2.0, height as f64 / 2.0))));
                }
            }
        }

        let inputs: Vec<PlacementInput> = registrations
            .iter()
            .map(|r| PlacementInput {
                image: r.image,
                size: sizes[r.image],
                transform: r.transform,
                anchor: anchors[r.image],
            })
            .collect();
        if inputs.len() < 2 {
            // Nothing left to stack against the reference; report why.
            return Err(match failures.len() {
                0 => AlignError::NotEnoughImages { count: inputs.len() },
                1 => failures.remove(0),
                _ => AlignError::NothingRegistered { failures },
            });
        }
        let reference_position = inputs
            .iter()
            .position(|input| input.image == reference)
            .ok_or(AlignError::MissingAnchor { image: reference })?;

        let mode = CompositeMode::from_keep_original(request.keep_original_pixels);
        let plan = CompositePlan::new(&inputs, reference_position, mode)?;
        tracing::info!(
            reference,
            width = plan.canvas.0,
            height = plan.canvas.1,
            ?mode,
            failed = failures.len(),
            "composite planned"
        );

        let sources = &mut self.sources;
        let stack = compositor::composite(&inputs, &plan, &self.config.composite, Some(span), |image| {
            sources.get_image(image as isize, true)
        })?;

        Ok(AlignmentOutcome {
            stack,
            reference,
            registrations,
            failures,
        })
    }

    /// Saves an edited image next to its source, under a dated directory,
    /// and swaps it in at the same position. Returns the old and new paths.
    pub fn replace_image(&mut self, index: usize, edited: &DynamicImage) -> Result<(PathBuf, PathBuf)> {
        let location = self.sources.locate(index)?;
        let old_path = self.sources.source_of(index)?.path().to_path_buf();

        let now = chrono::Local::now();
        let dir = old_path
            .parent()
            .unwrap_or_else(|| Path::new("."))
            .join(now.format("%Y-%m-%d").to_string());
        fs::create_dir_all(&dir).map_err(|e| AlignError::io(&dir, e))?;

        let mut hasher = DefaultHasher::new();
        old_path.hash(&mut hasher);
        now.timestamp_nanos_opt().unwrap_or_default().hash(&mut hasher);
        let new_path = dir.join(format!("{:016x}.tiff", hasher.finish()));
        edited.save(&new_path).map_err(|e| AlignError::encode(&new_path, e))?;

        let replacement = self.sources.open(&new_path)?;
        let old_range = self.sources.image_range(location.source);
        let new_count = replacement.image_count();

        self.sources.remove_source(location.source)?;
        self.sources.insert_source(location.source, replacement)?;
        if new_count != old_range.len() {
            self.landmarks.remove_images(old_range.clone());
            self.landmarks.insert_images(old_range.start, new_count);
        }

        tracing::info!(old = %old_path.display(), new = %new_path.display(), "image replaced");
        Ok((old_path, new_path))
    }

    /// Persists `stack` to a session-owned temporary TIFF and restarts the
    /// session with it as the only input.
    pub fn reuse_composite(&mut self, stack: &CompositeStack) -> Result<(PathBuf, LoadReport)> {
        let dir = self
            .config
            .composite
            .temp_directory
            .clone()
            .unwrap_or_else(std::env::temp_dir);
        let path = dir.join(format!("composite-{}.tiff", Uuid::new_v4()));
        stack.save_tiff(&path)?;
        self.temp_files.push(path.clone());

        let report = self.initialize(std::slice::from_ref(&path))?;
        if let Some(error) = report.errors.first() {
            tracing::error!(path = %path.display(), %error, "composite could not be reopened");
        }
        Ok((path, report))
    }

    fn reset(&mut self) {
        self.sources.dispose();
        self.landmarks.clear();
        self.current = None;
    }

    fn remove_temp_files(&mut self) {
        for path in self.temp_files.drain(..) {
            if let Err(error) = fs::remove_file(&path) {
                if error.kind() != std::io::ErrorKind::NotFound {
                    tracing::warn!(path = %path.display(), %error, "temporary file not removed");
                }
            }
        }
    }

    /// Releases sources, landmarks and temporary files. Safe to repeat.
    pub fn dispose(&mut self) {
        self.reset();
        self.remove_temp_files();
    }
}

impl Drop for AlignmentSession {
    fn drop(&mut self) {
        self.remove_temp_files();
    }
}
