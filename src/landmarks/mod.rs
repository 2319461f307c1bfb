//! Landmark Model
//!
//! Ordered correspondence points per image. Correspondence is positional:
//! ordinal `i` on one image matches ordinal `i` on every other image, so
//! ordinals are always the dense sequence `1..=N` of the current storage
//! order.

use serde::{Deserialize, Serialize};

use crate::{AlignError, Result};

/// Fewest correspondences that determine a 2D affine fit.
pub const MINIMUM_LANDMARKS: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn scaled(self, sx: f64, sy: f64) -> Self {
        Self::new(self.x * sx, self.y * sy)
    }

    pub fn distance(self, other: Point) -> f64 {
        ((self.x - other.x).powi(2) + (self.y - other.y).powi(2)).sqrt()
    }

    /// Inside a `width x height` image.
    pub fn within(self, width: u32, height: u32) -> bool {
        self.x >= 0.0 && self.y >= 0.0 && self.x < width as f64 && self.y < height as f64
    }
}

impl From<(f64, f64)> for Point {
    fn from((x, y): (f64, f64)) -> Self {
        Self::new(x, y)
    }
}

/// A landmark as presented to callers: its 1-based ordinal and position.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Landmark {
    pub ordinal: usize,
    pub point: Point,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LandmarkSet {
    points: Vec<Point>,
}

impl LandmarkSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_points(points: Vec<Point>) -> Self {
        Self { points }
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn points(&self) -> &[Point] {
        &self.points
    }

    pub fn first(&self) -> Option<Point> {
        self.points.first().copied()
    }

    pub fn landmarks(&self) -> impl Iterator<Item = Landmark> + '_ {
        self.points
            .iter()
            .enumerate()
            .map(|(i, &point)| Landmark { ordinal: i + 1, point })
    }

    fn slot(&self, ordinal: usize) -> Result<usize> {
        if ordinal == 0 || ordinal > self.points.len() {
            return Err(AlignError::IndexOutOfRange {
                index: ordinal as isize,
                len: self.points.len(),
            });
        }
        Ok(ordinal - 1)
    }

    /// Appends and returns the new landmark's ordinal.
    pub fn push(&mut self, point: Point) -> usize {
        self.points.push(point);
        self.points.len()
    }

    /// Removes by ordinal; later landmarks shift down one ordinal.
    pub fn remove(&mut self, ordinal: usize) -> Result<Point> {
        let slot = self.slot(ordinal)?;
        Ok(self.points.remove(slot))
    }

    pub fn move_to(&mut self, ordinal: usize, point: Point) -> Result<()> {
        let slot = self.slot(ordinal)?;
        self.points[slot] = point;
        Ok(())
    }
}

/// An edit issued by the presentation layer.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum LandmarkEdit {
    Add { image: usize, point: Point },
    Remove { image: usize, ordinal: usize },
    Move { image: usize, ordinal: usize, point: Point },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CopyReport {
    pub copied: usize,
    /// Points that fall outside the destination image.
    pub skipped: usize,
}

/// One `LandmarkSet` per flattened image index.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LandmarkStore {
    sets: Vec<LandmarkSet>,
}

impl LandmarkStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_images(count: usize) -> Self {
        Self {
            sets: vec![LandmarkSet::new(); count],
        }
    }

    pub fn from_sets(sets: Vec<LandmarkSet>) -> Self {
        Self { sets }
    }

    pub fn image_count(&self) -> usize {
        self.sets.len()
    }

    /// Makes room for `count` images starting at flattened index `at`.
    pub fn insert_images(&mut self, at: usize, count: usize) {
        let at = at.min(self.sets.len());
        self.sets
            .splice(at..at, std::iter::repeat(LandmarkSet::new()).take(count));
    }

    /// Drops the sets of removed images; later images are renumbered.
    pub fn remove_images(&mut self, range: std::ops::Range<usize>) {
        let end = range.end.min(self.sets.len());
        let start = range.start.min(end);
        self.sets.drain(start..end);
    }

    pub fn clear(&mut self) {
        self.sets.clear();
    }

    pub fn set(&self, image: usize) -> Result<&LandmarkSet> {
        self.sets.get(image).ok_or(AlignError::IndexOutOfRange {
            index: image as isize,
            len: self.sets.len(),
        })
    }

    fn set_mut(&mut self, image: usize) -> Result<&mut LandmarkSet> {
        let len = self.sets.len();
        self.sets.get_mut(image).ok_or(AlignError::IndexOutOfRange {
            index: image as isize,
            len,
        })
    }

    pub fn sets(&self) -> &[LandmarkSet] {
        &self.sets
    }

    /// Appends a landmark. Coordinates are not checked against the image
    /// here; copies across images are bounds-checked instead.
    pub fn add(&mut self, image: usize, point: Point) -> Result<usize> {
        self.set_mut(image).map(|set| set.push(point))
    }

    pub fn remove(&mut self, image: usize, ordinal: usize) -> Result<Point> {
        self.set_mut(image)?.remove(ordinal)
    }

    pub fn move_landmark(&mut self, image: usize, ordinal: usize, point: Point) -> Result<()> {
        self.set_mut(image)?.move_to(ordinal, point)
    }

    pub fn apply(&mut self, edit: LandmarkEdit) -> Result<()> {
        match edit {
            LandmarkEdit::Add { image, point } => self.add(image, point).map(|_| ()),
            LandmarkEdit::Remove { image, ordinal } => self.remove(image, ordinal).map(|_| ()),
            LandmarkEdit::Move { image, ordinal, point } => self.move_landmark(image, ordinal, point),
        }
    }

    pub fn counts(&self) -> Vec<usize> {
        self.sets.iter().map(LandmarkSet::len).collect()
    }

    /// Every non-empty set has the same size and that size is at least
    /// [`MINIMUM_LANDMARKS`].
    pub fn all_sets_equal_cardinality(&self) -> bool {
        let mut non_empty = self.sets.iter().filter(|s| !s.is_empty()).map(LandmarkSet::len);
        match non_empty.next() {
            Some(first) => first >= MINIMUM_LANDMARKS && non_empty.all(|n| n == first),
            None => false,
        }
    }

    /// Gate for a manual alignment run over every image: all sets equal in
    /// size, none empty, none below the minimum.
    pub fn ensure_alignable(&self) -> Result<usize> {
        let counts = self.counts();
        let first = counts.first().copied().unwrap_or(0);
        if first < MINIMUM_LANDMARKS || counts.iter().any(|&n| n != first) {
            return Err(AlignError::LandmarkCardinalityMismatch { counts });
        }
        Ok(first)
    }

    /// Images holding at least one landmark, other than `except`.
    pub fn images_with_landmarks(&self, except: Option<usize>) -> Vec<usize> {
        self.sets
            .iter()
            .enumerate()
            .filter(|(i, set)| !set.is_empty() && Some(*i) != except)
            .map(|(i, _)| i)
            .collect()
    }

    /// Appends the landmarks of `from` to `to`, skipping points outside the
    /// destination's `bounds`.
    pub fn copy(&mut self, from: usize, to: usize, bounds: (u32, u32)) -> Result<CopyReport> {
        let source = self.set(from)?.points().to_vec();
        let target = self.set_mut(to)?;
        let mut report = CopyReport::default();
        for point in source {
            if point.within(bounds.0, bounds.1) {
                target.push(point);
                report.copied += 1;
            } else {
                report.skipped += 1;
            }
        }
        Ok(report)
    }

    /// Ordinals of landmarks on `image` lying outside `bounds`.
    pub fn out_of_bounds(&self, image: usize, bounds: (u32, u32)) -> Result<Vec<usize>> {
        Ok(self
            .set(image)?
            .landmarks()
            .filter(|lm| !lm.point.within(bounds.0, bounds.1))
            .map(|lm| lm.ordinal)
            .collect())
    }
}
