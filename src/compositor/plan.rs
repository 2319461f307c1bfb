use serde::{Deserialize, Serialize};

use crate::landmarks::Point;
use crate::registration::AffineTransform;
use crate::{AlignError, Result};

/// Largest canvas area addressable by a 32-bit signed pixel index.
pub const MAX_CANVAS_PIXELS: u64 = i32::MAX as u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompositeMode {
    /// Canvas grows to hold every image whole; originals are kept next to
    /// their transformed copies.
    KeepAll,
    /// Canvas is the largest input size; images are warped into the
    /// reference frame and clipped to it.
    Cropped,
}

impl CompositeMode {
    pub fn from_keep_original(keep: bool) -> Self {
        if keep {
            CompositeMode::KeepAll
        } else {
            CompositeMode::Cropped
        }
    }
}

/// Box of a keep-all transformed slice relative to its image's placement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SliceExtent {
    pub origin: (i64, i64),
    pub size: (u32, u32),
}

impl SliceExtent {
    pub fn whole(size: (u32, u32)) -> Self {
        Self { origin: (0, 0), size }
    }

    /// Integer box covering a `size` image mapped by `transform`.
    pub fn of(transform: &AffineTransform, size: (u32, u32)) -> Self {
        // Least-squares fits of pure shifts land a hair off integer corners.
        let snap = |v: f64| if (v - v.round()).abs() < 1e-6 { v.round() } else { v };
        let (min, max) = transform.bounds_of(size.0, size.1);
        let (x0, y0) = (snap(min.x).floor(), snap(min.y).floor());
        let (x1, y1) = (snap(max.x).ceil(), snap(max.y).ceil());
        Self {
            origin: (x0 as i64, y0 as i64),
            size: ((x1 - x0).max(1.0) as u32, (y1 - y0).max(1.0) as u32),
        }
    }
}

/// One image entering the composite.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PlacementInput {
    /// Flattened image index.
    pub image: usize,
    /// Full-resolution size.
    pub size: (u32, u32),
    /// Map into the reference image's full-resolution frame.
    pub transform: AffineTransform,
    /// First landmark in full-resolution pixels, if any.
    pub anchor: Option<Point>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompositePlan {
    pub mode: CompositeMode,
    pub max_size: (u32, u32),
    /// Position of the reference within the inputs.
    pub reference: usize,
    pub canvas: (u32, u32),
    /// Where the reference's origin lands on the canvas.
    pub base: (u32, u32),
    /// Per input, its offset relative to the reference.
    pub offsets: Vec<(i64, i64)>,
    /// Per input, where its transformed slice sits in keep-all mode.
    pub extents: Vec<SliceExtent>,
}

pub fn max_size(sizes: &[(u32, u32)]) -> (u32, u32) {
    sizes
        .iter()
        .fold((0, 0), |(w, h), &(iw, ih)| (w.max(iw), h.max(ih)))
}

/// The first image attaining both maxima, else the first largest by area.
pub fn select_reference(sizes: &[(u32, u32)]) -> Option<usize> {
    let max = max_size(sizes);
    sizes.iter().position(|&s| s == max).or_else(|| {
        let mut best: Option<(usize, u64)> = None;
        for (i, &(w, h)) in sizes.iter().enumerate() {
            let area = w as u64 * h as u64;
            if best.map_or(true, |(_, a)| area > a) {
                best = Some((i, area));
            }
        }
        best.map(|(i, _)| i)
    })
}

/// Fails with `CanvasOversize` when `width * height` is not addressable.
pub fn check_canvas(width: u64, height: u64) -> Result<(u32, u32)> {
    if width.saturating_mul(height) > MAX_CANVAS_PIXELS || width > u32::MAX as u64 || height > u32::MAX as u64 {
        return Err(AlignError::CanvasOversize { width, height });
    }
    Ok((width as u32, height as u32))
}

impl CompositePlan {
    /// Lays out the canvas. Every input is checked before anything is
    /// allocated: a missing anchor in keep-all mode or an oversize canvas
    /// fails the whole plan.
    pub fn new(inputs: &[PlacementInput], reference: usize, mode: CompositeMode) -> Result<Self> {
        if reference >= inputs.len() {
            return Err(AlignError::IndexOutOfRange {
                index: reference as isize,
                len: inputs.len(),
            });
        }
        let sizes: Vec<(u32, u32)> = inputs.iter().map(|i| i.size).collect();
        let max = max_size(&sizes);

        if mode == CompositeMode::Cropped {
            let canvas = check_canvas(max.0 as u64, max.1 as u64)?;
            return Ok(Self {
                mode,
                max_size: max,
                reference,
                canvas,
                base: (0, 0),
                offsets: vec![(0, 0); inputs.len()],
                extents: sizes.iter().map(|&s| SliceExtent::whole(s)).collect(),
            });
        }

        let mut offsets = Vec::with_capacity(inputs.len());
        let mut extents = Vec::with_capacity(inputs.len());
        for (position, input) in inputs.iter().enumerate() {
            if position == reference {
                offsets.push((0, 0));
                extents.push(SliceExtent::whole(input.size));
                continue;
            }
            let anchor = input.anchor.ok_or(AlignError::MissingAnchor { image: input.image })?;
            let moved = input.transform.apply(anchor);
            offsets.push(((moved.x - anchor.x).round() as i64, (moved.y - anchor.y).round() as i64));
            extents.push(SliceExtent::of(&input.transform.linear_about(anchor), input.size));
        }

        let grow = |axis: fn(&(i64, i64)) -> i64| {
            let positive = offsets.iter().map(axis).max().unwrap_or(0).max(0);
            let negative = offsets.iter().map(axis).min().unwrap_or(0).min(0).abs();
            (positive as u64, negative as u64)
        };
        let (pos_x, neg_x) = grow(|o| o.0);
        let (pos_y, neg_y) = grow(|o| o.1);

        // Span relative to the reference origin; rotated or scaled slices
        // may reach past it.
        let (mut left, mut top) = (-(neg_x as i64), -(neg_y as i64));
        let (mut right, mut bottom) = (max.0 as i64 + pos_x as i64, max.1 as i64 + pos_y as i64);
        for (offset, extent) in offsets.iter().zip(&extents) {
            let x = offset.0 + extent.origin.0;
            let y = offset.1 + extent.origin.1;
            left = left.min(x);
            top = top.min(y);
            right = right.max(x + extent.size.0 as i64);
            bottom = bottom.max(y + extent.size.1 as i64);
        }

        let canvas = check_canvas((right - left) as u64, (bottom - top) as u64)?;
        Ok(Self {
            mode,
            max_size: max,
            reference,
            canvas,
            base: ((-left) as u32, (-top) as u32),
            offsets,
            extents,
        })
    }

    /// Canvas position of input `position`'s origin.
    pub fn placement(&self, position: usize) -> (u32, u32) {
        let (dx, dy) = self.offsets.get(position).copied().unwrap_or((0, 0));
        (
            (self.base.0 as i64 + dx).max(0) as u32,
            (self.base.1 as i64 + dy).max(0) as u32,
        )
    }

    /// Canvas position and size of input `position`'s transformed slice in
    /// keep-all mode.
    pub fn transformed_placement(&self, position: usize) -> ((u32, u32), SliceExtent) {
        let extent = self.extents.get(position).copied().unwrap_or(SliceExtent::whole(self.max_size));
        let (x, y) = self.placement(position);
        (
            (
                (x as i64 + extent.origin.0).max(0) as u32,
                (y as i64 + extent.origin.1).max(0) as u32,
            ),
            extent,
        )
    }
}
