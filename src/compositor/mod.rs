//! Canvas Compositor
//!
//! Places registered full-resolution images on one canvas and emits them as
//! an ordered stack of slices, in flattened image order.

pub mod plan;
pub mod stack;
pub mod warp;

use image::DynamicImage;

pub use plan::{
    check_canvas, max_size, select_reference, CompositeMode, CompositePlan, PlacementInput, SliceExtent,
    MAX_CANVAS_PIXELS,
};
pub use stack::{CompositeStack, Slice, SliceKind};
pub use warp::warp_rgb;

use crate::config::CompositeConfig;
use crate::logging::AlignmentSpan;
use crate::registration::AffineTransform;
use crate::{AlignError, Result};

/// Builds the stack for `plan`, loading one input at a time through `load`
/// (called with the flattened image index).
pub fn composite<F>(
    inputs: &[PlacementInput],
    plan: &CompositePlan,
    config: &CompositeConfig,
    span: Option<&AlignmentSpan>,
    mut load: F,
) -> Result<CompositeStack>
where
    F: FnMut(usize) -> Result<DynamicImage>,
{
    let (width, height) = plan.canvas;
    let mut stack = if config.spill_to_disk {
        CompositeStack::spilling(width, height, config.temp_directory.as_deref())?
    } else {
        CompositeStack::new(width, height)
    };

    for (position, input) in inputs.iter().enumerate() {
        let pixels = load(input.image)?.to_rgb8();
        let at = plan.placement(position);

        if position == plan.reference {
            stack.push(input.image, SliceKind::Reference, at, pixels)?;
            continue;
        }

        match plan.mode {
            CompositeMode::KeepAll => {
                let anchor = input.anchor.ok_or(AlignError::MissingAnchor { image: input.image })?;
                let (slice_at, extent) = plan.transformed_placement(position);
                let shift = AffineTransform::translation(-extent.origin.0 as f64, -extent.origin.1 as f64);
                let local = shift.compose(&input.transform.linear_about(anchor));
                let warped = warp_rgb(&pixels, &local, extent.size.0, extent.size.1, input.image)?;
                stack.push(input.image, SliceKind::Transformed, slice_at, warped)?;
                stack.push(input.image, SliceKind::Original, at, pixels)?;
            }
            CompositeMode::Cropped => {
                let warped = warp_rgb(&pixels, &input.transform, width, height, input.image)?;
                stack.push(input.image, SliceKind::Transformed, (0, 0), warped)?;
            }
        }
        tracing::debug!(image = input.image, x = at.0, y = at.1, "image placed");
    }

    if let Some(span) = span {
        span.record_canvas(width, height, stack.len());
    }
    Ok(stack)
}
