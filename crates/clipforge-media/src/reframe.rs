//! Aspect-ratio reframing.
//!
//! Policy: center-crop to the target aspect, unless the crop would discard
//! more than 40% of the source's horizontal content for a 9:16 target; then
//! letterbox (scale + pad) instead.

use clipforge_models::AspectRatio;

/// Fraction of horizontal content a portrait crop may discard before the
/// planner falls back to letterboxing.
pub const MAX_HORIZONTAL_LOSS: f64 = 0.40;

/// How a source frame is mapped onto the target canvas.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReframePlan {
    /// Crop to the target aspect around the center, then scale to canvas.
    CenterCrop,
    /// Scale to fit inside the canvas and pad the remainder.
    Letterbox,
}

/// Decide how to reframe a source of the given dimensions.
pub fn plan_reframe(src_width: u32, src_height: u32, target: AspectRatio) -> ReframePlan {
    if src_width == 0 || src_height == 0 {
        return ReframePlan::Letterbox;
    }

    let src_aspect = src_width as f64 / src_height as f64;
    let target_aspect = target.as_f64();

    if src_aspect <= target_aspect {
        // Source is narrower than the target: a crop would cut vertically,
        // which never trips the horizontal-loss rule.
        return ReframePlan::CenterCrop;
    }

    // Cropping a wider source keeps a width of src_height * target_aspect.
    let kept_width = src_height as f64 * target_aspect;
    let horizontal_loss = 1.0 - kept_width / src_width as f64;

    if target == AspectRatio::Portrait && horizontal_loss > MAX_HORIZONTAL_LOSS {
        ReframePlan::Letterbox
    } else {
        ReframePlan::CenterCrop
    }
}

/// Build the FFmpeg video filter for a reframe plan.
pub fn build_filter(plan: ReframePlan, target: AspectRatio) -> String {
    let (w, h) = target.canvas();
    match plan {
        ReframePlan::CenterCrop => {
            // Scale so the canvas is covered, then crop the center.
            format!(
                "scale={w}:{h}:force_original_aspect_ratio=increase,crop={w}:{h}",
                w = w,
                h = h
            )
        }
        ReframePlan::Letterbox => {
            format!(
                "scale={w}:{h}:force_original_aspect_ratio=decrease,\
                 pad={w}:{h}:(ow-iw)/2:(oh-ih)/2",
                w = w,
                h = h
            )
        }
    }
}
