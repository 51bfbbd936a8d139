//! Aspect-ratio distance estimate and the published centre line.
//!
//! Both formulas are empirical and reproduced exactly; the constants come
//! from [`Calibration`] and have not been derived from camera optics.

use crate::{config::Calibration, geometry::Rect};

/// Width over height of a bounding rectangle.
pub fn aspect_ratio(rect: &Rect) -> f64 {
    rect.width as f64 / rect.height as f64
}

/// `(target_width * frame_area) / (2 * aspect_ratio * constant)`, with
/// `frame_area` taken from the configured capture resolution.
pub fn estimate_distance(rect: &Rect, resolution: (u32, u32), calibration: &Calibration) -> f64 {
    let frame_area = resolution.0 as f64 * resolution.1 as f64;
    (calibration.target_width * frame_area) / (2.0 * aspect_ratio(rect) * calibration.constant)
}

/// `width / 2 + height / 2` in integer pixels.
///
/// Independent of any detected rectangle, so it carries no target position.
pub fn center_line(resolution: (u32, u32)) -> f64 {
    (resolution.0 / 2 + resolution.1 / 2) as f64
}
