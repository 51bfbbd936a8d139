//! Target detection and the frame-processing loop.
//!
//! - `config`: loop settings and calibration constants.
//! - `detect`: contour extraction primitive.
//! - `distance`: aspect-ratio distance estimate and centre line.
//! - `annotation`: debug overlay for the processed stream.
//! - `snapshot`: last-published detection set shared with readers.
//! - `pipeline`: the capture → detect → annotate → publish cycle.

mod annotation;
mod config;
mod detect;
mod distance;
mod error;
mod geometry;
mod pipeline;
mod snapshot;
mod telemetry;

pub use annotation::{annotate_targets, draw_line, draw_rectangle};
pub use config::{Calibration, CameraSelector, VisionSettings};
pub use detect::{ContourDetector, HsvThresholdDetector};
pub use distance::{aspect_ratio, center_line, estimate_distance};
pub use error::VisionError;
pub use geometry::{Contour, Point, Rect};
pub use pipeline::{CycleOutcome, DEFAULT_GRAB_TIMEOUT, VisionLoop};
pub use snapshot::{DetectionFrame, DetectionStore, Target};
pub use telemetry::{CENTER_LINE_KEY, TelemetryPublisher};
