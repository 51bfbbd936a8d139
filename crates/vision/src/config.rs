//! Settings for the frame-processing loop.
//!
//! Deserialised from the optional `"vision"` object of the camera server's
//! configuration document. Every field has a default, so an absent section
//! still produces a working loop on the first camera.

use serde::Deserialize;

use crate::error::VisionError;

/// Which started camera the loop reads from.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum CameraSelector {
    Index(usize),
    Name(String),
}

impl Default for CameraSelector {
    fn default() -> Self {
        CameraSelector::Index(0)
    }
}

/// Opaque calibration constants of the aspect-ratio distance estimate.
///
/// Units are whatever the constants were measured in; nothing here
/// converts them.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Calibration {
    pub target_width: f64,
    pub constant: f64,
}

impl Default for Calibration {
    fn default() -> Self {
        Self {
            target_width: 667.08,
            constant: 0.499,
        }
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct VisionSettings {
    pub enabled: bool,
    pub camera: CameraSelector,
    /// Capture resolution the distance formula and centre line assume.
    pub width: u32,
    pub height: u32,
    #[serde(rename = "target width")]
    pub target_width: f64,
    pub calibration: f64,
    /// Name of the stream carrying annotated frames.
    pub output: String,
    /// Inclusive HSV bounds, hue on the 0..=180 scale.
    pub hue: [u8; 2],
    pub saturation: [u8; 2],
    pub value: [u8; 2],
    /// Smallest region, in pixels, reported as a contour.
    #[serde(rename = "min area")]
    pub min_area: u32,
}

impl Default for VisionSettings {
    fn default() -> Self {
        let calibration = Calibration::default();
        Self {
            enabled: true,
            camera: CameraSelector::default(),
            width: 1280,
            height: 720,
            target_width: calibration.target_width,
            calibration: calibration.constant,
            output: "processed".to_string(),
            hue: [50, 90],
            saturation: [100, 255],
            value: [100, 255],
            min_area: 50,
        }
    }
}

impl VisionSettings {
    pub fn validate(&self) -> Result<(), VisionError> {
        if self.width == 0 || self.height == 0 {
            return Err(VisionError::InvalidSettings(
                "width and height must be positive".into(),
            ));
        }
        if !self.target_width.is_finite() {
            return Err(VisionError::InvalidSettings(
                "target width must be a finite number".into(),
            ));
        }
        if !self.calibration.is_finite() || self.calibration == 0.0 {
            return Err(VisionError::InvalidSettings(
                "calibration must be a finite, non-zero number".into(),
            ));
        }
        if self.output.trim().is_empty() {
            return Err(VisionError::InvalidSettings(
                "output stream name must not be empty".into(),
            ));
        }
        for (label, [lo, hi]) in [
            ("hue", self.hue),
            ("saturation", self.saturation),
            ("value", self.value),
        ] {
            if lo > hi {
                return Err(VisionError::InvalidSettings(format!(
                    "{label} range [{lo}, {hi}] is inverted"
                )));
            }
        }
        Ok(())
    }

    pub fn resolution(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn calibration(&self) -> Calibration {
        Calibration {
            target_width: self.target_width,
            constant: self.calibration,
        }
    }
}
