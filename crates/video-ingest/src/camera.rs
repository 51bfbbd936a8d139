//! Device path helpers and the OpenCV-backed capture backend.

/// Parse a `/dev/videoX` style URI and return the zero-based index if present.
pub(crate) fn parse_device_index(uri: &str) -> Option<i32> {
    if let Ok(index) = uri.parse::<i32>() {
        return Some(index);
    }
    if let Some(stripped) = uri.strip_prefix("/dev/video") {
        if !stripped.is_empty() && stripped.chars().all(|c| c.is_ascii_digit()) {
            if let Ok(index) = stripped.parse::<i32>() {
                return Some(index);
            }
        }
    }
    None
}

#[cfg(feature = "opencv")]
pub use self::opencv_backend::OpenCvBackend;

#[cfg(feature = "opencv")]
mod opencv_backend {
    use anyhow::anyhow;
    use chrono::Utc;
    use opencv::{
        core::MatTraitConstManual,
        prelude::*,
        videoio::{self, VideoCapture, VideoCaptureTrait},
    };
    use tracing::warn;

    use super::parse_device_index;
    use crate::{
        CaptureBackend, CaptureDevice,
        settings::{AutoControl, CameraSettings, PropertyValue},
        types::{CaptureError, Frame, FrameFormat},
    };

    /// Capture through OpenCV's V4L2 backend, applying the full settings set.
    #[derive(Default)]
    pub struct OpenCvBackend;

    impl CaptureBackend for OpenCvBackend {
        fn open(
            &self,
            name: &str,
            path: &str,
            settings: &CameraSettings,
        ) -> Result<Box<dyn CaptureDevice>, CaptureError> {
            let mut cap = open_video_capture(path)?;
            configure_camera(&mut cap, name, settings)?;
            Ok(Box::new(OpenCvDevice {
                uri: path.to_string(),
                cap,
                frame: Mat::default(),
            }))
        }
    }

    struct OpenCvDevice {
        uri: String,
        cap: VideoCapture,
        frame: Mat,
    }

    impl CaptureDevice for OpenCvDevice {
        fn read(&mut self) -> Result<Option<Frame>, CaptureError> {
            let ok = self
                .cap
                .read(&mut self.frame)
                .map_err(|e| CaptureError::Other(e.into()))?;
            if !ok {
                return Err(CaptureError::Ended {
                    uri: self.uri.clone(),
                });
            }

            let size = self
                .frame
                .size()
                .map_err(|e| CaptureError::Other(e.into()))?;
            if size.width <= 0 || size.height <= 0 {
                return Ok(None);
            }
            if self.frame.channels() != 3 {
                return Err(CaptureError::Other(anyhow!(
                    "expected a 3-channel BGR frame, got {} channels",
                    self.frame.channels()
                )));
            }

            let data = self
                .frame
                .data_bytes()
                .map_err(|e| CaptureError::Other(e.into()))?
                .to_vec();

            Ok(Some(Frame {
                data,
                width: size.width as u32,
                height: size.height as u32,
                timestamp_ms: Utc::now().timestamp_millis(),
                format: FrameFormat::Bgr8,
            }))
        }
    }

    /// Attempt to open a camera input either by index or URI.
    fn open_video_capture(uri: &str) -> Result<VideoCapture, CaptureError> {
        if let Some(index) = parse_device_index(uri) {
            for backend in [videoio::CAP_V4L, videoio::CAP_ANY] {
                match VideoCapture::new(index, backend) {
                    Ok(cap) => {
                        if cap.is_opened().map_err(|e| CaptureError::Other(e.into()))? {
                            return Ok(cap);
                        }
                    }
                    Err(err) => {
                        warn!("failed to open device #{index} with backend {backend}: {err}");
                    }
                }
            }
        }

        for backend in [videoio::CAP_V4L, videoio::CAP_ANY] {
            match VideoCapture::from_file(uri, backend) {
                Ok(cap) => {
                    if cap.is_opened().map_err(|e| CaptureError::Other(e.into()))? {
                        return Ok(cap);
                    }
                }
                Err(err) => {
                    warn!("failed to open {uri} with backend {backend}: {err}");
                }
            }
        }

        Err(CaptureError::Open {
            uri: uri.to_string(),
        })
    }

    fn set(
        cap: &mut VideoCapture,
        name: &str,
        label: &str,
        prop: i32,
        value: f64,
    ) -> Result<(), CaptureError> {
        match cap.set(prop, value) {
            Ok(true) => Ok(()),
            Ok(false) => Err(CaptureError::Settings(format!(
                "camera '{name}': device refused {label} = {value}"
            ))),
            Err(err) => Err(CaptureError::Other(err.into())),
        }
    }

    fn property_id(name: &str) -> Option<i32> {
        Some(match name {
            "brightness" => videoio::CAP_PROP_BRIGHTNESS,
            "contrast" => videoio::CAP_PROP_CONTRAST,
            "saturation" => videoio::CAP_PROP_SATURATION,
            "hue" => videoio::CAP_PROP_HUE,
            "gain" => videoio::CAP_PROP_GAIN,
            "sharpness" => videoio::CAP_PROP_SHARPNESS,
            "gamma" => videoio::CAP_PROP_GAMMA,
            "focus_auto" | "autofocus" => videoio::CAP_PROP_AUTOFOCUS,
            "focus_absolute" | "focus" => videoio::CAP_PROP_FOCUS,
            "zoom_absolute" | "zoom" => videoio::CAP_PROP_ZOOM,
            "backlight_compensation" => videoio::CAP_PROP_BACKLIGHT,
            _ => return None,
        })
    }

    /// Apply resolution, frame rate, pixel format and controls.
    fn configure_camera(
        cap: &mut VideoCapture,
        name: &str,
        settings: &CameraSettings,
    ) -> Result<(), CaptureError> {
        if let Some(format) = settings.pixel_format {
            let [a, b, c, d] = format.fourcc();
            let fourcc = videoio::VideoWriter::fourcc(a, b, c, d)
                .map_err(|e| CaptureError::Other(e.into()))?;
            set(cap, name, "pixel format", videoio::CAP_PROP_FOURCC, fourcc as f64)?;
        }
        if let Some(width) = settings.width {
            set(cap, name, "width", videoio::CAP_PROP_FRAME_WIDTH, width as f64)?;
        }
        if let Some(height) = settings.height {
            set(cap, name, "height", videoio::CAP_PROP_FRAME_HEIGHT, height as f64)?;
        }
        if let Some(fps) = settings.fps {
            set(cap, name, "fps", videoio::CAP_PROP_FPS, fps as f64)?;
        }
        if let Some(brightness) = settings.brightness {
            set(
                cap,
                name,
                "brightness",
                videoio::CAP_PROP_BRIGHTNESS,
                brightness as f64,
            )?;
        }
        match settings.white_balance {
            Some(AutoControl::Auto) => {
                set(cap, name, "white balance", videoio::CAP_PROP_AUTO_WB, 1.0)?
            }
            Some(AutoControl::Hold) => {
                set(cap, name, "white balance", videoio::CAP_PROP_AUTO_WB, 0.0)?
            }
            Some(AutoControl::Manual(value)) => {
                set(cap, name, "white balance", videoio::CAP_PROP_AUTO_WB, 0.0)?;
                set(
                    cap,
                    name,
                    "white balance",
                    videoio::CAP_PROP_WB_TEMPERATURE,
                    value as f64,
                )?;
            }
            None => {}
        }
        // V4L2 auto exposure: 3 = aperture priority, 1 = manual.
        match settings.exposure {
            Some(AutoControl::Auto) => {
                set(cap, name, "exposure", videoio::CAP_PROP_AUTO_EXPOSURE, 3.0)?
            }
            Some(AutoControl::Hold) => {
                set(cap, name, "exposure", videoio::CAP_PROP_AUTO_EXPOSURE, 1.0)?
            }
            Some(AutoControl::Manual(value)) => {
                set(cap, name, "exposure", videoio::CAP_PROP_AUTO_EXPOSURE, 1.0)?;
                set(cap, name, "exposure", videoio::CAP_PROP_EXPOSURE, value as f64)?;
            }
            None => {}
        }
        for property in &settings.properties {
            let prop = property_id(&property.name).ok_or_else(|| {
                CaptureError::Settings(format!(
                    "camera '{name}': unknown property {:?}",
                    property.name
                ))
            })?;
            let value = match &property.value {
                PropertyValue::Integer(v) => *v as f64,
                PropertyValue::Boolean(b) => f64::from(u8::from(*b)),
                PropertyValue::Text(text) => {
                    return Err(CaptureError::Settings(format!(
                        "camera '{name}': property {:?} expects a number, got {text:?}",
                        property.name
                    )));
                }
            };
            set(cap, name, &property.name, prop, value)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_index_from_path_or_number() {
        assert_eq!(parse_device_index("0"), Some(0));
        assert_eq!(parse_device_index("/dev/video3"), Some(3));
        assert_eq!(parse_device_index("/dev/video"), None);
        assert_eq!(parse_device_index("/dev/v4l/by-id/usb-cam"), None);
    }
}
