//! Interpretation of the opaque per-camera and per-stream settings blobs.
//!
//! The configuration layer forwards these blobs verbatim. Everything is
//! validated here before any of it reaches a device, so a rejected blob
//! never leaves a camera half-configured.

use serde_json::{Map, Value};

use crate::types::CaptureError;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PixelFormat {
    Mjpeg,
    Yuyv,
    Rgb565,
    Bgr,
    Gray,
}

impl PixelFormat {
    fn parse(raw: &str) -> Option<Self> {
        match raw.to_ascii_uppercase().as_str() {
            "MJPEG" => Some(PixelFormat::Mjpeg),
            "YUYV" => Some(PixelFormat::Yuyv),
            "RGB565" => Some(PixelFormat::Rgb565),
            "BGR" => Some(PixelFormat::Bgr),
            "GRAY" => Some(PixelFormat::Gray),
            _ => None,
        }
    }

    /// FFmpeg `-input_format` name for V4L2 devices.
    pub fn ffmpeg_name(self) -> &'static str {
        match self {
            PixelFormat::Mjpeg => "mjpeg",
            PixelFormat::Yuyv => "yuyv422",
            PixelFormat::Rgb565 => "rgb565le",
            PixelFormat::Bgr => "bgr24",
            PixelFormat::Gray => "gray",
        }
    }

    pub fn fourcc(self) -> [char; 4] {
        match self {
            PixelFormat::Mjpeg => ['M', 'J', 'P', 'G'],
            PixelFormat::Yuyv => ['Y', 'U', 'Y', 'V'],
            PixelFormat::Rgb565 => ['R', 'G', 'B', 'P'],
            PixelFormat::Bgr => ['B', 'G', 'R', '3'],
            PixelFormat::Gray => ['G', 'R', 'E', 'Y'],
        }
    }
}

/// Automatic, frozen, or manual value for white balance and exposure.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AutoControl {
    Auto,
    Hold,
    Manual(i32),
}

impl AutoControl {
    fn parse(field: &str, value: &Value) -> Result<Self, CaptureError> {
        match value {
            Value::String(raw) if raw.eq_ignore_ascii_case("auto") => Ok(AutoControl::Auto),
            Value::String(raw) if raw.eq_ignore_ascii_case("hold") => Ok(AutoControl::Hold),
            Value::String(raw) => raw
                .trim()
                .parse::<i32>()
                .map(AutoControl::Manual)
                .map_err(|_| settings_error(format!("{field}: unrecognised value {raw:?}"))),
            Value::Number(n) => n
                .as_i64()
                .and_then(|v| i32::try_from(v).ok())
                .map(AutoControl::Manual)
                .ok_or_else(|| settings_error(format!("{field}: expected an integer"))),
            _ => Err(settings_error(format!(
                "{field}: expected \"auto\", \"hold\" or an integer"
            ))),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum PropertyValue {
    Integer(i64),
    Boolean(bool),
    Text(String),
}

#[derive(Clone, Debug, PartialEq)]
pub struct Property {
    pub name: String,
    pub value: PropertyValue,
}

/// Device-side settings applied when a camera is opened.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct CameraSettings {
    pub pixel_format: Option<PixelFormat>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub fps: Option<u32>,
    /// Brightness as a percentage of the device range.
    pub brightness: Option<u8>,
    pub white_balance: Option<AutoControl>,
    pub exposure: Option<AutoControl>,
    pub properties: Vec<Property>,
}

impl CameraSettings {
    /// Interpret a camera's settings blob. Keys the capture side does not own
    /// (`name`, `path`, `stream`, anything unknown) are left alone.
    pub fn from_json(blob: &Value) -> Result<Self, CaptureError> {
        let Some(obj) = blob.as_object() else {
            return Err(settings_error("settings must be a JSON object".into()));
        };

        let pixel_format = match obj.get("pixel format") {
            None | Some(Value::Null) => None,
            Some(Value::String(raw)) => Some(
                PixelFormat::parse(raw)
                    .ok_or_else(|| settings_error(format!("unknown pixel format {raw:?}")))?,
            ),
            Some(_) => return Err(settings_error("pixel format: expected a string".into())),
        };

        let brightness = match positive_int(obj, "brightness", settings_error, true)? {
            Some(value) if value > 100 => {
                return Err(settings_error(format!(
                    "brightness: {value} is outside 0..=100"
                )));
            }
            other => other.map(|v| v as u8),
        };

        Ok(Self {
            pixel_format,
            width: positive_int(obj, "width", settings_error, false)?,
            height: positive_int(obj, "height", settings_error, false)?,
            fps: positive_int(obj, "fps", settings_error, false)?,
            brightness,
            white_balance: obj
                .get("white balance")
                .map(|v| AutoControl::parse("white balance", v))
                .transpose()?,
            exposure: obj
                .get("exposure")
                .map(|v| AutoControl::parse("exposure", v))
                .transpose()?,
            properties: parse_properties(obj.get("properties"), settings_error)?,
        })
    }

    /// Resolution requested by the blob, falling back to `default`.
    pub fn resolution_or(&self, default: (u32, u32)) -> (u32, u32) {
        (
            self.width.unwrap_or(default.0),
            self.height.unwrap_or(default.1),
        )
    }
}

/// Output-side settings for an MJPEG stream.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StreamSettings {
    /// JPEG quality, or `None` to use `default_compression`.
    pub compression: Option<u8>,
    pub default_compression: u8,
    pub fps: Option<u32>,
    pub width: Option<u32>,
    pub height: Option<u32>,
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            compression: None,
            default_compression: 80,
            fps: None,
            width: None,
            height: None,
        }
    }
}

impl StreamSettings {
    pub fn from_json(blob: &Value) -> Result<Self, CaptureError> {
        let Some(obj) = blob.as_object() else {
            return Err(stream_error("stream settings must be a JSON object".into()));
        };
        let mut settings = StreamSettings::default();
        for property in parse_properties(obj.get("properties"), stream_error)? {
            let PropertyValue::Integer(value) = property.value else {
                return Err(stream_error(format!(
                    "{}: expected an integer",
                    property.name
                )));
            };
            match property.name.as_str() {
                "compression" => {
                    settings.compression = match value {
                        -1 => None,
                        0..=100 => Some(value as u8),
                        _ => return Err(stream_error(format!("compression: {value} out of range"))),
                    }
                }
                "default_compression" => {
                    if !(0..=100).contains(&value) {
                        return Err(stream_error(format!(
                            "default_compression: {value} out of range"
                        )));
                    }
                    settings.default_compression = value as u8;
                }
                "fps" => settings.fps = Some(positive(&property.name, value, stream_error)?),
                "width" => settings.width = Some(positive(&property.name, value, stream_error)?),
                "height" => settings.height = Some(positive(&property.name, value, stream_error)?),
                other => return Err(stream_error(format!("unknown stream property {other:?}"))),
            }
        }
        Ok(settings)
    }

    pub fn quality(&self) -> u8 {
        self.compression
            .unwrap_or(self.default_compression)
            .clamp(1, 100)
    }
}

fn settings_error(msg: String) -> CaptureError {
    CaptureError::Settings(msg)
}

fn stream_error(msg: String) -> CaptureError {
    CaptureError::StreamSettings(msg)
}

fn positive(field: &str, value: i64, err: fn(String) -> CaptureError) -> Result<u32, CaptureError> {
    u32::try_from(value)
        .ok()
        .filter(|v| *v > 0)
        .ok_or_else(|| err(format!("{field}: expected a positive integer")))
}

fn positive_int(
    obj: &Map<String, Value>,
    field: &str,
    err: fn(String) -> CaptureError,
    allow_zero: bool,
) -> Result<Option<u32>, CaptureError> {
    match obj.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => match n.as_u64().and_then(|v| u32::try_from(v).ok()) {
            Some(0) if !allow_zero => Err(err(format!("{field}: must be greater than zero"))),
            Some(v) => Ok(Some(v)),
            None => Err(err(format!("{field}: expected a non-negative integer"))),
        },
        Some(_) => Err(err(format!("{field}: expected an integer"))),
    }
}

fn parse_properties(
    value: Option<&Value>,
    err: fn(String) -> CaptureError,
) -> Result<Vec<Property>, CaptureError> {
    let entries = match value {
        None | Some(Value::Null) => return Ok(Vec::new()),
        Some(Value::Array(entries)) => entries,
        Some(_) => return Err(err("properties: expected an array".into())),
    };

    entries
        .iter()
        .map(|entry| {
            let name = entry
                .get("name")
                .and_then(Value::as_str)
                .ok_or_else(|| err("property entry is missing a name".into()))?;
            let value = match entry.get("value") {
                Some(Value::Number(n)) => PropertyValue::Integer(
                    n.as_i64()
                        .or_else(|| n.as_f64().map(|f| f as i64))
                        .ok_or_else(|| err(format!("property {name:?}: bad number")))?,
                ),
                Some(Value::Bool(b)) => PropertyValue::Boolean(*b),
                Some(Value::String(s)) => PropertyValue::Text(s.clone()),
                _ => return Err(err(format!("property {name:?}: missing or unsupported value"))),
            };
            Ok(Property {
                name: name.to_string(),
                value,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn camera_blob_ignores_foreign_keys() {
        let blob = json!({
            "name": "front",
            "path": "/dev/video0",
            "pixel format": "mjpeg",
            "width": 320,
            "height": 240,
            "fps": 30,
            "brightness": 40,
            "white balance": "auto",
            "exposure": 12,
            "properties": [{ "name": "focus_auto", "value": false }],
            "stream": { "properties": [] },
            "vendor specific": { "anything": true }
        });
        let settings = CameraSettings::from_json(&blob).unwrap();
        assert_eq!(settings.pixel_format, Some(PixelFormat::Mjpeg));
        assert_eq!(settings.resolution_or((640, 480)), (320, 240));
        assert_eq!(settings.fps, Some(30));
        assert_eq!(settings.brightness, Some(40));
        assert_eq!(settings.white_balance, Some(AutoControl::Auto));
        assert_eq!(settings.exposure, Some(AutoControl::Manual(12)));
        assert_eq!(
            settings.properties,
            vec![Property {
                name: "focus_auto".into(),
                value: PropertyValue::Boolean(false),
            }]
        );
    }

    #[test]
    fn camera_blob_rejects_bad_values() {
        for blob in [
            json!({ "pixel format": "H265" }),
            json!({ "width": "wide" }),
            json!({ "fps": 0 }),
            json!({ "brightness": 140 }),
            json!({ "exposure": "sometimes" }),
            json!({ "properties": [{ "value": 1 }] }),
        ] {
            assert!(
                matches!(CameraSettings::from_json(&blob), Err(CaptureError::Settings(_))),
                "{blob} should be rejected"
            );
        }
    }

    #[test]
    fn stream_blob_reads_known_properties() {
        let blob = json!({ "properties": [
            { "name": "compression", "value": 55 },
            { "name": "fps", "value": 15 }
        ]});
        let settings = StreamSettings::from_json(&blob).unwrap();
        assert_eq!(settings.quality(), 55);
        assert_eq!(settings.fps, Some(15));
    }

    #[test]
    fn stream_blob_rejects_unknown_property() {
        let blob = json!({ "properties": [{ "name": "sharpness", "value": 3 }] });
        assert!(matches!(
            StreamSettings::from_json(&blob),
            Err(CaptureError::StreamSettings(_))
        ));
    }
}
