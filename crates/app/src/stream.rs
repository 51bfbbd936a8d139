//! Named streaming outputs and their sources.
//!
//! Every output serves frames from at most one [`FrameFeed`]. Camera outputs
//! are bound once at startup, switched outputs are rebound by the switch
//! controller, and the processed output carries the vision loop's frames.

use std::{
    fmt,
    sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard},
    time::Duration,
};

use image::{ExtendedColorType, RgbImage, codecs::jpeg::JpegEncoder, imageops::FilterType};
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use video_ingest::{CaptureError, Frame, FrameFeed, StreamSettings};

const DEFAULT_FRAME_INTERVAL: Duration = Duration::from_millis(33);

#[derive(Debug, Error)]
pub enum StreamError {
    #[error("stream name '{0}' is already in use")]
    DuplicateName(String),
    #[error("frame buffer does not match {width}x{height}")]
    BadFrame { width: u32, height: u32 },
    #[error("JPEG encoding failed: {0}")]
    Encode(#[from] image::ImageError),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputKind {
    Camera,
    Switched,
    Processed,
}

impl fmt::Display for OutputKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            OutputKind::Camera => "camera",
            OutputKind::Switched => "switched",
            OutputKind::Processed => "processed",
        })
    }
}

pub struct StreamOutput {
    name: String,
    kind: OutputKind,
    source: RwLock<Option<FrameFeed>>,
    settings: RwLock<StreamSettings>,
}

impl StreamOutput {
    pub fn new(name: impl Into<String>, kind: OutputKind) -> Self {
        Self {
            name: name.into(),
            kind,
            source: RwLock::new(None),
            settings: RwLock::new(StreamSettings::default()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Replace the source in one assignment, returning the previous one.
    pub fn bind(&self, feed: FrameFeed) -> Option<FrameFeed> {
        write(&self.source).replace(feed)
    }

    pub fn source(&self) -> Option<FrameFeed> {
        read(&self.source).clone()
    }

    /// Apply a stream settings blob; a rejected blob leaves the output as is.
    pub fn apply_settings(&self, blob: &Value) -> Result<(), CaptureError> {
        let settings = StreamSettings::from_json(blob)?;
        *write(&self.settings) = settings;
        Ok(())
    }

    pub fn settings(&self) -> StreamSettings {
        *read(&self.settings)
    }

    /// Pause between MJPEG parts, derived from the configured frame rate.
    pub fn frame_interval(&self) -> Duration {
        match self.settings().fps {
            Some(fps) if fps > 0 => {
                Duration::from_millis(1000 / u64::from(fps)).max(Duration::from_millis(1))
            }
            _ => DEFAULT_FRAME_INTERVAL,
        }
    }

    /// Latest frame of the bound source, tagged with the source identity and
    /// its sequence number.
    pub fn current_frame(&self) -> Option<(usize, u64, Arc<Frame>)> {
        let feed = self.source()?;
        let (sequence, frame) = feed.latest()?;
        Some((feed.id(), sequence, frame))
    }

    /// Encode `frame` with this output's size and quality settings.
    pub fn encode(&self, frame: &Frame) -> Result<Vec<u8>, StreamError> {
        encode_jpeg(frame, &self.settings())
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct OutputInfo {
    pub name: String,
    pub kind: OutputKind,
    pub source: Option<String>,
}

/// Registry of every output, in creation order.
#[derive(Clone, Default)]
pub struct StreamHub {
    outputs: Arc<RwLock<Vec<Arc<StreamOutput>>>>,
}

impl StreamHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, name: &str, kind: OutputKind) -> Result<Arc<StreamOutput>, StreamError> {
        let mut outputs = write(&self.outputs);
        if outputs.iter().any(|o| o.name == name) {
            return Err(StreamError::DuplicateName(name.to_string()));
        }
        let output = Arc::new(StreamOutput::new(name, kind));
        outputs.push(output.clone());
        Ok(output)
    }

    pub fn get(&self, name: &str) -> Option<Arc<StreamOutput>> {
        read(&self.outputs).iter().find(|o| o.name == name).cloned()
    }

    pub fn describe(&self) -> Vec<OutputInfo> {
        read(&self.outputs)
            .iter()
            .map(|output| OutputInfo {
                name: output.name.clone(),
                kind: output.kind,
                source: output.source().map(|feed| feed.name().to_string()),
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        read(&self.outputs).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Encode a BGR frame as JPEG, scaled to the requested stream size.
pub fn encode_jpeg(frame: &Frame, settings: &StreamSettings) -> Result<Vec<u8>, StreamError> {
    let bad_frame = || StreamError::BadFrame {
        width: frame.width,
        height: frame.height,
    };
    let mut image =
        RgbImage::from_raw(frame.width, frame.height, frame.to_rgb()).ok_or_else(bad_frame)?;

    let target = (
        settings.width.unwrap_or(frame.width),
        settings.height.unwrap_or(frame.height),
    );
    if target != (frame.width, frame.height) {
        image = image::imageops::resize(&image, target.0, target.1, FilterType::Triangle);
    }

    let mut jpeg = Vec::with_capacity(image.as_raw().len() / 8);
    JpegEncoder::new_with_quality(&mut jpeg, settings.quality()).encode(
        image.as_raw(),
        image.width(),
        image.height(),
        ExtendedColorType::Rgb8,
    )?;
    Ok(jpeg)
}

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|poisoned| poisoned.into_inner())
}
