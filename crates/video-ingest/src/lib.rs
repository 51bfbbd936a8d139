//! Camera capture for the multi-camera server.
//!
//! A [`CaptureBackend`] opens devices, [`spawn_capture`] keeps one device
//! pumping frames into a [`FrameFeed`] for the lifetime of the process, and
//! any number of [`FrameSink`]s read from that feed.

use std::{
    io,
    sync::Arc,
    thread::{self, JoinHandle},
    time::Duration,
};

use tracing::{error, info, warn};

mod camera;
mod feed;
mod ffmpeg;
mod settings;
mod types;

#[cfg(feature = "opencv")]
pub use camera::OpenCvBackend;
pub use feed::{FrameFeed, FrameSink};
pub use ffmpeg::FfmpegBackend;
pub use settings::{
    AutoControl, CameraSettings, PixelFormat, Property, PropertyValue, StreamSettings,
};
pub use types::{CaptureError, Frame, FrameFormat};

/// Delay before a failed device is reopened.
pub const REOPEN_DELAY: Duration = Duration::from_secs(1);

/// An opened capture device.
pub trait CaptureDevice: Send {
    /// Block until the device produces its next frame.
    ///
    /// `Ok(None)` means the device returned nothing usable this time.
    fn read(&mut self) -> Result<Option<Frame>, CaptureError>;
}

/// Opens capture devices with a settings write applied.
pub trait CaptureBackend: Send + Sync {
    fn open(
        &self,
        name: &str,
        path: &str,
        settings: &CameraSettings,
    ) -> Result<Box<dyn CaptureDevice>, CaptureError>;
}

/// Everything needed to reopen a device after it fails.
#[derive(Clone, Debug)]
pub struct CaptureSource {
    pub name: String,
    pub path: String,
    pub settings: CameraSettings,
}

/// Spawns a background thread that continually moves frames from `device`
/// into `feed`.
///
/// The device was opened by the caller so that open failures stay
/// synchronous. Later failures are logged and the device is reopened
/// through `backend` after [`REOPEN_DELAY`]; `on_error` is told about each
/// one.
pub fn spawn_capture(
    backend: Arc<dyn CaptureBackend>,
    source: CaptureSource,
    device: Box<dyn CaptureDevice>,
    feed: FrameFeed,
    on_error: impl Fn(&CaptureError) + Send + 'static,
) -> io::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name(format!("capture-{}", source.name))
        .spawn(move || {
            let mut device = Some(device);
            loop {
                let current = match device.as_mut() {
                    Some(current) => current,
                    None => match backend.open(&source.name, &source.path, &source.settings) {
                        Ok(reopened) => {
                            info!("camera '{}': reopened {}", source.name, source.path);
                            device.insert(reopened)
                        }
                        Err(err) => {
                            warn!("camera '{}': reopen failed: {err}", source.name);
                            on_error(&err);
                            thread::sleep(REOPEN_DELAY);
                            continue;
                        }
                    },
                };

                match current.read() {
                    Ok(Some(frame)) => feed.put_frame(frame),
                    Ok(None) => continue,
                    Err(err) => {
                        error!("camera '{}': capture error: {err}", source.name);
                        on_error(&err);
                        device = None;
                        thread::sleep(REOPEN_DELAY);
                    }
                }
            }
        })
}
