//! Startup sequence: cameras, then switched outputs, then the vision loop.

use std::{sync::Arc, thread::JoinHandle};

use anyhow::{Context, Result, bail};
use tracing::{info, warn};
use video_ingest::{CaptureBackend, FrameFeed};
use vision::{CameraSelector, DetectionStore, HsvThresholdDetector, VisionLoop, VisionSettings};

use crate::{
    config::ServerConfig,
    control::ControlTable,
    registry::{CameraHandle, CameraRegistry, CameraSet},
    stream::{OutputKind, StreamHub, StreamOutput},
    switch::SwitchController,
    telemetry,
};

/// Everything the setup sequence produced.
pub struct Services {
    pub hub: StreamHub,
    pub cameras: Arc<CameraSet>,
    pub switched: Vec<Arc<StreamOutput>>,
    pub control: ControlTable,
    pub detections: DetectionStore,
    /// Feed behind the processed output, when the vision loop is enabled.
    pub processed: Option<FrameFeed>,
}

impl Services {
    pub fn camera_feeds(&self) -> Vec<FrameFeed> {
        self.cameras
            .handles()
            .iter()
            .map(|handle| handle.feed.clone())
            .collect()
    }
}

/// Start every camera in declaration order and wire the switched outputs.
///
/// Any failure aborts the whole sequence.
pub fn start_services<B: CaptureBackend + 'static>(
    config: &ServerConfig,
    backend: Arc<B>,
    control: ControlTable,
) -> Result<Services> {
    let hub = StreamHub::new();

    let mut registry = CameraRegistry::new(backend, hub.clone());
    for record in &config.cameras {
        registry.start(record.clone())?;
    }
    let cameras = registry.into_set();

    let switches = SwitchController::new(cameras.clone(), hub.clone());
    let switched = config
        .switched
        .iter()
        .map(|record| switches.bind(record, &control))
        .collect::<Result<Vec<_>, _>>()
        .context("cannot start switched camera")?;

    let processed = if config.vision.enabled {
        let output = hub.add(&config.vision.output, OutputKind::Processed)?;
        let feed = FrameFeed::new(config.vision.output.clone());
        output.bind(feed.clone());
        Some(feed)
    } else {
        None
    };

    Ok(Services {
        hub,
        cameras,
        switched,
        control,
        detections: DetectionStore::new(),
        processed,
    })
}

/// Camera the vision loop reads from.
pub fn select_vision_camera<'a>(
    cameras: &'a CameraSet,
    selector: &CameraSelector,
) -> Option<&'a CameraHandle> {
    match selector {
        CameraSelector::Index(index) => cameras.handles().get(*index),
        CameraSelector::Name(name) => cameras.handles().iter().find(|h| h.name == *name),
    }
}

/// Start the vision loop on its own thread.
///
/// Returns `None` when the loop is disabled or there is no camera at all.
/// The loader already rejects an unknown camera; the error here covers
/// settings built by hand.
pub fn spawn_vision_loop(
    services: &Services,
    settings: &VisionSettings,
) -> Result<Option<JoinHandle<()>>> {
    if !settings.enabled {
        info!("vision loop disabled");
        return Ok(None);
    }
    if services.cameras.is_empty() {
        warn!("no cameras configured; vision loop not started");
        return Ok(None);
    }
    let Some(camera) = select_vision_camera(&services.cameras, &settings.camera) else {
        bail!("vision camera {:?} is not a configured camera", settings.camera);
    };

    let mut vision = VisionLoop::new(
        camera.feed.sink(),
        HsvThresholdDetector::from_settings(settings),
        services.detections.clone(),
        Arc::new(services.control.clone()),
        settings,
    );
    if let Some(processed) = &services.processed {
        vision = vision.with_output(processed.clone());
    }

    info!("Starting vision loop on camera '{}'", camera.name);
    let handle = telemetry::spawn_thread("vision-loop", move || vision.run())
        .context("Failed to spawn vision loop thread")?;
    Ok(Some(handle))
}
