//! Camera startup and the ordered handle list.

use std::sync::Arc;

use anyhow::{Context, Result, ensure};
use tracing::info;
use video_ingest::{CameraSettings, CaptureBackend, CaptureSource, FrameFeed, spawn_capture};

use crate::{
    config::CameraRecord,
    stream::{OutputKind, StreamHub, StreamOutput},
};

/// A started camera: its feed and the output streaming it.
#[derive(Clone)]
pub struct CameraHandle {
    pub name: String,
    pub path: String,
    pub feed: FrameFeed,
    pub output: Arc<StreamOutput>,
}

/// Camera records and their handles. `handles[i]` was started from
/// `records[i]`, and neither list changes after startup.
pub struct CameraSet {
    records: Vec<CameraRecord>,
    handles: Vec<CameraHandle>,
}

impl CameraSet {
    pub fn from_parts(records: Vec<CameraRecord>, handles: Vec<CameraHandle>) -> Result<Self> {
        ensure!(
            records.len() == handles.len(),
            "{} camera records but {} handles",
            records.len(),
            handles.len()
        );
        Ok(Self { records, handles })
    }

    pub fn records(&self) -> &[CameraRecord] {
        &self.records
    }

    pub fn handles(&self) -> &[CameraHandle] {
        &self.handles
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }
}

/// Opens cameras through `B` and keeps their handles in start order.
pub struct CameraRegistry<B> {
    backend: Arc<B>,
    hub: StreamHub,
    records: Vec<CameraRecord>,
    handles: Vec<CameraHandle>,
}

impl<B: CaptureBackend + 'static> CameraRegistry<B> {
    pub fn new(backend: Arc<B>, hub: StreamHub) -> Self {
        Self {
            backend,
            hub,
            records: Vec::new(),
            handles: Vec::new(),
        }
    }

    /// Open the camera, start its capture thread and its stream output.
    ///
    /// The settings blob is applied as one write when the device opens; the
    /// optional stream blob goes to the output. Either being rejected fails
    /// the start and leaves the handle list untouched.
    pub fn start(&mut self, record: CameraRecord) -> Result<&CameraHandle> {
        info!("Starting camera '{}' on {}", record.name, record.path);

        let settings = CameraSettings::from_json(&record.raw_config)
            .with_context(|| format!("camera '{}'", record.name))?;
        let device = self
            .backend
            .open(&record.name, &record.path, &settings)
            .with_context(|| format!("camera '{}': cannot open {}", record.name, record.path))?;

        let output = self.hub.add(&record.name, OutputKind::Camera)?;
        if let Some(stream) = &record.stream_config {
            output
                .apply_settings(stream)
                .with_context(|| format!("camera '{}'", record.name))?;
        }

        let feed = FrameFeed::new(record.name.clone());
        output.bind(feed.clone());

        let label = record.name.clone();
        let backend: Arc<dyn CaptureBackend> = self.backend.clone();
        spawn_capture(
            backend,
            CaptureSource {
                name: record.name.clone(),
                path: record.path.clone(),
                settings,
            },
            device,
            feed.clone(),
            move |_| {
                metrics::counter!("camera_capture_errors_total", "camera" => label.clone())
                    .increment(1);
            },
        )
        .with_context(|| format!("camera '{}': cannot spawn capture thread", record.name))?;

        let index = self.handles.len();
        self.handles.push(CameraHandle {
            name: record.name.clone(),
            path: record.path.clone(),
            feed,
            output,
        });
        self.records.push(record);
        Ok(&self.handles[index])
    }

    pub fn handles(&self) -> &[CameraHandle] {
        &self.handles
    }

    pub fn records(&self) -> &[CameraRecord] {
        &self.records
    }

    /// Freeze the lists for sharing with the switch controller and the
    /// vision loop.
    pub fn into_set(self) -> Arc<CameraSet> {
        Arc::new(CameraSet {
            records: self.records,
            handles: self.handles,
        })
    }
}
