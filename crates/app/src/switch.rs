//! Switched outputs rebound from control-plane signals.
//!
//! A signal is resolved against the frozen [`CameraSet`]: numbers select by
//! index, text selects the first camera with that name, and anything else
//! (or anything that does not resolve) is dropped so the last good binding
//! stays live.

use std::sync::Arc;

use tracing::{debug, info};

use crate::{
    config::SwitchedCameraRecord,
    control::{ControlPlane, ControlValue},
    registry::CameraSet,
    stream::{OutputKind, StreamError, StreamHub, StreamOutput},
};

/// How a control-plane value picks a camera.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SourceSelector {
    ByIndex(i64),
    ByName(String),
}

impl SourceSelector {
    /// Numbers are truncated toward zero; only numbers and text select.
    pub fn from_value(value: &ControlValue) -> Option<Self> {
        match value {
            ControlValue::Number(n) => Some(SourceSelector::ByIndex(n.trunc() as i64)),
            ControlValue::Text(name) => Some(SourceSelector::ByName(name.clone())),
            ControlValue::Boolean(_) | ControlValue::Other(_) => None,
        }
    }

    /// Position in `cameras` this selector refers to.
    pub fn resolve(&self, cameras: &CameraSet) -> Option<usize> {
        match self {
            SourceSelector::ByIndex(index) => usize::try_from(*index)
                .ok()
                .filter(|index| *index < cameras.len()),
            SourceSelector::ByName(name) => {
                cameras.records().iter().position(|record| record.name == *name)
            }
        }
    }
}

/// Rebind `output` according to `value`. Returns whether a binding was made.
pub fn apply_signal(output: &StreamOutput, cameras: &CameraSet, value: &ControlValue) -> bool {
    let target = SourceSelector::from_value(value).and_then(|selector| selector.resolve(cameras));
    let Some(index) = target else {
        debug!("switched camera '{}': ignoring {value}", output.name());
        metrics::counter!("camera_switch_events_total", "result" => "ignored").increment(1);
        return false;
    };

    let handle = &cameras.handles()[index];
    output.bind(handle.feed.clone());
    info!("switched camera '{}' now shows '{}'", output.name(), handle.name);
    metrics::counter!("camera_switch_events_total", "result" => "bound").increment(1);
    true
}

/// Creates switched outputs and wires them to their selector keys.
pub struct SwitchController {
    cameras: Arc<CameraSet>,
    hub: StreamHub,
}

impl SwitchController {
    pub fn new(cameras: Arc<CameraSet>, hub: StreamHub) -> Self {
        Self { cameras, hub }
    }

    /// Create the output for `record`, unbound, and subscribe it to its key.
    pub fn bind(
        &self,
        record: &SwitchedCameraRecord,
        control: &dyn ControlPlane,
    ) -> Result<Arc<StreamOutput>, StreamError> {
        info!(
            "Starting switched camera '{}' on key '{}'",
            record.name, record.selector_key
        );
        let output = self.hub.add(&record.name, OutputKind::Switched)?;

        let target = output.clone();
        let cameras = self.cameras.clone();
        control.subscribe(
            &record.selector_key,
            Box::new(move |value| {
                apply_signal(&target, &cameras, value);
            }),
        );
        Ok(output)
    }
}
