use std::sync::{Arc, Mutex, MutexGuard};

use serde::Serialize;

use crate::geometry::Rect;

/// One detected region with its distance estimate.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Target {
    pub rect: Rect,
    pub aspect_ratio: f64,
    pub distance: f64,
}

/// Result of one successful detection cycle.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct DetectionFrame {
    pub frame_number: u64,
    pub timestamp_ms: i64,
    pub targets: Vec<Target>,
    pub center_line: f64,
}

/// Last-published detection set.
///
/// The vision loop is the only writer. Readers take an `Arc` copy of the
/// snapshot and never hold the lock while using it.
#[derive(Clone, Default)]
pub struct DetectionStore {
    inner: Arc<Mutex<Option<Arc<DetectionFrame>>>>,
}

impl DetectionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> Option<Arc<DetectionFrame>> {
        self.lock().clone()
    }

    /// Run `f` inside the store's critical section with write access to the
    /// published slot.
    pub(crate) fn update<R>(&self, f: impl FnOnce(&mut Option<Arc<DetectionFrame>>) -> R) -> R {
        let mut slot = self.lock();
        f(&mut slot)
    }

    fn lock(&self) -> MutexGuard<'_, Option<Arc<DetectionFrame>>> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
