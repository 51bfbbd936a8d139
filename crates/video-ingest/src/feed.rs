//! Latest-frame slot shared between one producer and any number of sinks.
//!
//! Producers overwrite the slot; sinks never queue. A slow consumer simply
//! skips frames, which keeps every stream and the vision loop on the newest
//! image without backpressuring the capture thread.

use std::{
    sync::{Arc, Condvar, Mutex, MutexGuard},
    time::{Duration, Instant},
};

use crate::types::Frame;

struct FeedState {
    latest: Option<Arc<Frame>>,
    sequence: u64,
    last_frame_at: Option<Instant>,
}

struct FeedInner {
    name: String,
    state: Mutex<FeedState>,
    ready: Condvar,
}

/// Cloneable handle to a latest-frame slot.
#[derive(Clone)]
pub struct FrameFeed {
    inner: Arc<FeedInner>,
}

impl FrameFeed {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(FeedInner {
                name: name.into(),
                state: Mutex::new(FeedState {
                    latest: None,
                    sequence: 0,
                    last_frame_at: None,
                }),
                ready: Condvar::new(),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// True when both handles refer to the same slot.
    pub fn same_feed(&self, other: &FrameFeed) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Stable identity of the slot, usable as a map key.
    pub fn id(&self) -> usize {
        Arc::as_ptr(&self.inner) as usize
    }

    /// Publish a frame, replacing whatever sinks have not consumed yet.
    pub fn put_frame(&self, frame: Frame) {
        let mut state = self.lock();
        state.latest = Some(Arc::new(frame));
        state.sequence = state.sequence.wrapping_add(1);
        state.last_frame_at = Some(Instant::now());
        drop(state);
        self.inner.ready.notify_all();
    }

    /// Most recent frame together with its sequence number.
    pub fn latest(&self) -> Option<(u64, Arc<Frame>)> {
        let state = self.lock();
        state
            .latest
            .as_ref()
            .map(|frame| (state.sequence, frame.clone()))
    }

    pub fn sequence(&self) -> u64 {
        self.lock().sequence
    }

    /// Time since the last published frame, `None` before the first one.
    pub fn idle_for(&self) -> Option<Duration> {
        self.lock().last_frame_at.map(|at| at.elapsed())
    }

    /// Create an independent consumer that starts at the current frame.
    pub fn sink(&self) -> FrameSink {
        FrameSink {
            feed: self.clone(),
            last_seen: self.sequence(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, FeedState> {
        // A poisoned slot still holds a consistent Arc; keep serving it.
        self.inner
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Consumer cursor over a [`FrameFeed`].
pub struct FrameSink {
    feed: FrameFeed,
    last_seen: u64,
}

impl FrameSink {
    pub fn feed(&self) -> &FrameFeed {
        &self.feed
    }

    /// Wait up to `timeout` for a frame this sink has not seen yet.
    ///
    /// Returns `None` when nothing new arrived in time.
    pub fn grab_frame(&mut self, timeout: Duration) -> Option<Arc<Frame>> {
        let deadline = Instant::now() + timeout;
        let mut state = self.feed.lock();
        loop {
            if state.sequence != self.last_seen {
                if let Some(frame) = state.latest.clone() {
                    self.last_seen = state.sequence;
                    return Some(frame);
                }
            }
            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            state = self
                .feed
                .inner
                .ready
                .wait_timeout(state, deadline - now)
                .map(|(guard, _)| guard)
                .unwrap_or_else(|poisoned| poisoned.into_inner().0);
        }
    }
}
