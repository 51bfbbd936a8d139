use std::{
    io,
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use tracing::{info, warn};
use video_ingest::FrameFeed;

use crate::telemetry;

pub const STALE_THRESHOLD: Duration = Duration::from_secs(2);
const POLL_INTERVAL: Duration = Duration::from_millis(500);

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum HealthEvent {
    Stale { camera: String, idle: Duration },
    Recovered { camera: String },
}

/// Tracks which camera feeds have stopped producing frames.
///
/// Only transitions are reported; nothing is ever restarted from here.
pub struct FeedHealth {
    feeds: Vec<(FrameFeed, bool)>,
    threshold: Duration,
    started: Instant,
}

impl FeedHealth {
    pub fn new(feeds: Vec<FrameFeed>, threshold: Duration) -> Self {
        Self {
            feeds: feeds.into_iter().map(|feed| (feed, false)).collect(),
            threshold,
            started: Instant::now(),
        }
    }

    pub fn check(&mut self) -> Vec<HealthEvent> {
        let mut events = Vec::new();
        for (feed, stale) in &mut self.feeds {
            // A feed that never produced a frame counts from monitor start.
            let idle = feed.idle_for().unwrap_or_else(|| self.started.elapsed());
            let now_stale = idle > self.threshold;
            if now_stale == *stale {
                continue;
            }
            *stale = now_stale;
            let camera = feed.name().to_string();
            events.push(if now_stale {
                HealthEvent::Stale { camera, idle }
            } else {
                HealthEvent::Recovered { camera }
            });
        }
        events
    }
}

pub fn spawn_health_monitor(feeds: Vec<FrameFeed>) -> io::Result<JoinHandle<()>> {
    let mut health = FeedHealth::new(feeds, STALE_THRESHOLD);
    telemetry::spawn_thread("camera-health", move || {
        loop {
            thread::sleep(POLL_INTERVAL);
            for event in health.check() {
                match event {
                    HealthEvent::Stale { camera, idle } => {
                        warn!("camera '{camera}': no frames for {:.1}s", idle.as_secs_f64())
                    }
                    HealthEvent::Recovered { camera } => {
                        info!("camera '{camera}': frames flowing again")
                    }
                }
            }
        }
    })
}
