//! Capture → detect → annotate → publish cycle.
//!
//! The loop owns one [`FrameSink`] on a camera feed and runs on a single
//! dedicated thread. Its only suspension point is the bounded frame grab;
//! a grab that yields nothing is a no-op cycle.

use std::{sync::Arc, time::Duration};

use tracing::{debug, warn};
use video_ingest::{FrameFeed, FrameSink};

use crate::{
    annotation::annotate_targets,
    config::{Calibration, VisionSettings},
    detect::ContourDetector,
    distance::{aspect_ratio, center_line, estimate_distance},
    error::VisionError,
    geometry::{Contour, Rect},
    snapshot::{DetectionFrame, DetectionStore, Target},
    telemetry::{CENTER_LINE_KEY, TelemetryPublisher},
};

pub const DEFAULT_GRAB_TIMEOUT: Duration = Duration::from_millis(100);

/// What a single cycle did.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CycleOutcome {
    /// No new valid frame was available.
    NoFrame,
    /// A frame was processed but no contours were found.
    NoTargets,
    /// A new detection set was published.
    Published { targets: usize },
}

impl CycleOutcome {
    fn label(self) -> &'static str {
        match self {
            CycleOutcome::NoFrame => "no_frame",
            CycleOutcome::NoTargets => "no_targets",
            CycleOutcome::Published { .. } => "published",
        }
    }
}

pub struct VisionLoop<D> {
    sink: FrameSink,
    detector: D,
    store: DetectionStore,
    telemetry: Arc<dyn TelemetryPublisher>,
    output: Option<FrameFeed>,
    resolution: (u32, u32),
    calibration: Calibration,
    grab_timeout: Duration,
    frame_number: u64,
}

impl<D: ContourDetector> VisionLoop<D> {
    pub fn new(
        sink: FrameSink,
        detector: D,
        store: DetectionStore,
        telemetry: Arc<dyn TelemetryPublisher>,
        settings: &VisionSettings,
    ) -> Self {
        Self {
            sink,
            detector,
            store,
            telemetry,
            output: None,
            resolution: settings.resolution(),
            calibration: settings.calibration(),
            grab_timeout: DEFAULT_GRAB_TIMEOUT,
            frame_number: 0,
        }
    }

    /// Forward every processed frame, annotated when targets were found.
    pub fn with_output(mut self, output: FrameFeed) -> Self {
        self.output = Some(output);
        self
    }

    pub fn with_grab_timeout(mut self, timeout: Duration) -> Self {
        self.grab_timeout = timeout;
        self
    }

    /// Run one Acquire/Process cycle.
    pub fn step(&mut self) -> Result<CycleOutcome, VisionError> {
        let Some(frame) = self.sink.grab_frame(self.grab_timeout) else {
            return Ok(CycleOutcome::NoFrame);
        };
        if !frame.is_valid() {
            return Ok(CycleOutcome::NoFrame);
        }

        self.frame_number = self.frame_number.wrapping_add(1);
        let frame_number = self.frame_number;
        let span = tracing::info_span!(
            "vision.cycle",
            frame = frame_number,
            timestamp = frame.timestamp_ms
        );
        let _guard = span.enter();

        let rects: Vec<Rect> = self
            .detector
            .detect(&frame)?
            .iter()
            .filter_map(Contour::bounding_rect)
            .collect();

        if rects.is_empty() {
            if let Some(output) = &self.output {
                output.put_frame((*frame).clone());
            }
            return Ok(CycleOutcome::NoTargets);
        }

        let mut annotated = (*frame).clone();
        let resolution = self.resolution;
        let calibration = self.calibration;
        let telemetry = &self.telemetry;
        let center = self.store.update(|slot| {
            let targets: Vec<Target> = rects
                .iter()
                .map(|rect| Target {
                    rect: *rect,
                    aspect_ratio: aspect_ratio(rect),
                    distance: estimate_distance(rect, resolution, &calibration),
                })
                .collect();
            for (index, target) in targets.iter().enumerate() {
                debug!(
                    "target {index}: x={} y={} width={} height={} distance={:.3}",
                    target.rect.x,
                    target.rect.y,
                    target.rect.width,
                    target.rect.height,
                    target.distance
                );
            }

            let center = center_line(resolution);
            *slot = Some(Arc::new(DetectionFrame {
                frame_number,
                timestamp_ms: frame.timestamp_ms,
                targets,
                center_line: center,
            }));
            annotate_targets(&mut annotated, &rects, resolution);
            telemetry.put_number(CENTER_LINE_KEY, center);
            center
        });

        if let Some(output) = &self.output {
            output.put_frame(annotated);
        }
        metrics::gauge!("vision_targets").set(rects.len() as f64);
        metrics::gauge!("vision_center_line").set(center);

        Ok(CycleOutcome::Published {
            targets: rects.len(),
        })
    }

    /// Cycle forever. Errors are logged and never end the loop.
    pub fn run(mut self) {
        debug!(
            "vision loop started on '{}' ({}x{})",
            self.sink.feed().name(),
            self.resolution.0,
            self.resolution.1
        );
        loop {
            match self.step() {
                Ok(outcome) => {
                    metrics::counter!("vision_cycles_total", "outcome" => outcome.label())
                        .increment(1);
                }
                Err(err) => {
                    metrics::counter!("vision_cycles_total", "outcome" => "error").increment(1);
                    warn!("vision cycle failed: {err}");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use video_ingest::Frame;

    use super::*;
    use crate::{
        annotation::WHITE,
        detect::HsvThresholdDetector,
        geometry::Point,
    };

    #[derive(Default)]
    struct Recorder {
        values: Mutex<Vec<(String, f64)>>,
    }

    impl TelemetryPublisher for Recorder {
        fn put_number(&self, key: &str, value: f64) {
            self.values.lock().unwrap().push((key.to_string(), value));
        }
    }

    fn rect_contour(rect: Rect) -> Contour {
        Contour {
            points: vec![
                Point::new(rect.x, rect.y),
                Point::new(rect.x + rect.width - 1, rect.y + rect.height - 1),
            ],
        }
    }

    struct Harness {
        feed: FrameFeed,
        output: FrameFeed,
        store: DetectionStore,
        telemetry: Arc<Recorder>,
    }

    fn harness<D: ContourDetector>(detector: D) -> (Harness, VisionLoop<D>) {
        let feed = FrameFeed::new("cam");
        let output = FrameFeed::new("processed");
        let store = DetectionStore::new();
        let telemetry = Arc::new(Recorder::default());
        let vision = VisionLoop::new(
            feed.sink(),
            detector,
            store.clone(),
            telemetry.clone(),
            &VisionSettings::default(),
        )
        .with_output(output.clone())
        .with_grab_timeout(Duration::from_millis(5));
        (
            Harness {
                feed,
                output,
                store,
                telemetry,
            },
            vision,
        )
    }

    #[test]
    fn no_frame_is_a_no_op() {
        let (h, mut vision) = harness(|_: &Frame| -> Result<Vec<Contour>, VisionError> {
            panic!("detector must not run without a frame")
        });
        assert_eq!(vision.step().unwrap(), CycleOutcome::NoFrame);

        h.feed.put_frame(Frame::blank(8, 8, 0));
        assert_eq!(vision.step().unwrap(), CycleOutcome::NoFrame);
        assert!(h.store.snapshot().is_none());
        assert!(h.output.latest().is_none());
    }

    #[test]
    fn publishes_targets_and_center_line() {
        let rects = [Rect::new(2, 2, 10, 5), Rect::new(20, 10, 4, 8)];
        let (h, mut vision) = harness(move |_: &Frame| -> Result<Vec<Contour>, VisionError> {
            Ok(rects.iter().copied().map(rect_contour).collect())
        });
        h.feed.put_frame(Frame::blank(32, 24, 7));

        assert_eq!(
            vision.step().unwrap(),
            CycleOutcome::Published { targets: 2 }
        );
        let snapshot = h.store.snapshot().unwrap();
        assert_eq!(snapshot.frame_number, 1);
        assert_eq!(snapshot.timestamp_ms, 7);
        assert_eq!(
            snapshot.targets.iter().map(|t| t.rect).collect::<Vec<_>>(),
            rects.to_vec()
        );
        assert_eq!(snapshot.targets[0].aspect_ratio, 2.0);
        assert_eq!(
            snapshot.targets[0].distance,
            estimate_distance(&rects[0], (1280, 720), &Calibration::default())
        );
        assert_eq!(snapshot.center_line, 1000.0);
        assert_eq!(
            *h.telemetry.values.lock().unwrap(),
            vec![(CENTER_LINE_KEY.to_string(), 1000.0)]
        );

        let (_, annotated) = h.output.latest().unwrap();
        assert_eq!(annotated.pixel(2, 2), Some(WHITE));
    }

    #[test]
    fn center_line_ignores_target_count_and_position() {
        let calls = Arc::new(Mutex::new(0usize));
        let counter = calls.clone();
        let (h, mut vision) = harness(move |_: &Frame| -> Result<Vec<Contour>, VisionError> {
            let mut n = counter.lock().unwrap();
            *n += 1;
            Ok((0..*n)
                .map(|i| rect_contour(Rect::new(i as i32 * 3, i as i32, 2, 2)))
                .collect())
        });
        for ts in 1..=3 {
            h.feed.put_frame(Frame::blank(16, 16, ts));
            vision.step().unwrap();
        }
        let values = h.telemetry.values.lock().unwrap();
        assert_eq!(values.len(), 3);
        assert!(values.iter().all(|(_, v)| *v == 1000.0));
    }

    #[test]
    fn empty_cycle_keeps_previous_snapshot() {
        let detections = Arc::new(Mutex::new(vec![vec![Rect::new(1, 1, 3, 3)], vec![]]));
        let script = detections.clone();
        let (h, mut vision) = harness(move |_: &Frame| -> Result<Vec<Contour>, VisionError> {
            let next = script.lock().unwrap().remove(0);
            Ok(next.into_iter().map(rect_contour).collect())
        });

        h.feed.put_frame(Frame::blank(8, 8, 1));
        vision.step().unwrap();
        let first = h.store.snapshot().unwrap();

        h.feed.put_frame(Frame::blank(8, 8, 2));
        assert_eq!(vision.step().unwrap(), CycleOutcome::NoTargets);
        let still = h.store.snapshot().unwrap();
        assert!(Arc::ptr_eq(&first, &still));
        assert_eq!(h.telemetry.values.lock().unwrap().len(), 1);

        // The raw frame is still forwarded to the processed stream.
        let (_, forwarded) = h.output.latest().unwrap();
        assert_eq!(forwarded.timestamp_ms, 2);
    }

    #[test]
    fn detector_error_surfaces_from_step() {
        let (h, mut vision) = harness(|_: &Frame| -> Result<Vec<Contour>, VisionError> {
            Err(VisionError::Detection("boom".into()))
        });
        h.feed.put_frame(Frame::blank(4, 4, 1));
        assert!(matches!(vision.step(), Err(VisionError::Detection(_))));
        assert!(h.store.snapshot().is_none());
    }

    #[test]
    fn runs_with_threshold_detector() {
        let (h, mut vision) = harness(HsvThresholdDetector::new([50, 70], [200, 255], [200, 255], 4));
        let mut frame = Frame::blank(20, 20, 5);
        for y in 4..8 {
            for x in 3..11 {
                frame.put_pixel(x, y, [0, 255, 0]);
            }
        }
        h.feed.put_frame(frame);
        assert_eq!(
            vision.step().unwrap(),
            CycleOutcome::Published { targets: 1 }
        );
        assert_eq!(
            h.store.snapshot().unwrap().targets[0].rect,
            Rect::new(3, 4, 8, 4)
        );
    }
}
