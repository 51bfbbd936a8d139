//! Contour extraction primitive.
//!
//! The loop only depends on [`ContourDetector`]. The bundled implementation
//! is an HSV threshold followed by 8-connected component labelling, which
//! is what a retro-reflective target lit by an LED ring needs.

use video_ingest::Frame;

use crate::{
    config::VisionSettings,
    error::VisionError,
    geometry::{Contour, Point},
};

pub trait ContourDetector: Send {
    fn detect(&mut self, frame: &Frame) -> Result<Vec<Contour>, VisionError>;
}

impl<F> ContourDetector for F
where
    F: FnMut(&Frame) -> Result<Vec<Contour>, VisionError> + Send,
{
    fn detect(&mut self, frame: &Frame) -> Result<Vec<Contour>, VisionError> {
        self(frame)
    }
}

/// Threshold in HSV space and report each sufficiently large blob's outline.
#[derive(Clone, Debug)]
pub struct HsvThresholdDetector {
    hue: [u8; 2],
    saturation: [u8; 2],
    value: [u8; 2],
    min_area: u32,
    mask: Vec<bool>,
    visited: Vec<bool>,
}

impl HsvThresholdDetector {
    pub fn new(hue: [u8; 2], saturation: [u8; 2], value: [u8; 2], min_area: u32) -> Self {
        Self {
            hue,
            saturation,
            value,
            min_area,
            mask: Vec::new(),
            visited: Vec::new(),
        }
    }

    pub fn from_settings(settings: &VisionSettings) -> Self {
        Self::new(
            settings.hue,
            settings.saturation,
            settings.value,
            settings.min_area,
        )
    }

    fn in_range(&self, bgr: &[u8]) -> bool {
        let [h, s, v] = bgr_to_hsv(bgr[0], bgr[1], bgr[2]);
        (self.hue[0]..=self.hue[1]).contains(&h)
            && (self.saturation[0]..=self.saturation[1]).contains(&s)
            && (self.value[0]..=self.value[1]).contains(&v)
    }
}

impl ContourDetector for HsvThresholdDetector {
    fn detect(&mut self, frame: &Frame) -> Result<Vec<Contour>, VisionError> {
        let width = frame.width as usize;
        let height = frame.height as usize;
        if frame.data.len() != width * height * 3 {
            return Err(VisionError::Detection(format!(
                "frame buffer holds {} bytes, expected {}",
                frame.data.len(),
                width * height * 3
            )));
        }

        let mask: Vec<bool> = frame
            .data
            .chunks_exact(3)
            .map(|px| self.in_range(px))
            .collect();
        self.mask = mask;
        self.visited.clear();
        self.visited.resize(width * height, false);

        let mut contours = Vec::new();
        let mut stack = Vec::new();
        let mut component = Vec::new();
        for start in 0..width * height {
            if !self.mask[start] || self.visited[start] {
                continue;
            }

            component.clear();
            self.visited[start] = true;
            stack.push(start);
            while let Some(idx) = stack.pop() {
                component.push(idx);
                let (x, y) = ((idx % width) as i64, (idx / width) as i64);
                for dy in -1..=1 {
                    for dx in -1..=1 {
                        let (nx, ny) = (x + dx, y + dy);
                        if nx < 0 || ny < 0 || nx >= width as i64 || ny >= height as i64 {
                            continue;
                        }
                        let n = ny as usize * width + nx as usize;
                        if self.mask[n] && !self.visited[n] {
                            self.visited[n] = true;
                            stack.push(n);
                        }
                    }
                }
            }

            if component.len() < self.min_area as usize {
                continue;
            }
            component.sort_unstable();
            let points = component
                .iter()
                .filter(|&&idx| is_boundary(&self.mask, idx, width, height))
                .map(|&idx| Point::new((idx % width) as i32, (idx / width) as i32))
                .collect();
            contours.push(Contour { points });
        }
        Ok(contours)
    }
}

fn is_boundary(mask: &[bool], idx: usize, width: usize, height: usize) -> bool {
    let (x, y) = (idx % width, idx / width);
    if x == 0 || y == 0 || x + 1 == width || y + 1 == height {
        return true;
    }
    !(mask[idx - 1] && mask[idx + 1] && mask[idx - width] && mask[idx + width])
}

/// 8-bit HSV with hue halved to fit 0..=180.
fn bgr_to_hsv(b: u8, g: u8, r: u8) -> [u8; 3] {
    let (bf, gf, rf) = (b as f32, g as f32, r as f32);
    let max = bf.max(gf).max(rf);
    let min = bf.min(gf).min(rf);
    let delta = max - min;

    let s = if max == 0.0 { 0.0 } else { delta * 255.0 / max };
    let mut h = if delta == 0.0 {
        0.0
    } else if max == rf {
        60.0 * (gf - bf) / delta
    } else if max == gf {
        120.0 + 60.0 * (bf - rf) / delta
    } else {
        240.0 + 60.0 * (rf - gf) / delta
    };
    if h < 0.0 {
        h += 360.0;
    }
    [(h / 2.0).round() as u8, s.round() as u8, max as u8]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::Rect;

    const GREEN: [u8; 3] = [0, 255, 0];

    fn paint(frame: &mut Frame, rect: Rect, bgr: [u8; 3]) {
        for y in rect.y..rect.y + rect.height {
            for x in rect.x..rect.x + rect.width {
                frame.put_pixel(x as i64, y as i64, bgr);
            }
        }
    }

    fn detector() -> HsvThresholdDetector {
        HsvThresholdDetector::new([50, 70], [200, 255], [200, 255], 4)
    }

    #[test]
    fn hsv_conversion_matches_eight_bit_convention() {
        assert_eq!(bgr_to_hsv(0, 255, 0), [60, 255, 255]);
        assert_eq!(bgr_to_hsv(0, 0, 255), [0, 255, 255]);
        assert_eq!(bgr_to_hsv(255, 0, 0), [120, 255, 255]);
        assert_eq!(bgr_to_hsv(10, 10, 10), [0, 0, 10]);
    }

    #[test]
    fn finds_each_blob_in_raster_order() {
        let mut frame = Frame::blank(40, 30, 1);
        paint(&mut frame, Rect::new(20, 2, 6, 4), GREEN);
        paint(&mut frame, Rect::new(3, 10, 10, 5), GREEN);

        let rects: Vec<_> = detector()
            .detect(&frame)
            .unwrap()
            .iter()
            .filter_map(Contour::bounding_rect)
            .collect();
        assert_eq!(rects, vec![Rect::new(20, 2, 6, 4), Rect::new(3, 10, 10, 5)]);
    }

    #[test]
    fn contour_keeps_only_outline() {
        let mut frame = Frame::blank(10, 10, 1);
        paint(&mut frame, Rect::new(2, 2, 3, 3), GREEN);
        let contours = detector().detect(&frame).unwrap();
        assert_eq!(contours.len(), 1);
        assert_eq!(contours[0].points.len(), 8);
        assert!(!contours[0].points.contains(&Point::new(3, 3)));
    }

    #[test]
    fn small_and_off_colour_regions_are_ignored() {
        let mut frame = Frame::blank(20, 20, 1);
        paint(&mut frame, Rect::new(1, 1, 1, 2), GREEN);
        paint(&mut frame, Rect::new(8, 8, 5, 5), [0, 0, 255]);
        assert!(detector().detect(&frame).unwrap().is_empty());
    }

    #[test]
    fn mismatched_buffer_is_an_error() {
        let mut frame = Frame::blank(4, 4, 1);
        frame.data.truncate(5);
        assert!(matches!(
            detector().detect(&frame),
            Err(VisionError::Detection(_))
        ));
    }
}
