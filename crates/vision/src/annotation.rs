//! Debug overlay drawn onto frames sent to the processed stream.

use video_ingest::Frame;

use crate::geometry::{Point, Rect};

/// BGR colours.
pub const WHITE: [u8; 3] = [255, 255, 255];
pub const BLUE: [u8; 3] = [255, 0, 0];

/// Outline each target and draw its reference line.
///
/// The reference line runs from `(res_x, y)` to `(res_y, y + height)` of
/// each rectangle, using the configured resolution as x coordinates.
pub fn annotate_targets(frame: &mut Frame, rects: &[Rect], resolution: (u32, u32)) {
    let (res_x, res_y) = (resolution.0 as i32, resolution.1 as i32);
    for rect in rects {
        let bottom = rect.y.saturating_add(rect.height);
        draw_rectangle(
            frame,
            Point::new(rect.x.saturating_add(rect.width), bottom),
            Point::new(rect.x, rect.y),
            WHITE,
        );
        draw_line(frame, Point::new(res_x, rect.y), Point::new(res_y, bottom), BLUE);
    }
}

/// One-pixel outline between two opposite corners, clipped to the frame.
pub fn draw_rectangle(frame: &mut Frame, a: Point, b: Point, color: [u8; 3]) {
    let (w, h) = (frame.width as i64, frame.height as i64);
    let (left, right) = (a.x.min(b.x) as i64, a.x.max(b.x) as i64);
    let (top, bottom) = (a.y.min(b.y) as i64, a.y.max(b.y) as i64);
    if right < 0 || bottom < 0 || left >= w || top >= h {
        return;
    }
    for x in left.max(0)..=right.min(w - 1) {
        frame.put_pixel(x, top, color);
        frame.put_pixel(x, bottom, color);
    }
    for y in top.max(0)..=bottom.min(h - 1) {
        frame.put_pixel(left, y, color);
        frame.put_pixel(right, y, color);
    }
}

/// Bresenham line, clipped to the frame.
pub fn draw_line(frame: &mut Frame, from: Point, to: Point, color: [u8; 3]) {
    let Some(((mut x, mut y), (x1, y1))) = clip_line(from, to, frame.width, frame.height) else {
        return;
    };
    let dx = (x1 - x).abs();
    let dy = -(y1 - y).abs();
    let sx = if x < x1 { 1 } else { -1 };
    let sy = if y < y1 { 1 } else { -1 };
    let mut err = dx + dy;
    loop {
        frame.put_pixel(x, y, color);
        if x == x1 && y == y1 {
            break;
        }
        let e2 = 2 * err;
        if e2 >= dy {
            err += dy;
            x += sx;
        }
        if e2 <= dx {
            err += dx;
            y += sy;
        }
    }
}

/// Liang-Barsky clip of a segment to `[0, width) x [0, height)`.
fn clip_line(from: Point, to: Point, width: u32, height: u32) -> Option<((i64, i64), (i64, i64))> {
    if width == 0 || height == 0 {
        return None;
    }
    let (x_max, y_max) = (f64::from(width - 1), f64::from(height - 1));
    let (x0, y0) = (f64::from(from.x), f64::from(from.y));
    let (dx, dy) = (f64::from(to.x) - x0, f64::from(to.y) - y0);
    let (mut t0, mut t1) = (0.0_f64, 1.0_f64);
    for (p, q) in [(-dx, x0), (dx, x_max - x0), (-dy, y0), (dy, y_max - y0)] {
        if p == 0.0 {
            if q < 0.0 {
                return None;
            }
            continue;
        }
        let r = q / p;
        if p < 0.0 {
            if r > t1 {
                return None;
            }
            t0 = t0.max(r);
        } else {
            if r < t0 {
                return None;
            }
            t1 = t1.min(r);
        }
    }
    let at = |t: f64| {
        (
            (x0 + t * dx).round().clamp(0.0, x_max) as i64,
            (y0 + t * dy).round().clamp(0.0, y_max) as i64,
        )
    };
    Some((at(t0), at(t1)))
}
