use serde::Serialize;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct Point {
    pub x: i32,
    pub y: i32,
}

impl Point {
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

/// Axis-aligned bounding rectangle in pixel coordinates.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct Rect {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

impl Rect {
    pub const fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }
}

/// Outline of one detected region.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Contour {
    pub points: Vec<Point>,
}

impl Contour {
    /// Smallest rectangle covering every point, `None` for an empty contour.
    pub fn bounding_rect(&self) -> Option<Rect> {
        let first = self.points.first()?;
        let (mut min_x, mut min_y, mut max_x, mut max_y) = (first.x, first.y, first.x, first.y);
        for p in &self.points[1..] {
            min_x = min_x.min(p.x);
            min_y = min_y.min(p.y);
            max_x = max_x.max(p.x);
            max_y = max_y.max(p.y);
        }
        Some(Rect::new(min_x, min_y, span(min_x, max_x), span(min_y, max_y)))
    }
}

/// Inclusive pixel count between two coordinates, saturating at `i32::MAX`.
fn span(min: i32, max: i32) -> i32 {
    i32::try_from(max as i64 - min as i64 + 1).unwrap_or(i32::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bounding_rect_is_inclusive() {
        let contour = Contour {
            points: vec![Point::new(4, 2), Point::new(9, 2), Point::new(6, 7)],
        };
        assert_eq!(contour.bounding_rect(), Some(Rect::new(4, 2, 6, 6)));
    }

    #[test]
    fn single_point_is_one_pixel() {
        let contour = Contour {
            points: vec![Point::new(3, 3)],
        };
        assert_eq!(contour.bounding_rect(), Some(Rect::new(3, 3, 1, 1)));
        assert_eq!(Contour::default().bounding_rect(), None);
    }

    #[test]
    fn extreme_points_saturate_the_size() {
        let contour = Contour {
            points: vec![Point::new(i32::MIN, i32::MIN), Point::new(i32::MAX, i32::MAX)],
        };
        assert_eq!(
            contour.bounding_rect(),
            Some(Rect::new(i32::MIN, i32::MIN, i32::MAX, i32::MAX))
        );
    }
}
