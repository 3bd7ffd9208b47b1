//! Rectangles with per-corner elliptical rounding.

use serde::{Deserialize, Serialize};

use super::geometry::{Point, Rect, Size};

/// Index of the top-left corner in [`RoundedRect::corner`].
pub const CORNER_TOP_LEFT: usize = 0;
/// Index of the top-right corner.
pub const CORNER_TOP_RIGHT: usize = 1;
/// Index of the bottom-right corner.
pub const CORNER_BOTTOM_RIGHT: usize = 2;
/// Index of the bottom-left corner.
pub const CORNER_BOTTOM_LEFT: usize = 3;

/// An axis-aligned rectangle whose corners may be rounded with elliptical
/// arcs of independent horizontal and vertical radii.
///
/// Corner order is top-left, top-right, bottom-right, bottom-left.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct RoundedRect {
    /// The bounding rectangle.
    pub bounds: Rect,
    /// Per-corner radii; a zero size means a square corner.
    pub corner: [Size; 4],
}

impl RoundedRect {
    /// Creates a rounded rectangle with square corners.
    pub const fn from_rect(bounds: Rect) -> Self {
        RoundedRect {
            bounds,
            corner: [Size::ZERO; 4],
        }
    }

    /// Creates a rounded rectangle with a uniform corner radius.
    pub const fn with_uniform_radius(bounds: Rect, radius: f32) -> Self {
        RoundedRect {
            bounds,
            corner: [Size::new(radius, radius); 4],
        }
    }

    /// Creates a rounded rectangle with explicit per-corner radii.
    pub const fn new(bounds: Rect, corner: [Size; 4]) -> Self {
        RoundedRect { bounds, corner }
    }

    /// Whether all four corners are square, i.e. the shape is a plain
    /// rectangle.
    pub fn is_rectilinear(&self) -> bool {
        self.corner
            .iter()
            .all(|c| c.width <= 0.0 || c.height <= 0.0)
    }

    /// Returns this rounded rectangle translated by `(dx, dy)`.
    pub fn offset(&self, dx: f32, dy: f32) -> Self {
        RoundedRect {
            bounds: self.bounds.offset(dx, dy),
            corner: self.corner,
        }
    }

    /// Returns this rounded rectangle with both axes scaled by `(sx, sy)`.
    ///
    /// Negative factors mirror the shape around the respective axis, which
    /// swaps the affected corner radii so the result is normalized again.
    pub fn scale_affine(&self, sx: f32, sy: f32) -> Self {
        let bounds = self.bounds.scale(sx, sy);
        let mut corner = [
            scale_size(self.corner[CORNER_TOP_LEFT], sx, sy),
            scale_size(self.corner[CORNER_TOP_RIGHT], sx, sy),
            scale_size(self.corner[CORNER_BOTTOM_RIGHT], sx, sy),
            scale_size(self.corner[CORNER_BOTTOM_LEFT], sx, sy),
        ];
        if sx < 0.0 {
            corner.swap(CORNER_TOP_LEFT, CORNER_TOP_RIGHT);
            corner.swap(CORNER_BOTTOM_LEFT, CORNER_BOTTOM_RIGHT);
        }
        if sy < 0.0 {
            corner.swap(CORNER_TOP_LEFT, CORNER_BOTTOM_LEFT);
            corner.swap(CORNER_TOP_RIGHT, CORNER_BOTTOM_RIGHT);
        }
        RoundedRect { bounds, corner }
    }

    /// Whether `rect` lies entirely inside the rounded shape, taking the
    /// corner arcs into account.
    pub fn contains_rect(&self, rect: &Rect) -> bool {
        if !self.bounds.contains_rect(rect) {
            return false;
        }

        // For each rounded corner, the rectangle corner reaching into that
        // quadrant must lie inside the corner's ellipse. The sign pair
        // selects the direction pointing toward the rounded corner.
        let b = &self.bounds;

        let tl = self.corner[CORNER_TOP_LEFT];
        if !corner_contains_point(
            Point::new(b.origin.x + tl.width, b.origin.y + tl.height),
            tl,
            Point::new(rect.origin.x, rect.origin.y),
            (1.0, 1.0),
        ) {
            return false;
        }

        let tr = self.corner[CORNER_TOP_RIGHT];
        if !corner_contains_point(
            Point::new(b.max_x() - tr.width, b.origin.y + tr.height),
            tr,
            Point::new(rect.max_x(), rect.origin.y),
            (-1.0, 1.0),
        ) {
            return false;
        }

        let br = self.corner[CORNER_BOTTOM_RIGHT];
        if !corner_contains_point(
            Point::new(b.max_x() - br.width, b.max_y() - br.height),
            br,
            Point::new(rect.max_x(), rect.max_y()),
            (-1.0, -1.0),
        ) {
            return false;
        }

        let bl = self.corner[CORNER_BOTTOM_LEFT];
        corner_contains_point(
            Point::new(b.origin.x + bl.width, b.max_y() - bl.height),
            bl,
            Point::new(rect.origin.x, rect.max_y()),
            (1.0, -1.0),
        )
    }

    /// Conservative overlap test against a plain rectangle: true whenever
    /// the bounding boxes overlap. May report an intersection where only a
    /// cut-off corner region overlaps.
    pub fn may_intersect_rect(&self, rect: &Rect) -> bool {
        self.bounds.intersects(rect)
    }

    /// Serializes the shape for shader consumption: bounds, then the four
    /// horizontal radii, then the four vertical radii.
    pub fn to_float_array(&self) -> [f32; 12] {
        [
            self.bounds.origin.x,
            self.bounds.origin.y,
            self.bounds.size.width,
            self.bounds.size.height,
            self.corner[0].width,
            self.corner[1].width,
            self.corner[2].width,
            self.corner[3].width,
            self.corner[0].height,
            self.corner[1].height,
            self.corner[2].height,
            self.corner[3].height,
        ]
    }
}

fn scale_size(size: Size, sx: f32, sy: f32) -> Size {
    Size::new(size.width * sx.abs(), size.height * sy.abs())
}

/// Whether `point` lies on the inner side of the elliptical corner arc
/// centered at `center` with radii `radius`. Points outside the corner's
/// quadrant trivially pass; `sign` orients the quadrant test toward the
/// corner being checked.
fn corner_contains_point(center: Point, radius: Size, point: Point, sign: (f32, f32)) -> bool {
    if radius.width <= 0.0 || radius.height <= 0.0 {
        return true;
    }
    let dx = (sign.0 * (center.x - point.x) / radius.width).max(0.0);
    let dy = (sign.1 * (center.y - point.y) / radius.height).max(0.0);
    dx * dx + dy * dy <= 1.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_rectilinear() {
        let plain = RoundedRect::from_rect(Rect::new(0.0, 0.0, 10.0, 10.0));
        assert!(plain.is_rectilinear());
        let round = RoundedRect::with_uniform_radius(Rect::new(0.0, 0.0, 10.0, 10.0), 2.0);
        assert!(!round.is_rectilinear());
    }

    #[test]
    fn test_contains_rect_respects_corners() {
        let round = RoundedRect::with_uniform_radius(Rect::new(0.0, 0.0, 100.0, 100.0), 20.0);
        // Center region is fine.
        assert!(round.contains_rect(&Rect::new(20.0, 20.0, 60.0, 60.0)));
        // A rect poking into the top-left corner arc is not contained.
        assert!(!round.contains_rect(&Rect::new(1.0, 1.0, 10.0, 10.0)));
        // Same rect inside a plain rect is contained.
        let plain = RoundedRect::from_rect(Rect::new(0.0, 0.0, 100.0, 100.0));
        assert!(plain.contains_rect(&Rect::new(1.0, 1.0, 10.0, 10.0)));
    }

    #[test]
    fn test_scale_affine_negative_swaps_corners() {
        let mut rr = RoundedRect::from_rect(Rect::new(0.0, 0.0, 10.0, 10.0));
        rr.corner[CORNER_TOP_LEFT] = Size::new(4.0, 4.0);
        let flipped = rr.scale_affine(-1.0, 1.0);
        assert_eq!(flipped.corner[CORNER_TOP_RIGHT], Size::new(4.0, 4.0));
        assert_eq!(flipped.corner[CORNER_TOP_LEFT], Size::ZERO);
        assert_eq!(flipped.bounds, Rect::new(-10.0, 0.0, 10.0, 10.0));
    }

    #[test]
    fn test_float_array_layout() {
        let rr = RoundedRect::with_uniform_radius(Rect::new(1.0, 2.0, 3.0, 4.0), 0.5);
        let f = rr.to_float_array();
        assert_eq!(&f[0..4], &[1.0, 2.0, 3.0, 4.0]);
        assert_eq!(&f[4..8], &[0.5; 4]);
        assert_eq!(&f[8..12], &[0.5; 4]);
    }
}
