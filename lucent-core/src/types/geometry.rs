//! Geometric primitives like points, sizes, and rectangles.
//!
//! The renderer works in two coordinate domains: node-local units (`f32`,
//! `Point`/`Size`/`Rect`) and device pixels (`i32`, `RectInt` for scissor
//! rectangles). All rectangles are axis-aligned with their origin in the
//! top-left corner.

use serde::{Deserialize, Serialize};

// --- Point ---

/// A 2D point in node-local units.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point {
    /// The x-coordinate of the point.
    pub x: f32,
    /// The y-coordinate of the point.
    pub y: f32,
}

impl Point {
    /// A point at the origin (0.0, 0.0).
    pub const ZERO: Point = Point { x: 0.0, y: 0.0 };

    /// Creates a new point with the given coordinates.
    pub const fn new(x: f32, y: f32) -> Self {
        Point { x, y }
    }

    /// Returns this point translated by `(dx, dy)`.
    pub fn offset(&self, dx: f32, dy: f32) -> Self {
        Point::new(self.x + dx, self.y + dy)
    }
}

// --- Size ---

/// A 2D size (width and height) in node-local units.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Size {
    /// The width.
    pub width: f32,
    /// The height.
    pub height: f32,
}

impl Size {
    /// A size of zero width and height.
    pub const ZERO: Size = Size {
        width: 0.0,
        height: 0.0,
    };

    /// Creates a new size with the given dimensions.
    pub const fn new(width: f32, height: f32) -> Self {
        Size { width, height }
    }

    /// Whether either dimension is zero or negative.
    pub fn is_empty(&self) -> bool {
        self.width <= 0.0 || self.height <= 0.0
    }
}

// --- Rect ---

/// An axis-aligned rectangle in node-local units.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Rect {
    /// The top-left corner.
    pub origin: Point,
    /// The extent of the rectangle.
    pub size: Size,
}

impl Rect {
    /// A rectangle at the origin with zero size.
    pub const ZERO: Rect = Rect {
        origin: Point::ZERO,
        size: Size::ZERO,
    };

    /// Creates a new rectangle from origin coordinates and dimensions.
    pub const fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Rect {
            origin: Point { x, y },
            size: Size { width, height },
        }
    }

    /// Creates a rectangle from an origin point and a size.
    pub const fn from_origin_size(origin: Point, size: Size) -> Self {
        Rect { origin, size }
    }

    /// The x-coordinate of the right edge.
    pub fn max_x(&self) -> f32 {
        self.origin.x + self.size.width
    }

    /// The y-coordinate of the bottom edge.
    pub fn max_y(&self) -> f32 {
        self.origin.y + self.size.height
    }

    /// Whether the rectangle covers no area.
    pub fn is_empty(&self) -> bool {
        self.size.is_empty()
    }

    /// The covered area, `width * height`.
    pub fn area(&self) -> f32 {
        self.size.width * self.size.height
    }

    /// Returns this rectangle translated by `(dx, dy)`.
    pub fn offset(&self, dx: f32, dy: f32) -> Self {
        Rect::from_origin_size(self.origin.offset(dx, dy), self.size)
    }

    /// Returns this rectangle with both axes scaled by `(sx, sy)`.
    ///
    /// Negative factors flip the rectangle around the respective axis; the
    /// result is normalized so that its size stays non-negative.
    pub fn scale(&self, sx: f32, sy: f32) -> Self {
        let (x, width) = if sx >= 0.0 {
            (self.origin.x * sx, self.size.width * sx)
        } else {
            (self.max_x() * sx, self.size.width * -sx)
        };
        let (y, height) = if sy >= 0.0 {
            (self.origin.y * sy, self.size.height * sy)
        } else {
            (self.max_y() * sy, self.size.height * -sy)
        };
        Rect::new(x, y, width, height)
    }

    /// Whether this rectangle and `other` cover at least one common point.
    ///
    /// Empty rectangles intersect nothing, including themselves.
    pub fn intersects(&self, other: &Rect) -> bool {
        self.origin.x < other.max_x()
            && other.origin.x < self.max_x()
            && self.origin.y < other.max_y()
            && other.origin.y < self.max_y()
    }

    /// Computes the intersection of two rectangles, or `None` if they are
    /// disjoint.
    pub fn intersection(&self, other: &Rect) -> Option<Rect> {
        let x = self.origin.x.max(other.origin.x);
        let y = self.origin.y.max(other.origin.y);
        let max_x = self.max_x().min(other.max_x());
        let max_y = self.max_y().min(other.max_y());
        if x < max_x && y < max_y {
            Some(Rect::new(x, y, max_x - x, max_y - y))
        } else {
            None
        }
    }

    /// Whether `other` lies entirely inside this rectangle.
    pub fn contains_rect(&self, other: &Rect) -> bool {
        other.origin.x >= self.origin.x
            && other.origin.y >= self.origin.y
            && other.max_x() <= self.max_x()
            && other.max_y() <= self.max_y()
    }

    /// Whether the given point lies inside this rectangle.
    pub fn contains_point(&self, p: &Point) -> bool {
        p.x >= self.origin.x && p.x <= self.max_x() && p.y >= self.origin.y && p.y <= self.max_y()
    }

    /// Returns this rectangle grown by `dx` horizontally and `dy`
    /// vertically on every side.
    pub fn inflate(&self, dx: f32, dy: f32) -> Rect {
        Rect::new(
            self.origin.x - dx,
            self.origin.y - dy,
            self.size.width + 2.0 * dx,
            self.size.height + 2.0 * dy,
        )
    }

    /// The smallest rectangle covering both `self` and `other`.
    pub fn union(&self, other: &Rect) -> Rect {
        if self.is_empty() {
            return *other;
        }
        if other.is_empty() {
            return *self;
        }
        let x = self.origin.x.min(other.origin.x);
        let y = self.origin.y.min(other.origin.y);
        Rect::new(
            x,
            y,
            self.max_x().max(other.max_x()) - x,
            self.max_y().max(other.max_y()) - y,
        )
    }
}

// --- RectInt ---

/// An axis-aligned rectangle in device pixels, used for scissor state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RectInt {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

impl RectInt {
    /// Creates a new integer rectangle.
    pub const fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
        RectInt {
            x,
            y,
            width,
            height,
        }
    }

    /// Computes the intersection of two integer rectangles, or `None` if
    /// they do not overlap.
    pub fn intersection(&self, other: &RectInt) -> Option<RectInt> {
        let x = self.x.max(other.x);
        let y = self.y.max(other.y);
        let max_x = (self.x + self.width).min(other.x + other.width);
        let max_y = (self.y + self.height).min(other.y + other.height);
        if x < max_x && y < max_y {
            Some(RectInt::new(x, y, max_x - x, max_y - y))
        } else {
            None
        }
    }

    /// Converts to a float rectangle.
    pub fn to_rect(&self) -> Rect {
        Rect::new(
            self.x as f32,
            self.y as f32,
            self.width as f32,
            self.height as f32,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_rect_intersection() {
        let a = Rect::new(0.0, 0.0, 10.0, 10.0);
        let b = Rect::new(5.0, 5.0, 10.0, 10.0);
        assert!(a.intersects(&b));
        assert_eq!(a.intersection(&b), Some(Rect::new(5.0, 5.0, 5.0, 5.0)));

        let c = Rect::new(20.0, 20.0, 1.0, 1.0);
        assert!(!a.intersects(&c));
        assert_eq!(a.intersection(&c), None);
    }

    #[test]
    fn test_rect_touching_edges_do_not_intersect() {
        let a = Rect::new(0.0, 0.0, 10.0, 10.0);
        let b = Rect::new(10.0, 0.0, 10.0, 10.0);
        assert!(!a.intersects(&b));
    }

    #[test]
    fn test_rect_contains() {
        let a = Rect::new(0.0, 0.0, 10.0, 10.0);
        assert!(a.contains_rect(&Rect::new(2.0, 2.0, 5.0, 5.0)));
        assert!(a.contains_rect(&a));
        assert!(!a.contains_rect(&Rect::new(2.0, 2.0, 20.0, 5.0)));
    }

    #[test]
    fn test_rect_scale_negative_normalizes() {
        let a = Rect::new(2.0, 3.0, 4.0, 5.0);
        let scaled = a.scale(-1.0, 2.0);
        assert_eq!(scaled, Rect::new(-6.0, 6.0, 4.0, 10.0));
        assert!(scaled.size.width >= 0.0);
    }

    #[test]
    fn test_rect_int_intersection() {
        let a = RectInt::new(0, 0, 100, 100);
        let b = RectInt::new(50, 50, 100, 100);
        assert_eq!(a.intersection(&b), Some(RectInt::new(50, 50, 50, 50)));
        assert_eq!(a.intersection(&RectInt::new(100, 0, 10, 10)), None);
    }
}
