//! Immutable 2D/3D transforms with category tracking.
//!
//! The renderer cares less about the raw matrix than about how much
//! structure it can rely on: pure translations keep clip regions exact,
//! affine transforms keep them representable, and anything beyond that
//! forces more expensive handling. [`TransformCategory`] captures that
//! knowledge and composition only ever weakens it.

use glam::{Mat4, Quat, Vec2, Vec3, Vec4};

use super::geometry::{Point, Rect};

/// How much structure is known about a transform.
///
/// Ordered from least to most structured, so composing two transforms
/// yields the minimum of their categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum TransformCategory {
    /// Arbitrary, possibly perspective 3D transform.
    Any3d,
    /// General 2D transform; may rotate or skew.
    Any2d,
    /// Independent axis scaling plus translation.
    Affine2d,
    /// Pure 2D translation.
    Translate2d,
    /// The identity.
    Identity,
}

/// An immutable transform together with its [`TransformCategory`].
///
/// Composition is right-to-left in point space: `a.then(&b)` first applies
/// `b` to a point, then `a` — matching matrix multiplication `a * b`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Transform {
    matrix: Mat4,
    category: TransformCategory,
}

/// The 2D factors of a transform: translate, rotate, scale, and skew.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Components2d {
    pub skew_x: f32,
    pub skew_y: f32,
    pub scale_x: f32,
    pub scale_y: f32,
    /// Rotation angle in degrees.
    pub angle: f32,
    pub dx: f32,
    pub dy: f32,
}

/// The full decomposition of a 3D transform.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Decomposed {
    pub translation: Vec3,
    pub scale: Vec3,
    pub rotation: Quat,
    /// Shear factors: xy, xz, yz.
    pub shear: Vec3,
    pub perspective: Vec4,
}

impl Default for Transform {
    fn default() -> Self {
        Transform::identity()
    }
}

impl Transform {
    /// The identity transform.
    pub fn identity() -> Self {
        Transform {
            matrix: Mat4::IDENTITY,
            category: TransformCategory::Identity,
        }
    }

    /// A pure translation by `(dx, dy)`.
    pub fn translate(dx: f32, dy: f32) -> Self {
        Transform {
            matrix: Mat4::from_translation(Vec3::new(dx, dy, 0.0)),
            category: if dx == 0.0 && dy == 0.0 {
                TransformCategory::Identity
            } else {
                TransformCategory::Translate2d
            },
        }
    }

    /// An axis-aligned scale by `(sx, sy)`.
    pub fn scale(sx: f32, sy: f32) -> Self {
        Transform {
            matrix: Mat4::from_scale(Vec3::new(sx, sy, 1.0)),
            category: if sx == 1.0 && sy == 1.0 {
                TransformCategory::Identity
            } else {
                TransformCategory::Affine2d
            },
        }
    }

    /// A rotation around the z axis by `angle` degrees.
    pub fn rotate(angle: f32) -> Self {
        Transform {
            matrix: Mat4::from_rotation_z(angle.to_radians()),
            category: TransformCategory::Any2d,
        }
    }

    /// A 2D skew by the given angles in degrees.
    pub fn skew(skew_x: f32, skew_y: f32) -> Self {
        let mut matrix = Mat4::IDENTITY;
        matrix.y_axis.x = skew_x.to_radians().tan();
        matrix.x_axis.y = skew_y.to_radians().tan();
        Transform {
            matrix,
            category: TransformCategory::Any2d,
        }
    }

    /// Wraps an arbitrary matrix; nothing is assumed about its structure.
    pub fn from_matrix(matrix: Mat4) -> Self {
        Transform {
            matrix,
            category: TransformCategory::Any3d,
        }
    }

    /// The category of this transform.
    pub fn category(&self) -> TransformCategory {
        self.category
    }

    /// The backing matrix.
    pub fn to_matrix(&self) -> Mat4 {
        self.matrix
    }

    /// Composes `other` after `self` in matrix order: the result applies
    /// `other` to a point first.
    pub fn then(&self, other: &Transform) -> Transform {
        Transform {
            matrix: self.matrix * other.matrix,
            category: self.category.min(other.category),
        }
    }

    /// Shorthand for appending a translation.
    pub fn translated(&self, dx: f32, dy: f32) -> Transform {
        self.then(&Transform::translate(dx, dy))
    }

    /// Shorthand for appending an axis-aligned scale.
    pub fn scaled(&self, sx: f32, sy: f32) -> Transform {
        self.then(&Transform::scale(sx, sy))
    }

    /// Extracts the translation of an (at most) `Translate2d` transform.
    pub fn to_translate(&self) -> (f32, f32) {
        debug_assert!(self.category >= TransformCategory::Translate2d);
        (self.matrix.w_axis.x, self.matrix.w_axis.y)
    }

    /// Extracts scale and translation of an (at most) `Affine2d` transform.
    ///
    /// Returns `(scale_x, scale_y, dx, dy)`.
    pub fn to_affine(&self) -> (f32, f32, f32, f32) {
        debug_assert!(self.category >= TransformCategory::Affine2d);
        (
            self.matrix.x_axis.x,
            self.matrix.y_axis.y,
            self.matrix.w_axis.x,
            self.matrix.w_axis.y,
        )
    }

    /// Factors the 2D part of this transform into translate, rotate, scale
    /// and skew components.
    pub fn to_2d_components(&self) -> Components2d {
        let m = &self.matrix;
        let (mut a, mut b) = (m.x_axis.x, m.x_axis.y);
        let (mut c, mut d) = (m.y_axis.x, m.y_axis.y);
        let dx = m.w_axis.x;
        let dy = m.w_axis.y;

        let mut scale_x = (a * a + b * b).sqrt();
        if scale_x != 0.0 {
            a /= scale_x;
            b /= scale_x;
        }
        let mut skew = a * c + b * d;
        c -= a * skew;
        d -= b * skew;
        let scale_y = (c * c + d * d).sqrt();
        if scale_y != 0.0 {
            skew /= scale_y;
        }
        // A negative determinant means one axis is flipped; fold the flip
        // into scale_x so the angle stays principal.
        if a * d < b * c {
            a = -a;
            b = -b;
            skew = -skew;
            scale_x = -scale_x;
        }

        Components2d {
            skew_x: skew,
            skew_y: 0.0,
            scale_x,
            scale_y,
            angle: b.atan2(a).to_degrees(),
            dx,
            dy,
        }
    }

    /// Fully decomposes the matrix into translation, scale, rotation, shear
    /// and perspective, or `None` for a singular matrix.
    pub fn decompose(&self) -> Option<Decomposed> {
        let m = &self.matrix;
        if m.determinant() == 0.0 {
            return None;
        }

        let perspective = Vec4::new(m.x_axis.w, m.y_axis.w, m.z_axis.w, m.w_axis.w);
        let translation = Vec3::new(m.w_axis.x, m.w_axis.y, m.w_axis.z);

        let mut row0 = Vec3::new(m.x_axis.x, m.x_axis.y, m.x_axis.z);
        let mut row1 = Vec3::new(m.y_axis.x, m.y_axis.y, m.y_axis.z);
        let mut row2 = Vec3::new(m.z_axis.x, m.z_axis.y, m.z_axis.z);

        // Gram-Schmidt: peel scale and shear off the three basis vectors.
        let mut scale = Vec3::ZERO;
        let mut shear = Vec3::ZERO;

        scale.x = row0.length();
        row0 /= scale.x;

        shear.x = row0.dot(row1); // xy shear
        row1 -= row0 * shear.x;
        scale.y = row1.length();
        row1 /= scale.y;
        shear.x /= scale.y;

        shear.y = row0.dot(row2); // xz shear
        row2 -= row0 * shear.y;
        shear.z = row1.dot(row2); // yz shear
        row2 -= row1 * shear.z;
        scale.z = row2.length();
        row2 /= scale.z;
        shear.y /= scale.z;
        shear.z /= scale.z;

        // A negative determinant of the remaining basis means a reflection;
        // flip all three axes and scales to keep the rotation proper.
        if row0.dot(row1.cross(row2)) < 0.0 {
            scale = -scale;
            row0 = -row0;
            row1 = -row1;
            row2 = -row2;
        }

        let rotation = Quat::from_mat3(&glam::Mat3::from_cols(row0, row1, row2));

        Some(Decomposed {
            translation,
            scale,
            rotation,
            shear,
            perspective,
        })
    }

    /// Maps a point through this transform, projecting perspective if
    /// present.
    pub fn transform_point(&self, p: &Point) -> Point {
        let v = self.matrix * Vec4::new(p.x, p.y, 0.0, 1.0);
        if v.w != 0.0 && v.w != 1.0 {
            Point::new(v.x / v.w, v.y / v.w)
        } else {
            Point::new(v.x, v.y)
        }
    }

    /// The axis-aligned bounding box of `rect` mapped through this
    /// transform.
    pub fn transform_bounds(&self, rect: &Rect) -> Rect {
        match self.category {
            TransformCategory::Identity => *rect,
            TransformCategory::Translate2d => {
                let (dx, dy) = self.to_translate();
                rect.offset(dx, dy)
            }
            TransformCategory::Affine2d => {
                let (sx, sy, dx, dy) = self.to_affine();
                rect.scale(sx, sy).offset(dx, dy)
            }
            _ => {
                let corners = [
                    self.transform_point(&rect.origin),
                    self.transform_point(&Point::new(rect.max_x(), rect.origin.y)),
                    self.transform_point(&Point::new(rect.origin.x, rect.max_y())),
                    self.transform_point(&Point::new(rect.max_x(), rect.max_y())),
                ];
                let mut min = Vec2::new(f32::MAX, f32::MAX);
                let mut max = Vec2::new(f32::MIN, f32::MIN);
                for c in &corners {
                    min = min.min(Vec2::new(c.x, c.y));
                    max = max.max(Vec2::new(c.x, c.y));
                }
                Rect::new(min.x, min.y, max.x - min.x, max.y - min.y)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_category_composition_takes_minimum() {
        let t = Transform::translate(1.0, 2.0);
        let s = Transform::scale(2.0, 2.0);
        let r = Transform::rotate(45.0);
        assert_eq!(t.then(&s).category(), TransformCategory::Affine2d);
        assert_eq!(t.then(&r).category(), TransformCategory::Any2d);
        assert_eq!(
            Transform::identity().then(&t).category(),
            TransformCategory::Translate2d
        );
    }

    #[test]
    fn test_to_affine_roundtrip() {
        let t = Transform::translate(10.0, 20.0).then(&Transform::scale(2.0, 3.0));
        let (sx, sy, dx, dy) = t.to_affine();
        assert_eq!((sx, sy, dx, dy), (2.0, 3.0, 10.0, 20.0));
    }

    #[test]
    fn test_then_applies_rightmost_first() {
        // translate(10,0) ∘ scale(2): point (1,0) -> scaled to (2,0) -> translated to (12,0)
        let t = Transform::translate(10.0, 0.0).then(&Transform::scale(2.0, 2.0));
        let p = t.transform_point(&Point::new(1.0, 0.0));
        assert!((p.x - 12.0).abs() < 1e-5);
    }

    #[test]
    fn test_transform_bounds_rotation() {
        let t = Transform::rotate(90.0);
        let r = t.transform_bounds(&Rect::new(0.0, 0.0, 10.0, 20.0));
        // Rotating by 90° maps (w, h) to (-h, w).
        assert!((r.origin.x - -20.0).abs() < 1e-4);
        assert!((r.size.width - 20.0).abs() < 1e-4);
        assert!((r.size.height - 10.0).abs() < 1e-4);
    }

    #[test]
    fn test_to_2d_components_rotation_scale() {
        let t = Transform::rotate(30.0).then(&Transform::scale(2.0, 4.0));
        let c = t.to_2d_components();
        assert!((c.angle - 30.0).abs() < 1e-3);
        assert!((c.scale_x - 2.0).abs() < 1e-4);
        assert!((c.scale_y - 4.0).abs() < 1e-4);
    }

    #[test]
    fn test_decompose_extracts_scale() {
        let t = Transform::from_matrix(Mat4::from_scale(Vec3::new(3.0, 5.0, 1.0)));
        let d = t.decompose().unwrap();
        assert!((d.scale.x - 3.0).abs() < 1e-5);
        assert!((d.scale.y - 5.0).abs() < 1e-5);
        assert!(d.translation.length() < 1e-6);
    }

    #[test]
    fn test_decompose_singular_fails() {
        let t = Transform::from_matrix(Mat4::from_scale(Vec3::new(0.0, 1.0, 1.0)));
        assert!(t.decompose().is_none());
    }
}
