//! Clip arithmetic for the render-pass compiler.
//!
//! A [`Clip`] tracks the region a subtree may draw into while the node tree
//! is walked. It is deliberately coarse: exact intersection is only
//! computed where it is cheap, everything else reports failure and the
//! caller falls back to CPU rasterization. `AllClipped` is a terminal
//! state — once reached, no descendant emits operations.

use lucent_core::{Point, Rect, RoundedRect, Transform, TransformCategory};

/// Which shape the clip currently has.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClipKind {
    /// Nothing is clipped; the rect still tracks the drawable region for
    /// pruning.
    None,
    /// Clipped to an axis-aligned rectangle.
    Rect,
    /// Clipped to a rounded rectangle.
    Rounded,
    /// Everything is clipped away.
    AllClipped,
}

/// The clip state threaded through the tree walk.
///
/// The rect is meaningful for every kind except `AllClipped`: for `None`
/// it holds the drawable region (used to prune subtrees), for `Rect` a
/// rectilinear shape, for `Rounded` the full rounded shape.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Clip {
    pub kind: ClipKind,
    pub rect: RoundedRect,
}

impl Clip {
    /// An unclipped state covering `bounds`.
    pub fn none(bounds: &Rect) -> Self {
        Clip {
            kind: ClipKind::None,
            rect: RoundedRect::from_rect(*bounds),
        }
    }

    /// The terminal fully-clipped state.
    pub fn all_clipped() -> Self {
        Clip {
            kind: ClipKind::AllClipped,
            rect: RoundedRect::from_rect(Rect::ZERO),
        }
    }

    /// Whether nothing can be drawn anymore.
    pub fn is_all_clipped(&self) -> bool {
        self.kind == ClipKind::AllClipped
    }

    /// Intersects with an axis-aligned rectangle.
    ///
    /// Returns `None` when the exact intersection cannot be represented
    /// (a rounded clip partially overlapping `rect`); the caller is
    /// expected to fall back.
    pub fn intersect_rect(&self, rect: &Rect) -> Option<Clip> {
        if self.kind == ClipKind::AllClipped {
            return Some(Clip::all_clipped());
        }
        if !rect.intersects(&self.rect.bounds) {
            return Some(Clip::all_clipped());
        }
        if rect.contains_rect(&self.rect.bounds) {
            return Some(*self);
        }

        match self.kind {
            ClipKind::None | ClipKind::Rect => {
                let bounds = rect.intersection(&self.rect.bounds)?;
                Some(Clip {
                    kind: ClipKind::Rect,
                    rect: RoundedRect::from_rect(bounds),
                })
            }
            ClipKind::Rounded => {
                if self.rect.contains_rect(rect) {
                    // The rounded corners don't matter for this rect, so
                    // the intersection degenerates to the plain rect.
                    Some(Clip {
                        kind: ClipKind::Rect,
                        rect: RoundedRect::from_rect(*rect),
                    })
                } else {
                    None
                }
            }
            ClipKind::AllClipped => unreachable!(),
        }
    }

    /// Intersects with a rounded rectangle; same failure convention as
    /// [`Clip::intersect_rect`].
    pub fn intersect_rounded(&self, rounded: &RoundedRect) -> Option<Clip> {
        if self.kind == ClipKind::AllClipped {
            return Some(Clip::all_clipped());
        }
        if !rounded.bounds.intersects(&self.rect.bounds) {
            return Some(Clip::all_clipped());
        }
        if rounded.is_rectilinear() {
            return self.intersect_rect(&rounded.bounds);
        }
        if rounded.contains_rect(&self.rect.bounds) {
            return Some(*self);
        }

        match self.kind {
            ClipKind::None | ClipKind::Rect => {
                if self.rect.bounds.contains_rect(&rounded.bounds) {
                    Some(Clip {
                        kind: ClipKind::Rounded,
                        rect: *rounded,
                    })
                } else {
                    None
                }
            }
            // Rounded-on-rounded intersection is not representable in
            // general.
            ClipKind::Rounded => None,
            ClipKind::AllClipped => unreachable!(),
        }
    }

    /// Re-expresses the clip in a child coordinate space that is scaled by
    /// `(sx, sy)` relative to the current one.
    pub fn scale(&self, sx: f32, sy: f32) -> Clip {
        Clip {
            kind: self.kind,
            rect: self.rect.scale_affine(1.0 / sx, 1.0 / sy),
        }
    }

    /// Projects the clip through `transform` (mapping child coordinates to
    /// the current space) into the child's coordinate space.
    ///
    /// Only decomposable scale/translate transforms are handled exactly;
    /// everything else returns `None` and the caller falls back. An
    /// unclipped state is re-seeded from the child's bounds.
    pub fn transform(&self, transform: &Transform, child_bounds: &Rect) -> Option<Clip> {
        match self.kind {
            ClipKind::AllClipped => Some(Clip::all_clipped()),
            ClipKind::None => Some(Clip::none(child_bounds)),
            ClipKind::Rect | ClipKind::Rounded => match transform.category() {
                TransformCategory::Identity => Some(*self),
                TransformCategory::Translate2d => {
                    let (dx, dy) = transform.to_translate();
                    Some(Clip {
                        kind: self.kind,
                        rect: self.rect.offset(-dx, -dy),
                    })
                }
                TransformCategory::Affine2d => {
                    let (sx, sy, dx, dy) = transform.to_affine();
                    if sx == 0.0 || sy == 0.0 {
                        return None;
                    }
                    Some(Clip {
                        kind: self.kind,
                        rect: self.rect.offset(-dx, -dy).scale_affine(1.0 / sx, 1.0 / sy),
                    })
                }
                // Rotation, skew or perspective cannot carry a rect or
                // rounded clip exactly.
                _ => None,
            },
        }
    }

    /// Whether `rect`, placed at `offset`, is fully inside the clip with
    /// no further clipping needed downstream.
    pub fn contains_rect(&self, offset: &Point, rect: &Rect) -> bool {
        let r = rect.offset(offset.x, offset.y);
        match self.kind {
            ClipKind::AllClipped => false,
            ClipKind::None => true,
            ClipKind::Rect => self.rect.bounds.contains_rect(&r),
            ClipKind::Rounded => self.rect.contains_rect(&r),
        }
    }

    /// Conservative test whether `rect`, placed at `offset`, may touch the
    /// clip region. Used to prune subtrees: a `false` answer guarantees
    /// nothing of the rect is visible.
    pub fn may_intersect_rect(&self, offset: &Point, rect: &Rect) -> bool {
        let r = rect.offset(offset.x, offset.y);
        match self.kind {
            ClipKind::AllClipped => false,
            ClipKind::None | ClipKind::Rect | ClipKind::Rounded => self.rect.bounds.intersects(&r),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lucent_core::Size;

    fn rounded(x: f32, y: f32, w: f32, h: f32, r: f32) -> RoundedRect {
        RoundedRect::with_uniform_radius(Rect::new(x, y, w, h), r)
    }

    #[test]
    fn test_intersect_disjoint_is_all_clipped() {
        let clip = Clip::none(&Rect::new(0.0, 0.0, 100.0, 100.0));
        let result = clip.intersect_rect(&Rect::new(200.0, 200.0, 10.0, 10.0)).unwrap();
        assert_eq!(result.kind, ClipKind::AllClipped);
    }

    #[test]
    fn test_intersect_rect_with_none_becomes_rect() {
        let clip = Clip::none(&Rect::new(0.0, 0.0, 100.0, 100.0));
        let result = clip.intersect_rect(&Rect::new(10.0, 10.0, 50.0, 50.0)).unwrap();
        assert_eq!(result.kind, ClipKind::Rect);
        assert_eq!(result.rect.bounds, Rect::new(10.0, 10.0, 50.0, 50.0));
    }

    #[test]
    fn test_intersect_containing_rect_keeps_clip() {
        let clip = Clip {
            kind: ClipKind::Rounded,
            rect: rounded(10.0, 10.0, 50.0, 50.0, 8.0),
        };
        let result = clip.intersect_rect(&Rect::new(0.0, 0.0, 100.0, 100.0)).unwrap();
        assert_eq!(result, clip);
    }

    #[test]
    fn test_rounded_intersect_inner_rect_downgrades_to_rect() {
        // A rect inside the rounded clip, clear of the corner arcs, makes
        // the rounding irrelevant.
        let clip = Clip {
            kind: ClipKind::Rounded,
            rect: rounded(0.0, 0.0, 100.0, 100.0, 20.0),
        };
        let inner = Rect::new(25.0, 25.0, 50.0, 50.0);
        let result = clip.intersect_rect(&inner).unwrap();
        assert_eq!(result.kind, ClipKind::Rect);
        assert_eq!(result.rect.bounds, inner);
    }

    #[test]
    fn test_rounded_partial_overlap_fails() {
        let clip = Clip {
            kind: ClipKind::Rounded,
            rect: rounded(0.0, 0.0, 100.0, 100.0, 20.0),
        };
        // Overlaps a corner arc: not representable.
        assert!(clip.intersect_rect(&Rect::new(-10.0, -10.0, 20.0, 20.0)).is_none());
    }

    #[test]
    fn test_intersect_rectilinear_rounded_behaves_like_rect() {
        let clip = Clip::none(&Rect::new(0.0, 0.0, 100.0, 100.0));
        let square = RoundedRect::from_rect(Rect::new(10.0, 10.0, 20.0, 20.0));
        let result = clip.intersect_rounded(&square).unwrap();
        assert_eq!(result.kind, ClipKind::Rect);
    }

    #[test]
    fn test_intersect_rounded_inside_rect_clip() {
        let clip = Clip {
            kind: ClipKind::Rect,
            rect: RoundedRect::from_rect(Rect::new(0.0, 0.0, 100.0, 100.0)),
        };
        let rr = rounded(10.0, 10.0, 30.0, 30.0, 5.0);
        let result = clip.intersect_rounded(&rr).unwrap();
        assert_eq!(result.kind, ClipKind::Rounded);
        assert_eq!(result.rect, rr);
    }

    #[test]
    fn test_transform_translate_offsets_clip() {
        let clip = Clip {
            kind: ClipKind::Rect,
            rect: RoundedRect::from_rect(Rect::new(10.0, 10.0, 20.0, 20.0)),
        };
        let t = Transform::translate(5.0, -5.0);
        let result = clip.transform(&t, &Rect::ZERO).unwrap();
        assert_eq!(result.rect.bounds, Rect::new(5.0, 15.0, 20.0, 20.0));
    }

    #[test]
    fn test_transform_rotation_fails_for_rect_clip() {
        let clip = Clip {
            kind: ClipKind::Rect,
            rect: RoundedRect::from_rect(Rect::new(0.0, 0.0, 10.0, 10.0)),
        };
        assert!(clip.transform(&Transform::rotate(45.0), &Rect::ZERO).is_none());
    }

    #[test]
    fn test_transform_none_reseeds_from_child_bounds() {
        let clip = Clip::none(&Rect::new(0.0, 0.0, 100.0, 100.0));
        let child = Rect::new(-5.0, -5.0, 10.0, 10.0);
        let result = clip.transform(&Transform::rotate(45.0), &child).unwrap();
        assert_eq!(result.kind, ClipKind::None);
        assert_eq!(result.rect.bounds, child);
    }

    #[test]
    fn test_contains_and_may_intersect() {
        let clip = Clip {
            kind: ClipKind::Rect,
            rect: RoundedRect::from_rect(Rect::new(0.0, 0.0, 100.0, 100.0)),
        };
        let offset = Point::new(10.0, 10.0);
        assert!(clip.contains_rect(&offset, &Rect::new(0.0, 0.0, 50.0, 50.0)));
        assert!(!clip.contains_rect(&offset, &Rect::new(0.0, 0.0, 100.0, 100.0)));
        assert!(clip.may_intersect_rect(&offset, &Rect::new(80.0, 80.0, 50.0, 50.0)));
        assert!(!clip.may_intersect_rect(&offset, &Rect::new(100.0, 100.0, 5.0, 5.0)));
    }

    #[test]
    fn test_scale_divides_into_child_space() {
        let clip = Clip {
            kind: ClipKind::Rounded,
            rect: RoundedRect::new(
                Rect::new(0.0, 0.0, 100.0, 50.0),
                [Size::new(10.0, 10.0); 4],
            ),
        };
        let scaled = clip.scale(2.0, 2.0);
        assert_eq!(scaled.rect.bounds, Rect::new(0.0, 0.0, 50.0, 25.0));
        assert_eq!(scaled.rect.corner[0], Size::new(5.0, 5.0));
        assert_eq!(scaled.kind, ClipKind::Rounded);
    }
}
