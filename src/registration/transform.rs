use serde::{Deserialize, Serialize};

use crate::landmarks::Point;

/// 2D affine map `p' = A p + t`, stored row-major as
/// `[[a, b, tx], [c, d, ty]]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AffineTransform {
    pub matrix: [[f64; 3]; 2],
}

impl Default for AffineTransform {
    fn default() -> Self {
        Self::identity()
    }
}

impl AffineTransform {
    pub const fn new(matrix: [[f64; 3]; 2]) -> Self {
        Self { matrix }
    }

    pub const fn identity() -> Self {
        Self::new([[1.0, 0.0, 0.0], [0.0, 1.0, 0.0]])
    }

    pub const fn translation(dx: f64, dy: f64) -> Self {
        Self::new([[1.0, 0.0, dx], [0.0, 1.0, dy]])
    }

    pub const fn scale(sx: f64, sy: f64) -> Self {
        Self::new([[sx, 0.0, 0.0], [0.0, sy, 0.0]])
    }

    /// Rotation by `angle` radians about the origin, then uniform scale.
    pub fn similarity(angle: f64, scale: f64, dx: f64, dy: f64) -> Self {
        let (sin, cos) = angle.sin_cos();
        Self::new([
            [scale * cos, -scale * sin, dx],
            [scale * sin, scale * cos, dy],
        ])
    }

    pub fn apply(&self, p: Point) -> Point {
        let m = &self.matrix;
        Point::new(
            m[0][0] * p.x + m[0][1] * p.y + m[0][2],
            m[1][0] * p.x + m[1][1] * p.y + m[1][2],
        )
    }

    pub fn translation_part(&self) -> (f64, f64) {
        (self.matrix[0][2], self.matrix[1][2])
    }

    pub fn determinant(&self) -> f64 {
        let m = &self.matrix;
        m[0][0] * m[1][1] - m[0][1] * m[1][0]
    }

    /// `self ∘ other`: applies `other` first.
    pub fn compose(&self, other: &AffineTransform) -> AffineTransform {
        let a = &self.matrix;
        let b = &other.matrix;
        let mut out = [[0.0; 3]; 2];
        for r in 0..2 {
            out[r][0] = a[r][0] * b[0][0] + a[r][1] * b[1][0];
            out[r][1] = a[r][0] * b[0][1] + a[r][1] * b[1][1];
            out[r][2] = a[r][0] * b[0][2] + a[r][1] * b[1][2] + a[r][2];
        }
        AffineTransform::new(out)
    }

    /// `None` when the linear part is singular.
    pub fn inverse(&self) -> Option<AffineTransform> {
        let det = self.determinant();
        if det.abs() < f64::EPSILON {
            return None;
        }
        let [[a, b, tx], [c, d, ty]] = self.matrix;
        let (ia, ib, ic, id) = (d / det, -b / det, -c / det, a / det);
        Some(AffineTransform::new([
            [ia, ib, -(ia * tx + ib * ty)],
            [ic, id, -(ic * tx + id * ty)],
        ]))
    }

    /// The linear part acting about `anchor`, which stays fixed.
    pub fn linear_about(&self, anchor: Point) -> AffineTransform {
        let [[a, b, _], [c, d, _]] = self.matrix;
        AffineTransform::new([
            [a, b, anchor.x - (a * anchor.x + b * anchor.y)],
            [c, d, anchor.y - (c * anchor.x + d * anchor.y)],
        ])
    }

    pub fn is_identity(&self, tolerance: f64) -> bool {
        let id = Self::identity().matrix;
        self.matrix
            .iter()
            .flatten()
            .zip(id.iter().flatten())
            .all(|(a, b)| (a - b).abs() <= tolerance)
    }

    /// Axis-aligned bounds of a `width x height` rectangle after mapping.
    pub fn bounds_of(&self, width: u32, height: u32) -> (Point, Point) {
        let (w, h) = (width as f64, height as f64);
        let corners = [
            Point::new(0.0, 0.0),
            Point::new(w, 0.0),
            Point::new(0.0, h),
            Point::new(w, h),
        ]
        .map(|c| self.apply(c));
        let mut min = corners[0];
        let mut max = corners[0];
        for c in &corners[1..] {
            min = Point::new(min.x.min(c.x), min.y.min(c.y));
            max = Point::new(max.x.max(c.x), max.y.max(c.y));
        }
        (min, max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: Point, b: Point) -> bool {
        a.distance(b) < 1e-9
    }

    #[test]
    fn test_compose_applies_right_first() {
        let scale = AffineTransform::scale(2.0, 2.0);
        let shift = AffineTransform::translation(5.0, -1.0);
        let p = Point::new(3.0, 4.0);

        assert!(close(shift.compose(&scale).apply(p), Point::new(11.0, 7.0)));
        assert!(close(scale.compose(&shift).apply(p), Point::new(16.0, 6.0)));
    }

    #[test]
    fn test_inverse_round_trip() {
        let t = AffineTransform::similarity(0.3, 1.4, 12.0, -7.0);
        let inv = t.inverse().unwrap();
        assert!(t.compose(&inv).is_identity(1e-12));

        let p = Point::new(-4.5, 19.0);
        assert!(close(inv.apply(t.apply(p)), p));
        assert!(AffineTransform::scale(0.0, 1.0).inverse().is_none());
    }

    #[test]
    fn test_linear_about_keeps_anchor() {
        let t = AffineTransform::similarity(std::f64::consts::FRAC_PI_2, 1.0, 30.0, 40.0);
        let anchor = Point::new(10.0, 10.0);
        let local = t.linear_about(anchor);
        assert!(close(local.apply(anchor), anchor));

        // Linear part about the anchor, then the anchor's shift, equals the whole map.
        let moved = t.apply(anchor);
        let shift = AffineTransform::translation(moved.x - anchor.x, moved.y - anchor.y);
        let p = Point::new(3.0, 17.0);
        assert!(close(shift.compose(&local).apply(p), t.apply(p)));
    }

    #[test]
    fn test_bounds_of_rotated_square() {
        let t = AffineTransform::similarity(std::f64::consts::FRAC_PI_2, 1.0, 0.0, 0.0);
        let (min, max) = t.bounds_of(10, 20);
        assert!(close(min, Point::new(-20.0, 0.0)));
        assert!(close(max, Point::new(0.0, 10.0)));
    }
}
