use egui::{Pos2, Vec2, pos2, vec2};

/// A finite line segment between two points.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Segment {
    pub p1: Pos2,
    pub p2: Pos2,
}

impl Segment {
    pub fn new(p1: Pos2, p2: Pos2) -> Self {
        Self { p1, p2 }
    }

    pub fn delta(&self) -> Vec2 {
        self.p2 - self.p1
    }

    pub fn length(&self) -> f32 {
        self.delta().length()
    }
}

/// Intersection of two segments, counting only points that lie within both
/// segments' bounds (not their infinite extensions).
pub fn intersect_bounded(a: Segment, b: Segment) -> Option<Pos2> {
    let r = a.delta();
    let s = b.delta();
    let denom = r.x * s.y - r.y * s.x;
    if denom == 0.0 {
        // Parallel or degenerate; overlapping collinear segments don't yield
        // a single point either way.
        return None;
    }
    let qp = b.p1 - a.p1;
    let t = (qp.x * s.y - qp.y * s.x) / denom;
    let u = (qp.x * r.y - qp.y * r.x) / denom;
    if (0.0..=1.0).contains(&t) && (0.0..=1.0).contains(&u) {
        Some(a.p1 + r * t)
    } else {
        None
    }
}

/// Walks the polygon's edges in order and returns the first bounded
/// intersection with `center_line`. Falls back to the polygon's first vertex
/// when no edge intersects (e.g. one endpoint's shape contains the other's
/// center).
pub fn clip_to_polygon(center_line: Segment, polygon: &[Pos2]) -> Pos2 {
    let mut p1 = polygon[0];
    for &p2 in &polygon[1..] {
        let edge = Segment::new(p1, p2);
        if let Some(point) = intersect_bounded(edge, center_line) {
            return point;
        }
        p1 = p2;
    }
    polygon[0]
}

/// Wing-tip points of a triangular arrowhead anchored at `line.p1`.
///
/// The angle comes from `acos(dx/len)` with the sign of `dy` deciding the
/// half-plane, and the wings sit at that angle plus/minus 60 degrees. The
/// line must have nonzero length; callers skip the head entirely for
/// degenerate lines.
pub fn arrowhead_wings(line: Segment, size: f32) -> (Pos2, Pos2) {
    use std::f32::consts::{FRAC_PI_3, PI, TAU};

    let d = line.delta();
    let mut angle = (d.x / line.length()).acos();
    if d.y >= 0.0 {
        angle = TAU - angle;
    }
    let wing = |a: f32| line.p1 + vec2(a.sin() * size, a.cos() * size);
    (wing(angle + FRAC_PI_3), wing(angle + PI - FRAC_PI_3))
}

/// Distance from a point to a segment, used for arrow hit-testing.
pub fn distance_to_segment(p: Pos2, a: Pos2, b: Pos2) -> f32 {
    let ab = b - a;
    let ap = p - a;
    let ab_len = ab.length_sq();
    if ab_len == 0.0 {
        return ap.length();
    }
    let t = (ap.dot(ab) / ab_len).clamp(0.0, 1.0);
    let proj = a + ab * t;
    (p - proj).length()
}

/// Closed rectangle polygon (first vertex repeated), the shape arrows are
/// clipped against.
pub fn rect_polygon(top_left: Pos2, size: Vec2) -> [Pos2; 5] {
    let tr = pos2(top_left.x + size.x, top_left.y);
    let br = pos2(top_left.x + size.x, top_left.y + size.y);
    let bl = pos2(top_left.x, top_left.y + size.y);
    [top_left, tr, br, bl, top_left]
}
