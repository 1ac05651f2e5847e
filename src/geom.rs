//! Geometric primitives and overlap predicates for copper objects.
//!
//! Every predicate that decides whether two objects touch takes the signed
//! `bloat` distance: positive values fatten both objects (spacing checks),
//! negative values shrink them (overlap checks), zero is plain contact.
//! Keeping the bloat inside the predicates means the connectivity scanner
//! and the design rule checker share one set of geometry routines.

use itertools::Itertools;
use nalgebra as na;
use ncollide2d::bounding_volume::AABB;

pub type Point = na::Point2<f64>;
pub type Vector = na::Vector2<f64>;

pub fn aabb(x1: f64, y1: f64, x2: f64, y2: f64) -> AABB<f64> {
    AABB::new(Point::new(x1, y1), Point::new(x2, y2))
}

/// Grows (or shrinks, for negative amounts) a box on all four sides.
pub fn inflate(b: &AABB<f64>, amount: f64) -> AABB<f64> {
    AABB::new(
        Point::new(b.mins.x - amount, b.mins.y - amount),
        Point::new(b.maxs.x + amount, b.maxs.y + amount),
    )
}

pub fn point_in_aabb(x: f64, y: f64, b: &AABB<f64>) -> bool {
    x >= b.mins.x && x <= b.maxs.x && y >= b.mins.y && y <= b.maxs.y
}

pub fn boxes_touch(a: &AABB<f64>, b: &AABB<f64>) -> bool {
    !(b.maxs.x < a.mins.x
        || b.mins.x > a.maxs.x
        || b.maxs.y < a.mins.y
        || b.mins.y > a.maxs.y)
}

pub fn bounding_box_of(points: &[Point]) -> AABB<f64> {
    let mut minx = ::std::f64::INFINITY;
    let mut miny = ::std::f64::INFINITY;
    let mut maxx = ::std::f64::NEG_INFINITY;
    let mut maxy = ::std::f64::NEG_INFINITY;
    for p in points {
        minx = minx.min(p.x);
        miny = miny.min(p.y);
        maxx = maxx.max(p.x);
        maxy = maxy.max(p.y);
    }
    aabb(minx, miny, maxx, maxy)
}

/// A thick segment of copper.  Lines and the long axis of pads both map
/// onto this; `square` selects rectangular instead of round end caps.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Seg {
    pub p1: Point,
    pub p2: Point,
    pub thickness: f64,
    pub square: bool,
}

impl Seg {
    pub fn new(p1: Point, p2: Point, thickness: f64) -> Seg {
        Seg {
            p1,
            p2,
            thickness,
            square: false,
        }
    }

    /// Zero-width segment, used for box edges and polygon contour edges.
    pub fn hairline(p1: Point, p2: Point) -> Seg {
        Seg::new(p1, p2, 0.0)
    }

    /// The rectangle covered when the caps are square.
    pub fn rect(&self) -> AABB<f64> {
        let t = self.thickness * 0.5;
        aabb(
            self.p1.x.min(self.p2.x) - t,
            self.p1.y.min(self.p2.y) - t,
            self.p1.x.max(self.p2.x) + t,
            self.p1.y.max(self.p2.y) + t,
        )
    }

    pub fn bounding_box(&self) -> AABB<f64> {
        self.rect()
    }
}

/// Circular arc.  Angles are in degrees, measured from the negative x axis
/// with y growing downward, so the point at angle `a` is
/// `center + radius * (-cos a, sin a)`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ArcShape {
    pub center: Point,
    pub radius: f64,
    pub start_angle: f64,
    pub delta: f64,
    pub thickness: f64,
}

impl ArcShape {
    fn point_at(&self, angle: f64) -> Point {
        let a = angle.to_radians();
        Point::new(
            self.center.x - self.radius * a.cos(),
            self.center.y + self.radius * a.sin(),
        )
    }

    pub fn endpoints(&self) -> (Point, Point) {
        (
            self.point_at(self.start_angle),
            self.point_at(self.start_angle + self.delta),
        )
    }

    /// Start angle and positive sweep covering the same span.
    fn normalized_span(&self) -> (f64, f64) {
        let mut start = self.start_angle;
        let mut delta = self.delta;
        if delta < 0.0 {
            start += delta;
            delta = -delta;
        }
        while start < 0.0 {
            start += 360.0;
        }
        (start, delta)
    }

    fn spans_angle(&self, angle: f64) -> bool {
        let (start, delta) = self.normalized_span();
        let mut a = angle;
        while a < start {
            a += 360.0;
        }
        a <= start + delta
    }

    pub fn bounding_box(&self) -> AABB<f64> {
        let (e1, e2) = self.endpoints();
        let mut pts = vec![e1, e2];
        // axis extremes that fall inside the sweep
        for &(angle, dx, dy) in &[
            (0.0, -1.0, 0.0),
            (90.0, 0.0, 1.0),
            (180.0, 1.0, 0.0),
            (270.0, 0.0, -1.0),
        ] {
            if self.spans_angle(angle) {
                pts.push(Point::new(
                    self.center.x + dx * self.radius,
                    self.center.y + dy * self.radius,
                ));
            }
        }
        inflate(&bounding_box_of(&pts), self.thickness * 0.5)
    }
}

/// Distance from `(x, y)` to the segment, compared against `radius` plus
/// the segment's half thickness.  Follows the perpendicular-projection
/// construction: if the projection falls outside the segment the nearer
/// endpoint is checked instead.
pub fn point_on_seg(x: f64, y: f64, radius: f64, seg: &Seg) -> bool {
    let radius = radius + seg.thickness * 0.5;
    if y + radius < seg.p1.y.min(seg.p2.y) || y - radius > seg.p1.y.max(seg.p2.y) {
        return false;
    }
    let dx = seg.p2.x - seg.p1.x;
    let dy = seg.p2.y - seg.p1.y;
    let dx1 = seg.p1.x - x;
    let dy1 = seg.p1.y - y;
    let d = dx * dy1 - dy * dx1;
    let r2 = radius * radius;

    let l = dx * dx + dy * dy;
    if l == 0.0 {
        return dx1 * dx1 + dy1 * dy1 <= r2;
    }
    if d * d > r2 * l {
        return false;
    }
    // the projection lands on the segment itself
    let r = -(dx * dx1 + dy * dy1);
    if r >= 0.0 && r <= l {
        return true;
    }
    if r < 0.0 {
        dx1 * dx1 + dy1 * dy1 <= r2
    } else {
        let ex = seg.p2.x - x;
        let ey = seg.p2.y - y;
        ex * ex + ey * ey <= r2
    }
}

/// A fat point against a rectangle: inside, or within `radius` of an edge.
pub fn point_in_rect(x: f64, y: f64, radius: f64, rect: &AABB<f64>) -> bool {
    if point_in_aabb(x, y, rect) {
        return true;
    }
    let (x1, y1) = (rect.mins.x, rect.mins.y);
    let (x2, y2) = (rect.maxs.x, rect.maxs.y);
    point_on_seg(x, y, radius, &Seg::hairline(Point::new(x1, y1), Point::new(x2, y1)))
        || point_on_seg(x, y, radius, &Seg::hairline(Point::new(x1, y1), Point::new(x1, y2)))
        || point_on_seg(x, y, radius, &Seg::hairline(Point::new(x2, y2), Point::new(x1, y2)))
        || point_on_seg(x, y, radius, &Seg::hairline(Point::new(x2, y2), Point::new(x2, y1)))
}

/// A fat point against a pin or via pad stack at `center`.
pub fn point_on_pin(
    x: f64,
    y: f64,
    radius: f64,
    center: &Point,
    thickness: f64,
    square: bool,
) -> bool {
    let t = thickness * 0.5;
    if square {
        let b = aabb(center.x - t, center.y - t, center.x + t, center.y + t);
        point_in_rect(x, y, radius, &b)
    } else {
        let dx = center.x - x;
        let dy = center.y - y;
        dx * dx + dy * dy <= (t + radius) * (t + radius)
    }
}

/// A fat point against an arc: intersect the two circles, then check
/// whether either intersection angle lies on the arc's sweep.
pub fn point_on_arc(x: f64, y: f64, radius: f64, arc: &ArcShape) -> bool {
    let pdx = x - arc.center.x;
    let pdy = y - arc.center.y;
    let l = pdx * pdx + pdy * pdy;
    // concentric: compare against the ring only
    if l == 0.0 {
        return arc.radius <= radius + 0.5 * arc.thickness;
    }
    let mut r1 = arc.radius * arc.radius;
    let r2 = radius + 0.5 * arc.thickness;
    let r2 = r2 * r2;
    let a = 0.5 * (r1 - r2 + l) / l;
    r1 /= l;
    // tiny positive fudge for round-off
    let d = r1 - a * a + 1e-5;
    if d < 0.0 {
        return false;
    }
    let d = d.sqrt();
    let x0 = a * pdx;
    let y0 = a * pdy;
    let dx = d * pdy;
    let dy = -d * pdx;

    let (start, delta) = arc.normalized_span();
    let mut ang1 = (y0 + dy).atan2(-(x0 + dx)).to_degrees();
    if ang1 < 0.0 {
        ang1 += 360.0;
    }
    let mut ang2 = (y0 - dy).atan2(-(x0 - dx)).to_degrees();
    if ang2 < 0.0 {
        ang2 += 360.0;
    }
    let mut span = ang2 - ang1;
    if span > 180.0 {
        span -= 360.0;
    } else if span < -180.0 {
        span += 360.0;
    }
    if span < 0.0 {
        ang1 += span;
        span = -span;
        while ang1 < 0.0 {
            ang1 += 360.0;
        }
    }
    if ang1 >= start && ang1 <= start + delta {
        return true;
    }
    if start >= ang1 && start <= ang1 + span {
        return true;
    }
    if start + delta >= 360.0 && ang1 <= start + delta - 360.0 {
        return true;
    }
    if ang1 + span >= 360.0 && start <= ang1 + span - 360.0 {
        return true;
    }
    false
}

/// Two thick segments under bloat.  Crossing center lines touch outright;
/// otherwise some endpoint of one must be within the combined radius of
/// the other.  Square caps fall back to rectangle containment.
pub fn segs_touch(s1: &Seg, s2: &Seg, bloat: f64) -> bool {
    let dx = s1.p2.x - s1.p1.x;
    let dy = s1.p2.y - s1.p1.y;
    let dx1 = s1.p1.x - s2.p1.x;
    let dy1 = s1.p1.y - s2.p1.y;
    let s = dy1 * dx - dx1 * dy;
    let r = dx * (s2.p2.y - s2.p1.y) - dy * (s2.p2.x - s2.p1.x);

    if r == 0.0 {
        // parallel, or s1 degenerates to a point
        if dx == 0.0 && dy == 0.0 {
            return if s2.square {
                point_in_rect(
                    s1.p1.x,
                    s1.p1.y,
                    (s1.thickness * 0.5 + bloat).max(0.0),
                    &s2.rect(),
                )
            } else {
                point_on_seg(s1.p1.x, s1.p1.y, (s1.thickness * 0.5 + bloat).max(0.0), s2)
            };
        }
        let gap2 = s * s / (dx * dx + dy * dy);
        let reach = (0.5 * (s1.thickness + s2.thickness) + bloat).max(0.0);
        if gap2 > reach * reach {
            return false;
        }
        if s1.square {
            let r1 = s1.rect();
            let t2 = (s2.thickness * 0.5 + bloat).max(0.0);
            if point_in_rect(s2.p1.x, s2.p1.y, t2, &r1)
                || point_in_rect(s2.p2.x, s2.p2.y, t2, &r1)
            {
                return true;
            }
        }
        if s2.square {
            let r2 = s2.rect();
            let t1 = (s1.thickness * 0.5 + bloat).max(0.0);
            if point_in_rect(s1.p1.x, s1.p1.y, t1, &r2)
                || point_in_rect(s1.p2.x, s1.p2.y, t1, &r2)
            {
                return true;
            }
        }
        let t1 = (s1.thickness * 0.5 + bloat).max(0.0);
        let t2 = (s2.thickness * 0.5 + bloat).max(0.0);
        point_on_seg(s1.p1.x, s1.p1.y, t1, s2)
            || point_on_seg(s1.p2.x, s1.p2.y, t1, s2)
            || point_on_seg(s2.p1.x, s2.p1.y, t2, s1)
            || point_on_seg(s2.p2.x, s2.p2.y, t2, s1)
    } else {
        let su = s / r;
        let ru = (dy1 * (s2.p2.x - s2.p1.x) - dx1 * (s2.p2.y - s2.p1.y)) / r;

        // crossing within s1
        if ru >= 0.0 && ru <= 1.0 {
            if su >= 0.0 && su <= 1.0 {
                return true;
            }
            let t2 = (s2.thickness * 0.5 + bloat).max(0.0);
            return if su < 0.0 {
                point_on_seg(s2.p1.x, s2.p1.y, t2, s1)
            } else {
                point_on_seg(s2.p2.x, s2.p2.y, t2, s1)
            };
        }
        // crossing within s2, but beyond an end of s1
        if su >= 0.0 && su <= 1.0 {
            let t1 = (s1.thickness * 0.5 + bloat).max(0.0);
            return if ru < 0.0 {
                point_on_seg(s1.p1.x, s1.p1.y, t1, s2)
            } else {
                point_on_seg(s1.p2.x, s1.p2.y, t1, s2)
            };
        }
        // center lines miss each other, but the caps may still overlap
        let t1 = (s1.thickness * 0.5 + bloat).max(0.0);
        let t2 = (s2.thickness * 0.5 + bloat).max(0.0);
        point_on_seg(s1.p1.x, s1.p1.y, t1, s2)
            || point_on_seg(s1.p2.x, s1.p2.y, t1, s2)
            || point_on_seg(s2.p1.x, s2.p1.y, t2, s1)
            || point_on_seg(s2.p2.x, s2.p2.y, t2, s1)
    }
}

/// Thick segment against an arc: project the center line onto the arc's
/// outer circle, then verify the candidate points actually lie on the
/// sweep.  End caps on both sides are checked separately.
pub fn seg_arc_touch(seg: &Seg, arc: &ArcShape, bloat: f64) -> bool {
    let dx = seg.p2.x - seg.p1.x;
    let dy = seg.p2.y - seg.p1.y;
    let dx1 = seg.p1.x - arc.center.x;
    let dy1 = seg.p1.y - arc.center.y;
    let l = dx * dx + dy * dy;
    let d = dx * dy1 - dy * dx1;
    let d = d * d;

    let reach = arc.radius + (0.5 * (arc.thickness + seg.thickness) + bloat).max(0.0);
    let r2 = reach * reach * l - d;
    if r2 < 0.0 {
        return false;
    }
    let cap = (0.5 * seg.thickness + bloat).max(0.0);
    if point_on_arc(seg.p1.x, seg.p1.y, cap, arc) {
        return true;
    }
    if point_on_arc(seg.p2.x, seg.p2.y, cap, arc) {
        return true;
    }
    if l == 0.0 {
        return false;
    }
    let r2 = r2.sqrt();
    let base = -(dx * dx1 + dy * dy1);
    let r = (base + r2) / l;
    if r >= 0.0 && r <= 1.0 && point_on_arc(seg.p1.x + r * dx, seg.p1.y + r * dy, cap, arc) {
        return true;
    }
    let r = (base - r2) / l;
    if r >= 0.0 && r <= 1.0 && point_on_arc(seg.p1.x + r * dx, seg.p1.y + r * dy, cap, arc) {
        return true;
    }
    // arc end caps against the segment
    let (e1, e2) = arc.endpoints();
    let arc_cap = (arc.thickness * 0.5 + bloat).max(0.0);
    point_on_seg(e1.x, e1.y, arc_cap, seg) || point_on_seg(e2.x, e2.y, arc_cap, seg)
}

/// Two arcs under bloat: intersect the outer circles and test the
/// crossing points against both sweeps, then try the four end caps.
pub fn arcs_touch(a1: &ArcShape, a2: &ArcShape, bloat: f64) -> bool {
    let pdx = a2.center.x - a1.center.x;
    let pdy = a2.center.y - a1.center.y;
    let l = pdx * pdx + pdy * pdy;
    let t1 = (0.5 * a1.thickness + bloat).max(0.0);
    let t2 = 0.5 * a2.thickness;

    // concentric rings
    if l == 0.0 {
        return (a1.radius - t1 >= a2.radius - t2 && a1.radius - t1 <= a2.radius + t2)
            || (a1.radius + t1 >= a2.radius - t2 && a1.radius + t1 <= a2.radius + t2);
    }
    let mut r1 = a1.radius + t1;
    r1 *= r1;
    let mut r2 = a2.radius + t2;
    r2 *= r2;
    let a = 0.5 * (r1 - r2 + l) / l;
    let d = r1 / l - a * a + 1e-5;
    if d < 0.0 {
        return false;
    }
    let d = d.sqrt();
    let x = a1.center.x + a * pdx;
    let y = a1.center.y + a * pdy;
    let b1 = a1.bounding_box();
    let b2 = a2.bounding_box();
    for &(px, py) in &[(x + d * pdy, y - d * pdx), (x - d * pdy, y + d * pdx)] {
        if point_in_aabb(px, py, &b1) && point_in_aabb(px, py, &b2) {
            return true;
        }
    }

    // end caps in case the sweeps stop short of the crossing points
    let (e1, e2) = a1.endpoints();
    if point_on_arc(e1.x, e1.y, t1, a2) || point_on_arc(e2.x, e2.y, t1, a2) {
        return true;
    }
    let (e1, e2) = a2.endpoints();
    let cap2 = (t2 + bloat).max(0.0);
    point_on_arc(e1.x, e1.y, cap2, a1) || point_on_arc(e2.x, e2.y, cap2, a1)
}

/// Thick segment against an axis-aligned rectangle.  The bloat rides on
/// the dummy-edge intersection tests.
pub fn seg_in_rectangle(rect: &AABB<f64>, seg: &Seg, bloat: f64) -> bool {
    let sbox = seg.rect();
    if !boxes_touch(&sbox, rect) {
        return false;
    }
    // the whole segment may sit inside the rectangle
    if point_in_aabb(seg.p1.x, seg.p1.y, rect) {
        return true;
    }
    let (x1, y1) = (rect.mins.x, rect.mins.y);
    let (x2, y2) = (rect.maxs.x, rect.maxs.y);
    let edges = [
        Seg::hairline(Point::new(x1, y1), Point::new(x2, y1)),
        Seg::hairline(Point::new(x2, y1), Point::new(x2, y2)),
        Seg::hairline(Point::new(x1, y2), Point::new(x2, y2)),
        Seg::hairline(Point::new(x1, y1), Point::new(x1, y2)),
    ];
    edges.iter().any(|edge| segs_touch(edge, seg, bloat))
}

/// Arc against an axis-aligned rectangle via its four edges.
pub fn arc_in_rectangle(rect: &AABB<f64>, arc: &ArcShape, bloat: f64) -> bool {
    let (x1, y1) = (rect.mins.x, rect.mins.y);
    let (x2, y2) = (rect.maxs.x, rect.maxs.y);
    let edges = [
        Seg::hairline(Point::new(x1, y1), Point::new(x2, y1)),
        Seg::hairline(Point::new(x2, y1), Point::new(x2, y2)),
        Seg::hairline(Point::new(x1, y2), Point::new(x2, y2)),
        Seg::hairline(Point::new(x1, y1), Point::new(x1, y2)),
    ];
    edges.iter().any(|edge| seg_arc_touch(edge, arc, bloat))
}

fn contour_edges<'a>(contour: &'a [Point]) -> impl Iterator<Item = Seg> + 'a {
    contour
        .iter()
        .chain(contour.first())
        .tuple_windows()
        .map(|(a, b)| Seg::hairline(*a, *b))
}

/// Ray-cast containment with an extra pass that accepts a fat point
/// grazing a contour edge within `radius`.
pub fn point_in_polygon(x: f64, y: f64, radius: f64, contour: &[Point]) -> bool {
    let bbox = inflate(&bounding_box_of(contour), radius);
    if !point_in_aabb(x, y, &bbox) {
        return false;
    }
    let mut inside = false;
    let n = contour.len();
    let mut j = n - 1;
    for i in 0..n {
        let pi = &contour[i];
        let pj = &contour[j];
        if ((pi.y <= y && y < pj.y) || (pj.y <= y && y < pi.y))
            && x < (pj.x - pi.x) * (y - pi.y) / (pj.y - pi.y) + pi.x
        {
            inside = !inside;
        }
        j = i;
    }
    if inside {
        return true;
    }
    contour_edges(contour).any(|edge| point_on_seg(x, y, radius, &edge))
}

/// Thick segment against a polygon contour: an endpoint inside, or a
/// crossing with any contour edge.
pub fn seg_in_polygon(seg: &Seg, contour: &[Point], bloat: f64) -> bool {
    let margin = (seg.thickness + bloat).max(0.0);
    let sbox = inflate(&bounding_box_of(&[seg.p1, seg.p2]), margin);
    if !boxes_touch(&sbox, &bounding_box_of(contour)) {
        return false;
    }
    let cap = (0.5 * seg.thickness + bloat).max(0.0);
    if point_in_polygon(seg.p1.x, seg.p1.y, cap, contour)
        || point_in_polygon(seg.p2.x, seg.p2.y, cap, contour)
    {
        return true;
    }
    contour_edges(contour).any(|edge| segs_touch(seg, &edge, bloat))
}

/// Arc against a polygon contour.
pub fn arc_in_polygon(arc: &ArcShape, contour: &[Point], bloat: f64) -> bool {
    if !boxes_touch(&arc.bounding_box(), &bounding_box_of(contour)) {
        return false;
    }
    let cap = (0.5 * arc.thickness + bloat).max(0.0);
    let (e1, e2) = arc.endpoints();
    if point_in_polygon(e1.x, e1.y, cap, contour) || point_in_polygon(e2.x, e2.y, cap, contour) {
        return true;
    }
    contour_edges(contour).any(|edge| seg_arc_touch(&edge, arc, bloat))
}

/// Two polygon contours: one vertex of `c2` inside `c1`, or any edge of
/// `c1` touching `c2`.
pub fn polygon_in_polygon(c1: &[Point], c2: &[Point], bloat: f64) -> bool {
    let b1 = inflate(&bounding_box_of(c1), bloat);
    if !boxes_touch(&b1, &bounding_box_of(c2)) {
        return false;
    }
    // one vertex test suffices for full containment
    if let Some(p) = c2.first() {
        if point_in_polygon(p.x, p.y, 0.0, c1) {
            return true;
        }
    }
    contour_edges(c1).any(|edge| seg_in_polygon(&edge, c2, bloat))
}

/// Rectangle against a polygon contour, used for square pads.
pub fn rect_in_polygon(rect: &AABB<f64>, contour: &[Point], bloat: f64) -> bool {
    let corners = [
        Point::new(rect.mins.x, rect.mins.y),
        Point::new(rect.maxs.x, rect.mins.y),
        Point::new(rect.maxs.x, rect.maxs.y),
        Point::new(rect.mins.x, rect.maxs.y),
    ];
    polygon_in_polygon(&corners, contour, bloat)
}

pub fn square_dist(a: &Point, b: &Point) -> f64 {
    na::distance_squared(a, b)
}
