//! Collision detection between adjacent pendulums
//!
//! Each pendulum is a rod (segment from pivot to bob) plus a bob (circle at
//! the rod's far end). Pivots sit on a horizontal line `spacing` apart; the
//! rod hangs along +y at theta = 0 and rotates by theta.
//!
//! Rod-vs-rod intersection is not tested: it is only reachable with
//! deliberately overlapping static configurations.

use glam::DVec2;
use std::f64::consts::PI;

/// Bob radius for a given mass.
///
/// Density is 1, so mass is the volume of a sphere.
#[inline]
pub fn bob_radius(mass: f64) -> f64 {
    (3.0 * mass / (4.0 * PI)).cbrt()
}

/// Which neighbor a position update came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Side {
    Left,
    Right,
}

impl Side {
    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Left => "left",
            Side::Right => "right",
        }
    }

    /// The same relation seen from the other pendulum
    pub fn mirrored(&self) -> Side {
        match self {
            Side::Left => Side::Right,
            Side::Right => Side::Left,
        }
    }
}

/// The collision-relevant part of a pendulum at one instant
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PendulumPose {
    pub theta: f64,
    pub length: f64,
    pub mass: f64,
}

impl PendulumPose {
    pub fn new(theta: f64, length: f64, mass: f64) -> Self {
        Self { theta, length, mass }
    }

    #[inline]
    pub fn radius(&self) -> f64 {
        bob_radius(self.mass)
    }

    /// Furthest distance the bob's edge can get from the pivot
    #[inline]
    pub fn reach(&self) -> f64 {
        self.length + self.radius()
    }

    /// Rod segment for a pivot at `(pivot_x, 0)`
    pub fn rod(&self, pivot_x: f64) -> Segment {
        let pivot = DVec2::new(pivot_x, 0.0);
        let tip = DVec2::from_angle(self.theta).rotate(DVec2::new(0.0, self.length));
        Segment::new(pivot, pivot + tip)
    }
}

/// A line segment
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Segment {
    pub start: DVec2,
    pub end: DVec2,
}

impl Segment {
    pub fn new(start: DVec2, end: DVec2) -> Self {
        Self { start, end }
    }

    /// Closest point on the segment to `p`
    pub fn closest_point(&self, p: DVec2) -> DVec2 {
        let line = self.end - self.start;
        let len_sq = line.length_squared();
        if len_sq == 0.0 {
            return self.start;
        }
        let t = ((p - self.start).dot(line) / len_sq).clamp(0.0, 1.0);
        self.start + line * t
    }
}

/// A circle
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Circle {
    pub center: DVec2,
    pub radius: f64,
}

impl Circle {
    pub fn new(center: DVec2, radius: f64) -> Self {
        Self { center, radius }
    }
}

/// Segment/circle overlap (touching counts)
#[inline]
pub fn segment_circle(segment: &Segment, circle: &Circle) -> bool {
    let closest = segment.closest_point(circle.center);
    closest.distance_squared(circle.center) <= circle.radius * circle.radius
}

/// Circle/circle overlap (touching counts)
#[inline]
pub fn circle_circle(a: &Circle, b: &Circle) -> bool {
    let reach = a.radius + b.radius;
    a.center.distance_squared(b.center) <= reach * reach
}

/// Whether two pendulums can never touch regardless of their angles
#[inline]
pub fn out_of_reach(own: &PendulumPose, other: &PendulumPose, spacing: f64) -> bool {
    own.reach() + other.reach() < spacing
}

/// Test this pendulum against a neighbor on `side`.
///
/// Geometry is always evaluated with the left pendulum's pivot at the origin
/// and the right one at `spacing`, so swapping the pair and mirroring the
/// side gives the identical answer.
pub fn pendulums_collide(own: &PendulumPose, other: &PendulumPose, side: Side, spacing: f64) -> bool {
    if out_of_reach(own, other, spacing) {
        return false;
    }

    let (left, right) = match side {
        Side::Right => (own, other),
        Side::Left => (other, own),
    };

    let left_rod = left.rod(0.0);
    let right_rod = right.rod(spacing);
    let left_bob = Circle::new(left_rod.end, left.radius());
    let right_bob = Circle::new(right_rod.end, right.radius());

    segment_circle(&left_rod, &right_bob)
        || segment_circle(&right_rod, &left_bob)
        || circle_circle(&left_bob, &right_bob)
}
