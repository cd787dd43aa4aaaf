//! Geometry primitives for the planner.
//!
//! Coordinates are unscaled floating-point millimetres. Snapshot positions
//! are optimization variables, so the integer scaling a slicer would use for
//! toolpaths does not apply here.

use crate::CoordF;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, AddAssign, Mul, Neg, Sub};

/// A 2D point with floating-point coordinates.
#[derive(Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PointF {
    pub x: CoordF,
    pub y: CoordF,
}

impl PointF {
    /// Create a new point.
    #[inline]
    pub const fn new(x: CoordF, y: CoordF) -> Self {
        Self { x, y }
    }

    /// The origin.
    #[inline]
    pub const fn zero() -> Self {
        Self { x: 0.0, y: 0.0 }
    }

    /// Squared Euclidean distance to another point.
    #[inline]
    pub fn distance_squared(&self, other: &PointF) -> CoordF {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        dx * dx + dy * dy
    }

    /// Euclidean distance to another point.
    #[inline]
    pub fn distance(&self, other: &PointF) -> CoordF {
        self.distance_squared(other).sqrt()
    }
}

impl fmt::Debug for PointF {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.x, self.y)
    }
}

impl fmt::Display for PointF {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({:.3}, {:.3})", self.x, self.y)
    }
}

impl Add for PointF {
    type Output = PointF;

    #[inline]
    fn add(self, rhs: PointF) -> PointF {
        PointF::new(self.x + rhs.x, self.y + rhs.y)
    }
}

impl AddAssign for PointF {
    #[inline]
    fn add_assign(&mut self, rhs: PointF) {
        self.x += rhs.x;
        self.y += rhs.y;
    }
}

impl Sub for PointF {
    type Output = PointF;

    #[inline]
    fn sub(self, rhs: PointF) -> PointF {
        PointF::new(self.x - rhs.x, self.y - rhs.y)
    }
}

impl Mul<CoordF> for PointF {
    type Output = PointF;

    #[inline]
    fn mul(self, rhs: CoordF) -> PointF {
        PointF::new(self.x * rhs, self.y * rhs)
    }
}

impl Neg for PointF {
    type Output = PointF;

    #[inline]
    fn neg(self) -> PointF {
        PointF::new(-self.x, -self.y)
    }
}

impl From<(CoordF, CoordF)> for PointF {
    #[inline]
    fn from((x, y): (CoordF, CoordF)) -> Self {
        PointF::new(x, y)
    }
}

/// Axis-aligned bounds of a set of points, `None` for an empty set.
pub fn bounds(points: &[PointF]) -> Option<(PointF, PointF)> {
    let first = *points.first()?;
    Some(points.iter().fold((first, first), |(min, max), p| {
        (
            PointF::new(min.x.min(p.x), min.y.min(p.y)),
            PointF::new(max.x.max(p.x), max.y.max(p.y)),
        )
    }))
}
