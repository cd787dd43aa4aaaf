//! Target constraint types.
//!
//! G-code tooling conventionally marks "no value" with `-1`. Inside the
//! planner that convention is replaced by [`Target`], so a missing axis can
//! never be mistaken for a real coordinate. The sentinel only survives at
//! the input boundary ([`Target::from_axes`], [`parse_axis`]) and in
//! [`Target::anchor`].

use crate::geometry::PointF;
use crate::CoordF;
use log::warn;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Raw value meaning "no constraint on this axis".
pub const SENTINEL: CoordF = -1.0;

/// A single build plate axis.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Axis {
    X,
    Y,
}

impl Axis {
    /// The component of `p` along this axis.
    #[inline]
    pub fn of(self, p: PointF) -> CoordF {
        match self {
            Axis::X => p.x,
            Axis::Y => p.y,
        }
    }
}

impl fmt::Display for Axis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Axis::X => write!(f, "x"),
            Axis::Y => write!(f, "y"),
        }
    }
}

/// Where snapshots should preferably be taken.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Target {
    /// Both axes constrained.
    Point { x: CoordF, y: CoordF },
    /// Only one axis constrained.
    Axis { axis: Axis, value: CoordF },
    /// No target.
    #[default]
    Absent,
}

impl Target {
    /// Build a target from optional axis values. `None` and the raw sentinel
    /// `-1` both mean "unconstrained".
    pub fn from_axes(x: Option<CoordF>, y: Option<CoordF>) -> Self {
        let present = |v: Option<CoordF>| v.filter(|v| *v != SENTINEL);
        match (present(x), present(y)) {
            (Some(x), Some(y)) => Target::Point { x, y },
            (Some(value), None) => Target::Axis {
                axis: Axis::X,
                value,
            },
            (None, Some(value)) => Target::Axis {
                axis: Axis::Y,
                value,
            },
            (None, None) => Target::Absent,
        }
    }

    /// Build a target from user-supplied text, substituting "absent" for
    /// anything that does not parse.
    pub fn from_input(x: Option<&str>, y: Option<&str>) -> Self {
        Self::from_axes(x.and_then(parse_axis), y.and_then(parse_axis))
    }

    /// Whether this target constrains anything.
    #[inline]
    pub fn is_absent(&self) -> bool {
        matches!(self, Target::Absent)
    }

    /// Degrees of freedom this target adds to the objective per layer.
    #[inline]
    pub fn degrees_of_freedom(&self) -> usize {
        match self {
            Target::Point { .. } => 2,
            Target::Axis { .. } => 1,
            Target::Absent => 0,
        }
    }

    /// Concrete query coordinate for the initial nearest-point resolution.
    ///
    /// Unconstrained axes use the sentinel value, so an absent target queries
    /// `(-1, -1)`. This coordinate is never used as a cost term.
    pub fn anchor(&self) -> PointF {
        match *self {
            Target::Point { x, y } => PointF::new(x, y),
            Target::Axis {
                axis: Axis::X,
                value,
            } => PointF::new(value, SENTINEL),
            Target::Axis {
                axis: Axis::Y,
                value,
            } => PointF::new(SENTINEL, value),
            Target::Absent => PointF::new(SENTINEL, SENTINEL),
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Target::Point { x, y } => write!(f, "({:.3}, {:.3})", x, y),
            Target::Axis { axis, value } => write!(f, "{}={:.3}", axis, value),
            Target::Absent => write!(f, "none"),
        }
    }
}

/// Parse one target axis from user input.
///
/// Blank input means "no target". Unparseable input is a configuration
/// error that is recovered here: it is logged and treated as blank.
pub fn parse_axis(input: &str) -> Option<CoordF> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return None;
    }
    match trimmed.parse::<CoordF>() {
        Ok(v) if v.is_finite() && v != SENTINEL => Some(v),
        Ok(_) => None,
        Err(_) => {
            warn!("Ignoring unparseable target value '{}'", trimmed);
            None
        }
    }
}
