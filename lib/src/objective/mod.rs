//! Snapshot placement objective.
//!
//! For every layer `i` the objective accumulates squared-distance terms:
//!
//! - continuity: `|s[i] - s[i-1]|²` for `i > 0` (2 degrees of freedom)
//! - target: `|s[i] - t|²` for a full target (2), `(s[i].x - t.x)²` or
//!   `(s[i].y - t.y)²` for a single-axis target (1), nothing when absent
//! - print adherence: `|s[i] - n[i]|²` where `n[i]` is the nearest printed
//!   point (2)
//!
//! and returns the sum divided by the total degrees of freedom. Normalizing
//! by active degrees of freedom rather than layer count keeps gradient
//! magnitudes comparable between runs with and without target constraints.
//!
//! Squared distances keep every term differentiable in the snapshots. The
//! nearest points and targets are constants for one evaluation.

pub mod autodiff;
pub mod gradient;

use crate::config::{Axis, Target};
use crate::geometry::PointF;
use crate::CoordF;

/// Un-normalized objective: the term sum and its degrees of freedom.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct ObjectiveTerms {
    pub sum: CoordF,
    pub degrees_of_freedom: usize,
}

impl ObjectiveTerms {
    /// Mean over active degrees of freedom; 0 when nothing is active.
    #[inline]
    pub fn value(&self) -> CoordF {
        if self.degrees_of_freedom == 0 {
            0.0
        } else {
            self.sum / self.degrees_of_freedom as CoordF
        }
    }
}

/// Squared distance from `p` to a target, or `None` if the target is absent.
#[inline]
pub(crate) fn target_term(p: PointF, target: &Target) -> Option<CoordF> {
    match *target {
        Target::Point { x, y } => Some(p.distance_squared(&PointF::new(x, y))),
        Target::Axis { axis, value } => {
            let d = axis.of(p) - value;
            Some(d * d)
        }
        Target::Absent => None,
    }
}

/// Gradient of [`target_term`] with respect to `p`.
#[inline]
pub(crate) fn target_term_gradient(p: PointF, target: &Target) -> PointF {
    match *target {
        Target::Point { x, y } => (p - PointF::new(x, y)) * 2.0,
        Target::Axis {
            axis: Axis::X,
            value,
        } => PointF::new(2.0 * (p.x - value), 0.0),
        Target::Axis {
            axis: Axis::Y,
            value,
        } => PointF::new(0.0, 2.0 * (p.y - value)),
        Target::Absent => PointF::zero(),
    }
}

/// Degrees of freedom of the objective for the given targets. Independent of
/// the snapshots, so it is a constant factor of the gradient.
pub fn degrees_of_freedom(targets: &[Target]) -> usize {
    let n = targets.len();
    let continuity = 2 * n.saturating_sub(1);
    let adherence = 2 * n;
    continuity + adherence + targets.iter().map(Target::degrees_of_freedom).sum::<usize>()
}

/// Accumulate the objective terms. The three slices are index-aligned; extra
/// elements of the longer slices are ignored.
pub fn terms(snapshots: &[PointF], targets: &[Target], nearest: &[PointF]) -> ObjectiveTerms {
    let mut acc = ObjectiveTerms::default();
    let mut previous: Option<PointF> = None;
    for ((s, t), n) in snapshots.iter().zip(targets).zip(nearest) {
        if let Some(prev) = previous {
            acc.sum += s.distance_squared(&prev);
            acc.degrees_of_freedom += 2;
        }
        if let Some(term) = target_term(*s, t) {
            acc.sum += term;
            acc.degrees_of_freedom += t.degrees_of_freedom();
        }
        acc.sum += s.distance_squared(n);
        acc.degrees_of_freedom += 2;
        previous = Some(*s);
    }
    acc
}

/// Evaluate the objective: term sum over active degrees of freedom.
pub fn evaluate(snapshots: &[PointF], targets: &[Target], nearest: &[PointF]) -> CoordF {
    terms(snapshots, targets, nearest).value()
}
