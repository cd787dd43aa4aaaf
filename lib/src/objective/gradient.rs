//! Gradient providers for the placement objective.
//!
//! The nearest points depend on the snapshots through an argmin that has no
//! useful derivative. Providers therefore treat `targets` and `nearest` as
//! constants: the gradient is taken with respect to the snapshots only, and
//! the controller re-resolves the nearest points between steps.

use super::{degrees_of_freedom, evaluate, target_term_gradient, terms};
use crate::config::Target;
use crate::geometry::PointF;
use crate::CoordF;

/// Computes an objective value and its gradient with respect to the snapshots.
pub trait GradientProvider {
    /// Returns `(value, gradient)`, where `gradient[i]` is the partial
    /// derivative with respect to `snapshots[i]`.
    fn value_and_gradient(
        &self,
        snapshots: &[PointF],
        targets: &[Target],
        nearest: &[PointF],
    ) -> (CoordF, Vec<PointF>);
}

/// Closed-form gradient of [`evaluate`](super::evaluate).
///
/// The degrees of freedom depend only on the targets, so the value is a plain
/// sum of squares scaled by a constant and each partial derivative is
///
/// ```text
/// 2/dof · [(s[i] - s[i-1]) + (s[i] - s[i+1]) + ∂target + (s[i] - n[i])]
/// ```
///
/// with the neighbour terms present only where the neighbour exists.
#[derive(Clone, Copy, Debug, Default)]
pub struct AnalyticGradient;

impl GradientProvider for AnalyticGradient {
    fn value_and_gradient(
        &self,
        snapshots: &[PointF],
        targets: &[Target],
        nearest: &[PointF],
    ) -> (CoordF, Vec<PointF>) {
        let n = snapshots.len().min(targets.len()).min(nearest.len());
        let value = terms(snapshots, targets, nearest).value();
        let dof = degrees_of_freedom(&targets[..n]);
        if dof == 0 {
            return (value, vec![PointF::zero(); snapshots.len()]);
        }
        let scale = 1.0 / dof as CoordF;

        let mut gradient = vec![PointF::zero(); snapshots.len()];
        for i in 0..n {
            let s = snapshots[i];
            let mut g = (s - nearest[i]) * 2.0;
            g += target_term_gradient(s, &targets[i]);
            if i > 0 {
                g += (s - snapshots[i - 1]) * 2.0;
            }
            if i + 1 < n {
                g += (s - snapshots[i + 1]) * 2.0;
            }
            gradient[i] = g * scale;
        }
        (value, gradient)
    }
}

/// Central-difference gradient of an arbitrary objective function.
///
/// Costs two objective evaluations per coordinate; meant for checking
/// closed-form gradients and for trying out alternative objectives.
#[derive(Clone, Debug)]
pub struct FiniteDifference<F> {
    objective: F,
    step: CoordF,
}

impl<F> FiniteDifference<F>
where
    F: Fn(&[PointF], &[Target], &[PointF]) -> CoordF,
{
    /// Wrap `objective` with a default step of 1e-6.
    pub fn new(objective: F) -> Self {
        Self {
            objective,
            step: 1e-6,
        }
    }

    /// Builder: set the difference step.
    pub fn with_step(mut self, step: CoordF) -> Self {
        self.step = step;
        self
    }
}

impl FiniteDifference<fn(&[PointF], &[Target], &[PointF]) -> CoordF> {
    /// Finite differences over the standard objective.
    pub fn standard() -> Self {
        Self::new(evaluate as fn(&[PointF], &[Target], &[PointF]) -> CoordF)
    }
}

impl<F> GradientProvider for FiniteDifference<F>
where
    F: Fn(&[PointF], &[Target], &[PointF]) -> CoordF,
{
    fn value_and_gradient(
        &self,
        snapshots: &[PointF],
        targets: &[Target],
        nearest: &[PointF],
    ) -> (CoordF, Vec<PointF>) {
        let value = (self.objective)(snapshots, targets, nearest);
        let mut shifted = snapshots.to_vec();
        let partial = |shifted: &mut Vec<PointF>, i: usize, delta: PointF| {
            let original = shifted[i];
            shifted[i] = original + delta;
            let plus = (self.objective)(&shifted[..], targets, nearest);
            shifted[i] = original - delta;
            let minus = (self.objective)(&shifted[..], targets, nearest);
            shifted[i] = original;
            (plus - minus) / (2.0 * self.step)
        };

        let gradient = (0..snapshots.len())
            .map(|i| {
                let gx = partial(&mut shifted, i, PointF::new(self.step, 0.0));
                let gy = partial(&mut shifted, i, PointF::new(0.0, self.step));
                PointF::new(gx, gy)
            })
            .collect();
        (value, gradient)
    }
}
