//! Reverse-mode gradient of the objective on the burn autodiff backend.

use super::degrees_of_freedom;
use super::gradient::GradientProvider;
use crate::config::{Axis, Target};
use crate::geometry::PointF;
use crate::tensor::{points_to_tensor, sum_squares, tensor_to_points, PlannerBackend};
use crate::CoordF;
use burn::prelude::*;

/// Builds the objective as a tensor expression over the snapshot matrix and
/// differentiates it with `backward()`.
///
/// Targets become a goal matrix and a 0/1 mask selecting the constrained
/// axes, so one expression covers full, single-axis and absent targets.
#[derive(Clone, Debug, Default)]
pub struct AutodiffGradient {
    device: <PlannerBackend as Backend>::Device,
}

impl AutodiffGradient {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Goal coordinates and axis mask for each target.
fn target_tensors<B: Backend>(
    targets: &[Target],
    device: &B::Device,
) -> (Tensor<B, 2>, Tensor<B, 2>) {
    let (goals, masks): (Vec<PointF>, Vec<PointF>) = targets
        .iter()
        .map(|t| match *t {
            Target::Point { x, y } => (PointF::new(x, y), PointF::new(1.0, 1.0)),
            Target::Axis {
                axis: Axis::X,
                value,
            } => (PointF::new(value, 0.0), PointF::new(1.0, 0.0)),
            Target::Axis {
                axis: Axis::Y,
                value,
            } => (PointF::new(0.0, value), PointF::new(0.0, 1.0)),
            Target::Absent => (PointF::zero(), PointF::zero()),
        })
        .unzip();
    (
        points_to_tensor(&goals, device),
        points_to_tensor(&masks, device),
    )
}

impl GradientProvider for AutodiffGradient {
    fn value_and_gradient(
        &self,
        snapshots: &[PointF],
        targets: &[Target],
        nearest: &[PointF],
    ) -> (CoordF, Vec<PointF>) {
        let n = snapshots.len().min(targets.len()).min(nearest.len());
        let dof = degrees_of_freedom(&targets[..n]);
        let mut gradient = vec![PointF::zero(); snapshots.len()];
        if n == 0 || dof == 0 {
            return (0.0, gradient);
        }

        let s = points_to_tensor::<PlannerBackend>(&snapshots[..n], &self.device).require_grad();
        let near = points_to_tensor::<PlannerBackend>(&nearest[..n], &self.device);
        let (goal, mask) = target_tensors::<PlannerBackend>(&targets[..n], &self.device);

        let mut total = sum_squares(s.clone() - near) + sum_squares((s.clone() - goal) * mask);
        if n > 1 {
            let steps = s.clone().narrow(0, 1, n - 1) - s.clone().narrow(0, 0, n - 1);
            total = total + sum_squares(steps);
        }
        let loss = total.div_scalar(dof as CoordF);
        let value = loss.clone().into_scalar().elem::<CoordF>();

        let grads = loss.backward();
        if let Some(g) = s.grad(&grads) {
            for (slot, partial) in gradient.iter_mut().zip(tensor_to_points(g)) {
                *slot = partial;
            }
        }
        (value, gradient)
    }
}
