//! First-order optimizers over point sequences.
//!
//! The controller only talks to an optimizer through [`Optimizer`]: it seeds
//! a state, feeds gradients, and extracts the current parameters. The state
//! itself stays opaque.

use crate::geometry::PointF;
use crate::tensor::{points_to_tensor, tensor_to_points, PlannerBackend};
use crate::CoordF;
use burn::module::Param;
use burn::optim::{AdamConfig, GradientsParams, Optimizer as _};
use burn::prelude::*;
use burn::tensor::backend::AutodiffBackend;
use std::fmt;

/// A first-order update rule over a sequence of points.
pub trait Optimizer {
    /// Optimizer state, including the current parameters.
    type State;

    /// Seed a state from the initial parameters.
    fn init(&self, params: &[PointF]) -> Self::State;

    /// Apply one update in place with the gradient evaluated at the current
    /// parameters. `iteration` is 0-based.
    fn step(&self, iteration: usize, gradient: &[PointF], state: &mut Self::State);

    /// Current parameter estimate.
    fn extract(&self, state: &Self::State) -> Vec<PointF>;
}

type InnerBackend = <PlannerBackend as AutodiffBackend>::InnerBackend;

/// The snapshot sequence as a trainable `[n, 2]` parameter.
#[derive(Module, Debug)]
pub struct SnapshotParams<B: Backend> {
    points: Param<Tensor<B, 2>>,
}

type AdamStep = Box<
    dyn FnMut(CoordF, SnapshotParams<PlannerBackend>, GradientsParams) -> SnapshotParams<PlannerBackend>,
>;

/// Adam (Kingma & Ba, 2015) run by burn's optimizer on the snapshot tensor.
///
/// Burn keeps its own step counter for bias correction, so the iteration
/// index passed to [`Optimizer::step`] is not used.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Adam {
    pub learning_rate: CoordF,
    pub beta1: f32,
    pub beta2: f32,
    pub epsilon: f32,
}

impl Default for Adam {
    fn default() -> Self {
        Self {
            learning_rate: 1.0,
            beta1: 0.9,
            beta2: 0.999,
            epsilon: 1e-8,
        }
    }
}

impl Adam {
    /// Adam with the given step size and standard moment decay rates.
    pub fn new(learning_rate: CoordF) -> Self {
        Self {
            learning_rate,
            ..Self::default()
        }
    }
}

/// Parameters and moment estimates of an [`Adam`] run.
pub struct AdamState {
    params: Option<SnapshotParams<PlannerBackend>>,
    len: usize,
    step: AdamStep,
}

impl fmt::Debug for AdamState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdamState")
            .field("params", &self.params)
            .field("len", &self.len)
            .finish_non_exhaustive()
    }
}

impl Optimizer for Adam {
    type State = AdamState;

    fn init(&self, params: &[PointF]) -> AdamState {
        let device = Default::default();
        let points = Param::from_tensor(points_to_tensor::<PlannerBackend>(params, &device));
        let mut adam = AdamConfig::new()
            .with_beta_1(self.beta1)
            .with_beta_2(self.beta2)
            .with_epsilon(self.epsilon)
            .init();
        let step: AdamStep = Box::new(
            move |lr: CoordF, module: SnapshotParams<PlannerBackend>, grads: GradientsParams| {
                adam.step(lr, module, grads)
            },
        );
        AdamState {
            params: Some(SnapshotParams { points }),
            len: params.len(),
            step,
        }
    }

    fn step(&self, _iteration: usize, gradient: &[PointF], state: &mut AdamState) {
        let Some(params) = state.params.take() else {
            return;
        };
        // rows without a gradient stay put
        let rows: Vec<PointF> = (0..state.len)
            .map(|i| gradient.get(i).copied().unwrap_or_else(PointF::zero))
            .collect();
        let device = Default::default();
        let mut grads = GradientsParams::new();
        grads.register(params.points.id, points_to_tensor::<InnerBackend>(&rows, &device));
        state.params = Some((state.step)(self.learning_rate, params, grads));
    }

    fn extract(&self, state: &AdamState) -> Vec<PointF> {
        state
            .params
            .as_ref()
            .map(|p| tensor_to_points(p.points.val()))
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_first_step_moves_by_learning_rate() {
        // bias-corrected first step is lr * sign(g)
        let adam = Adam::new(0.5);
        let mut state = adam.init(&[PointF::new(1.0, 1.0)]);
        adam.step(0, &[PointF::new(4.0, -0.01)], &mut state);
        let p = adam.extract(&state)[0];
        assert_abs_diff_eq!(p.x, 0.5, epsilon = 1e-6);
        assert_abs_diff_eq!(p.y, 1.5, epsilon = 1e-4);
    }

    #[test]
    fn test_zero_gradient_keeps_params() {
        let adam = Adam::default();
        let start = vec![PointF::new(3.0, -2.0), PointF::new(0.0, 7.0)];
        let mut state = adam.init(&start);
        adam.step(0, &[PointF::zero(); 2], &mut state);
        assert_eq!(adam.extract(&state), start);
    }

    #[test]
    fn test_extract_after_init() {
        let adam = Adam::default();
        let start = vec![PointF::new(0.125, 9.5); 4];
        assert_eq!(adam.extract(&adam.init(&start)), start);
    }

    #[test]
    fn test_huge_iteration_index() {
        let adam = Adam::new(0.5);
        let mut state = adam.init(&[PointF::new(1.0, 1.0)]);
        adam.step(usize::MAX, &[PointF::new(2.0, -2.0)], &mut state);
        let p = adam.extract(&state)[0];
        assert!(p.x.is_finite() && p.y.is_finite(), "got {}", p);
        assert_abs_diff_eq!(p.x, 0.5, epsilon = 1e-6);
        assert_abs_diff_eq!(p.y, 1.5, epsilon = 1e-6);
    }

    #[test]
    fn test_short_gradient_leaves_tail() {
        let adam = Adam::new(0.5);
        let mut state = adam.init(&[PointF::new(1.0, 1.0), PointF::new(2.0, 2.0)]);
        adam.step(0, &[PointF::new(1.0, 1.0)], &mut state);
        let params = adam.extract(&state);
        assert_eq!(params.len(), 2);
        assert_eq!(params[1], PointF::new(2.0, 2.0));
    }

    #[test]
    fn test_minimizes_quadratic() {
        // f(p) = |p - c|², gradient 2(p - c)
        let c = PointF::new(4.0, -3.0);
        let adam = Adam::new(0.1);
        let mut state = adam.init(&[PointF::zero()]);
        for i in 0..2000 {
            let p = adam.extract(&state)[0];
            adam.step(i, &[(p - c) * 2.0], &mut state);
        }
        let p = adam.extract(&state)[0];
        assert!(p.distance(&c) < 5e-2, "ended at {}", p);
    }
}
