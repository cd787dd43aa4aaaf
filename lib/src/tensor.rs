//! Tensor plumbing for the burn-backed objective and optimizer.
//!
//! A point sequence maps to a `[n, 2]` float tensor, one row per layer with
//! columns `x, y`.

use crate::geometry::PointF;
use crate::CoordF;
use burn::backend::{Autodiff, NdArray};
use burn::prelude::*;

/// CPU backend the planner differentiates on.
pub type PlannerBackend = Autodiff<NdArray<CoordF>>;

/// Pack `points` into a `[n, 2]` tensor.
pub fn points_to_tensor<B: Backend>(points: &[PointF], device: &B::Device) -> Tensor<B, 2> {
    let flat: Vec<CoordF> = points.iter().flat_map(|p| [p.x, p.y]).collect();
    Tensor::from_data(TensorData::new(flat, [points.len(), 2]), device)
}

/// Unpack a `[n, 2]` tensor. Returns an empty sequence if the tensor data
/// cannot be read back as coordinates.
pub fn tensor_to_points<B: Backend>(tensor: Tensor<B, 2>) -> Vec<PointF> {
    tensor
        .into_data()
        .to_vec::<CoordF>()
        .unwrap_or_default()
        .chunks_exact(2)
        .map(|xy| PointF::new(xy[0], xy[1]))
        .collect()
}

/// Sum of squared entries.
pub fn sum_squares<B: Backend>(tensor: Tensor<B, 2>) -> Tensor<B, 1> {
    (tensor.clone() * tensor).sum()
}
