//! Point-cloud store.
//!
//! A [`PointCloud`] holds, for every print layer, the coordinates at which
//! material is actually deposited. It is built once at load time and is
//! read-only afterwards; point collections are shared with worker threads
//! through `Arc<[PointF]>` without locking.

use crate::geometry::{bounds, PointF};
use crate::{CoordF, Error, Result};
use std::sync::Arc;

/// One print layer.
#[derive(Clone, Debug)]
pub struct Layer {
    /// Position of this layer in the cloud, 0-based.
    pub index: usize,
    /// Print height of the layer (mm).
    pub z: CoordF,
    points: Arc<[PointF]>,
}

impl Layer {
    /// Create a layer. Fails if `points` is empty.
    pub fn new(index: usize, z: CoordF, points: Vec<PointF>) -> Result<Self> {
        if points.is_empty() {
            return Err(Error::EmptyLayer(index));
        }
        Ok(Self {
            index,
            z,
            points: points.into(),
        })
    }

    /// The printed coordinates of this layer, in program order.
    #[inline]
    pub fn points(&self) -> &[PointF] {
        &self.points
    }

    /// A shared handle to the points, for dispatching to worker threads.
    #[inline]
    pub fn shared_points(&self) -> Arc<[PointF]> {
        Arc::clone(&self.points)
    }

    /// Number of points in this layer.
    #[inline]
    pub fn len(&self) -> usize {
        self.points.len()
    }

    /// Always false: empty layers are rejected on construction.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

/// Immutable per-layer collections of printed coordinates.
#[derive(Clone, Debug, Default)]
pub struct PointCloud {
    layers: Vec<Layer>,
}

impl PointCloud {
    /// Build a cloud from layers, renumbering them in order.
    pub fn new(layers: Vec<Layer>) -> Self {
        let layers = layers
            .into_iter()
            .enumerate()
            .map(|(index, layer)| Layer { index, ..layer })
            .collect();
        Self { layers }
    }

    /// Build a cloud from plain point lists. Layer heights are the layer
    /// indices. Fails on the first empty layer.
    pub fn from_points(layers: Vec<Vec<PointF>>) -> Result<Self> {
        let layers = layers
            .into_iter()
            .enumerate()
            .map(|(index, points)| Layer::new(index, index as CoordF, points))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { layers })
    }

    /// Number of layers.
    #[inline]
    pub fn layer_count(&self) -> usize {
        self.layers.len()
    }

    /// Whether the cloud has no layers.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    /// All layers, in print order.
    #[inline]
    pub fn layers(&self) -> &[Layer] {
        &self.layers
    }

    /// Layer by index.
    #[inline]
    pub fn layer(&self, index: usize) -> Option<&Layer> {
        self.layers.get(index)
    }

    /// Total number of points over all layers.
    pub fn point_count(&self) -> usize {
        self.layers.iter().map(Layer::len).sum()
    }

    /// Bounds of every point in the cloud.
    pub fn bounds(&self) -> Option<(PointF, PointF)> {
        let corners: Vec<PointF> = self
            .layers
            .iter()
            .filter_map(|l| bounds(l.points()))
            .flat_map(|(min, max)| [min, max])
            .collect();
        bounds(&corners)
    }

    /// Whether `point` is exactly one of the printed points of `layer`.
    pub fn contains(&self, layer: usize, point: PointF) -> bool {
        self.layer(layer)
            .map(|l| l.points().contains(&point))
            .unwrap_or(false)
    }
}
