//! Extraction of per-layer printed points from G-code.
//!
//! Every extruding move contributes its start and end XY position to the
//! layer it is printed on. A new layer starts when material is deposited at
//! a Z above the current layer, so Z-hops during travel never open a layer
//! and layers without extrusion never appear.

use super::GCodeCommand;
use crate::geometry::PointF;
use crate::layer::{Layer, PointCloud};
use crate::{CoordF, Error, Result};
use log::{debug, info};
use std::fs;
use std::path::Path;

/// Minimum Z increase that opens a new layer (mm).
const LAYER_EPSILON: CoordF = 1e-6;

/// Incremental G-code interpreter collecting printed points per layer.
#[derive(Debug)]
pub struct LayerExtractor {
    absolute_positioning: bool,
    absolute_extrusion: bool,
    position: PointF,
    z: CoordF,
    e: CoordF,
    layers: Vec<(CoordF, Vec<PointF>)>,
}

impl Default for LayerExtractor {
    fn default() -> Self {
        Self {
            absolute_positioning: true,
            absolute_extrusion: true,
            position: PointF::zero(),
            z: 0.0,
            e: 0.0,
            layers: Vec::new(),
        }
    }
}

impl LayerExtractor {
    /// Create an extractor in the power-on state (absolute positioning and
    /// extrusion, at the origin).
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of layers collected so far.
    pub fn layer_count(&self) -> usize {
        self.layers.len()
    }

    /// Feed one command.
    pub fn apply(&mut self, cmd: &GCodeCommand) {
        match cmd {
            GCodeCommand::RapidMove { x, y, z, .. } => {
                self.move_to(*x, *y, *z);
            }
            GCodeCommand::LinearMove { x, y, z, e, .. } => {
                let start = self.position;
                self.move_to(*x, *y, *z);
                let Some(e) = *e else {
                    return;
                };
                let delta = if self.absolute_extrusion {
                    let d = e - self.e;
                    self.e = e;
                    d
                } else {
                    self.e += e;
                    e
                };
                if delta > 0.0 && start != self.position {
                    self.record_extrusion(start, self.position);
                }
            }
            GCodeCommand::Home { x, y, z } => {
                if *x {
                    self.position.x = 0.0;
                }
                if *y {
                    self.position.y = 0.0;
                }
                if *z {
                    self.z = 0.0;
                }
            }
            // G90/G91 switch every axis, E included; M82/M83 switch E alone.
            GCodeCommand::AbsolutePositioning => {
                self.absolute_positioning = true;
                self.absolute_extrusion = true;
            }
            GCodeCommand::RelativePositioning => {
                self.absolute_positioning = false;
                self.absolute_extrusion = false;
            }
            GCodeCommand::SetPosition { x, y, z, e } => {
                if let Some(v) = x {
                    self.position.x = *v;
                }
                if let Some(v) = y {
                    self.position.y = *v;
                }
                if let Some(v) = z {
                    self.z = *v;
                }
                if let Some(v) = e {
                    self.e = *v;
                }
            }
            GCodeCommand::AbsoluteExtrusion => self.absolute_extrusion = true,
            GCodeCommand::RelativeExtrusion => self.absolute_extrusion = false,
            GCodeCommand::Comment(_) | GCodeCommand::Raw(_) => {}
        }
    }

    fn move_to(&mut self, x: Option<CoordF>, y: Option<CoordF>, z: Option<CoordF>) {
        let resolve = |current: CoordF, value: Option<CoordF>, absolute: bool| match value {
            Some(v) if absolute => v,
            Some(v) => current + v,
            None => current,
        };
        self.position.x = resolve(self.position.x, x, self.absolute_positioning);
        self.position.y = resolve(self.position.y, y, self.absolute_positioning);
        self.z = resolve(self.z, z, self.absolute_positioning);
    }

    fn record_extrusion(&mut self, start: PointF, end: PointF) {
        let opens_layer = match self.layers.last() {
            Some((layer_z, _)) => self.z > layer_z + LAYER_EPSILON,
            None => true,
        };
        if opens_layer {
            debug!("Layer {} starts at z={:.3}", self.layers.len(), self.z);
            self.layers.push((self.z, Vec::new()));
        }
        if let Some((_, points)) = self.layers.last_mut() {
            if points.last() != Some(&start) {
                points.push(start);
            }
            points.push(end);
        }
    }

    /// Finish extraction and build the point cloud.
    pub fn finish(self) -> Result<PointCloud> {
        if self.layers.is_empty() {
            return Err(Error::GCode("no extruding moves found".into()));
        }
        let layers = self
            .layers
            .into_iter()
            .enumerate()
            .map(|(index, (z, points))| Layer::new(index, z, points))
            .collect::<Result<Vec<_>>>()?;
        Ok(PointCloud::new(layers))
    }
}

/// Parse G-code text into per-layer printed points.
pub fn parse_layers(text: &str) -> Result<PointCloud> {
    let mut extractor = LayerExtractor::new();
    for (number, line) in text.lines().enumerate() {
        let cmd = GCodeCommand::parse(line).map_err(|e| match e {
            Error::GCode(msg) => Error::GCode(format!("line {}: {}", number + 1, msg)),
            other => other,
        })?;
        if let Some(cmd) = cmd {
            extractor.apply(&cmd);
        }
    }
    extractor.finish()
}

/// Read and parse a G-code file.
pub fn load_point_cloud<P: AsRef<Path>>(path: P) -> Result<PointCloud> {
    let path = path.as_ref();
    let text = fs::read_to_string(path)?;
    let cloud = parse_layers(&text)?;
    info!(
        "Loaded {}: {} layers, {} printed points",
        path.display(),
        cloud.layer_count(),
        cloud.point_count()
    );
    Ok(cloud)
}
