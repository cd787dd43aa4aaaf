//! Planner configuration types.
//!
//! This module provides the configuration for a planning run: the target
//! constraint, post-processing, optimizer settings, convergence criteria and
//! the nearest-point search pools.

use super::Target;
use crate::{CoordF, Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

/// Settings for the parallel nearest-point search.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    /// Candidates per chunk at every split level. Collections of at most
    /// this size are scanned directly.
    pub chunk_size: usize,

    /// Threads in the per-layer pool (0 = one per CPU).
    pub layer_threads: usize,

    /// Threads in the within-layer fan-out pool (0 = one per CPU).
    pub search_threads: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            chunk_size: 2,
            layer_threads: 0,
            search_threads: 0,
        }
    }
}

/// Main planner configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct PlannerConfig {
    // === Constraints ===
    /// Fixed point the snapshots are pulled towards.
    pub target: Target,
    /// Collapse every snapshot onto its nearest printed point once optimization ends.
    pub snap_to_print: bool,

    // === Optimizer ===
    /// Adam step size (mm per iteration, roughly).
    pub learning_rate: CoordF,
    /// Stop once the loss changes by less than this between iterations.
    pub tolerance: CoordF,
    /// Hard iteration cap. `None` runs until convergence or interruption.
    pub max_iterations: Option<usize>,
    /// Report the loss every this many iterations.
    pub report_every: usize,

    // === Outputs ===
    /// Directory receiving `start.svg` and `end.svg`. `None` disables rendering.
    pub render_dir: Option<PathBuf>,
    /// File receiving the final snapshot sequence. `None` disables persistence.
    pub state_path: Option<PathBuf>,

    // === Search ===
    pub search: SearchConfig,
}

impl PlannerConfig {
    /// Create a new PlannerConfig with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a configuration from a JSON file. Missing fields take their defaults.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = fs::read_to_string(path.as_ref())?;
        let config: PlannerConfig = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    /// Builder method: set the target.
    pub fn target(mut self, target: Target) -> Self {
        self.target = target;
        self
    }

    /// Builder method: enable/disable snap to print.
    pub fn snap_to_print(mut self, enabled: bool) -> Self {
        self.snap_to_print = enabled;
        self
    }

    /// Builder method: set the optimizer step size.
    pub fn learning_rate(mut self, rate: CoordF) -> Self {
        self.learning_rate = rate;
        self
    }

    /// Builder method: set the convergence tolerance.
    pub fn tolerance(mut self, tolerance: CoordF) -> Self {
        self.tolerance = tolerance;
        self
    }

    /// Builder method: cap the number of iterations.
    pub fn max_iterations(mut self, max: Option<usize>) -> Self {
        self.max_iterations = max;
        self
    }

    /// Builder method: set the render output directory.
    pub fn render_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.render_dir = dir;
        self
    }

    /// Builder method: set the state file path.
    pub fn state_path(mut self, path: Option<PathBuf>) -> Self {
        self.state_path = path;
        self
    }

    /// Builder method: set the resolver chunk size.
    pub fn chunk_size(mut self, size: usize) -> Self {
        self.search.chunk_size = size;
        self
    }

    /// Builder method: set both pool sizes.
    pub fn threads(mut self, threads: usize) -> Self {
        self.search.layer_threads = threads;
        self.search.search_threads = threads;
        self
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if !(self.learning_rate > 0.0 && self.learning_rate.is_finite()) {
            return Err(Error::Config("Learning rate must be positive".into()));
        }
        if !(self.tolerance >= 0.0) {
            return Err(Error::Config("Tolerance must not be negative".into()));
        }
        if self.report_every == 0 {
            return Err(Error::Config("Report interval must be at least 1".into()));
        }
        if self.search.chunk_size < 2 {
            return Err(Error::Config("Chunk size must be at least 2".into()));
        }
        Ok(())
    }
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            // Constraints
            target: Target::Absent,
            snap_to_print: false,

            // Optimizer
            learning_rate: 1.0,
            tolerance: 1e-5,
            max_iterations: None,
            report_every: 10,

            // Outputs
            render_dir: None,
            state_path: None,

            search: SearchConfig::default(),
        }
    }
}

impl fmt::Display for PlannerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "PlannerConfig(target={}, snap={}, lr={}, tol={:e})",
            self.target, self.snap_to_print, self.learning_rate, self.tolerance
        )
    }
}
