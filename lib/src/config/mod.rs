//! Configuration module.
//!
//! - [`PlannerConfig`] - optimization, output and search settings
//! - [`SearchConfig`] - worker pool sizes and the resolver's chunk size
//! - [`Target`] - the optional fixed point snapshots are pulled towards

mod planner_config;
mod target;

pub use planner_config::{PlannerConfig, SearchConfig};
pub use target::{parse_axis, Axis, Target, SENTINEL};
