//! # Snapper
//!
//! Plans where a timelapse camera snapshot should be taken on every layer of
//! a 3D print.
//!
//! For each layer the planner picks one XY coordinate that:
//! - stays close to material actually printed on that layer
//! - moves smoothly from one layer's snapshot to the next
//! - optionally stays near a fixed target position on the build plate
//!
//! The problem is solved by first-order gradient descent, differentiated and
//! stepped on burn's autodiff CPU backend. The "nearest point in the print"
//! term depends on the moving snapshot coordinates, so it is re-resolved
//! every iteration with a parallel divide-and-conquer search.
//!
//! ## Example
//!
//! ```rust,ignore
//! use snapper::{load_point_cloud, CancelToken, PlannerConfig, SnapshotPlanner};
//!
//! let cloud = load_point_cloud("benchy.gcode")?;
//! let config = PlannerConfig::new().snap_to_print(true);
//! let mut planner = SnapshotPlanner::new(config)?;
//! let outcome = planner.run(&cloud, &CancelToken::new(), |_| {})?;
//! println!("final loss: {}", outcome.final_loss);
//! ```

pub mod config;
pub mod gcode;
pub mod geometry;
pub mod layer;
pub mod objective;
pub mod optim;
pub mod persist;
pub mod pipeline;
pub mod render;
pub mod search;
pub mod tensor;

pub use config::{Axis, PlannerConfig, SearchConfig, Target};
pub use gcode::{load_point_cloud, parse_layers, GCodeCommand};
pub use geometry::PointF;
pub use layer::{Layer, PointCloud};
pub use objective::autodiff::AutodiffGradient;
pub use objective::gradient::{AnalyticGradient, FiniteDifference, GradientProvider};
pub use objective::{evaluate, ObjectiveTerms};
pub use optim::{Adam, AdamState, Optimizer};
pub use persist::{load_snapshots, save_snapshots, SnapshotFile};
pub use pipeline::{
    CancelToken, PlanEvent, PlanOutcome, PlannerState, SnapshotPlanner, Termination,
};
pub use render::{Renderer, SvgAnimation};
pub use search::{Candidate, NearestPointResolver, TaskHandle, WorkerPool};
pub use tensor::PlannerBackend;

/// Floating-point coordinate type, in millimetres on the build plate.
pub type CoordF = f64;

/// Result type used throughout the planner.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for planner operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("G-code error: {0}")]
    GCode(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("nearest-point search called with no candidates")]
    EmptyCandidates,

    #[error("layer {0} has no printed points")]
    EmptyLayer(usize),

    #[error("sequence length mismatch: expected {expected}, got {actual}")]
    LengthMismatch { expected: usize, actual: usize },

    #[error("worker pool error: {0}")]
    Pool(String),

    #[error("worker task for layer {layer} failed to deliver a result")]
    Worker { layer: usize },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Cancelled")]
    Cancelled,
}

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
