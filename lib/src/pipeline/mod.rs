//! Pipeline module - drives a complete planning run.
//!
//! [`SnapshotPlanner`] is an explicit state machine:
//!
//! ```text
//! Init ──▶ Iterating ──▶ Finalizing ──▶ Terminated
//! ```
//!
//! - **Init** resolves each layer's target anchor against the layer's points
//!   and seeds the snapshot sequence with the result.
//! - **Iterating** alternates nearest-point resolution with optimizer steps.
//!   After a step the nearest sequence is stale and gets re-resolved before
//!   the next gradient evaluation, never earlier and never twice.
//! - **Finalizing** has one entry point shared by convergence, the iteration
//!   cap, interruption and fatal iteration errors. It runs exactly once per
//!   [`run`](SnapshotPlanner::run).
//!
//! # Example
//!
//! ```rust,ignore
//! use snapper::{CancelToken, PlanEvent, PlannerConfig, SnapshotPlanner};
//!
//! let mut planner = SnapshotPlanner::new(PlannerConfig::default())?;
//! let outcome = planner.run(&cloud, &CancelToken::new(), |event| {
//!     if let PlanEvent::Report { loss, .. } = event {
//!         println!("{}", loss);
//!     }
//! })?;
//! ```

mod cancel;

pub use cancel::CancelToken;

use crate::config::{PlannerConfig, Target};
use crate::geometry::PointF;
use crate::layer::PointCloud;
use crate::objective::evaluate;
use crate::objective::autodiff::AutodiffGradient;
use crate::objective::gradient::GradientProvider;
use crate::optim::{Adam, Optimizer};
use crate::persist::save_snapshots;
use crate::render::{Renderer, SvgAnimation};
use crate::search::NearestPointResolver;
use crate::{CoordF, Error, Result};
use log::{debug, error, info, warn};
use std::fmt;

/// Controller state, observable between and after runs.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PlannerState {
    Init,
    Iterating,
    Finalizing,
    Terminated,
}

impl fmt::Display for PlannerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PlannerState::Init => "init",
            PlannerState::Iterating => "iterating",
            PlannerState::Finalizing => "finalizing",
            PlannerState::Terminated => "terminated",
        };
        f.write_str(name)
    }
}

/// Why the iteration loop stopped.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Termination {
    /// The loss changed by less than the tolerance between two iterations.
    Converged,
    /// The cancel token fired.
    Interrupted,
    /// The configured iteration cap was reached.
    MaxIterations,
}

impl fmt::Display for Termination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Termination::Converged => "converged",
            Termination::Interrupted => "interrupted",
            Termination::MaxIterations => "iteration limit reached",
        };
        f.write_str(name)
    }
}

/// Progress notifications emitted during [`SnapshotPlanner::run`].
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum PlanEvent {
    /// The initial pairing is resolved; loss of the seed sequence.
    Initialized { loss: CoordF },
    /// Periodic loss report, every `report_every` iterations.
    Report { iteration: usize, loss: CoordF },
    /// An iteration finished without converging. `iteration` is the number
    /// of iterations completed so far.
    Progress { iteration: usize },
    /// Loss of the final (possibly snapped) sequence.
    Finalized { loss: CoordF },
}

/// Result of a planning run.
#[derive(Clone, Debug)]
pub struct PlanOutcome {
    /// One snapshot per layer.
    pub snapshots: Vec<PointF>,
    /// Nearest printed point of each snapshot's layer.
    pub nearest: Vec<PointF>,
    pub initial_loss: CoordF,
    pub final_loss: CoordF,
    /// Number of optimizer steps applied.
    pub iterations: usize,
    pub termination: Termination,
}

/// Sequences owned by a single run.
struct Sequences<S> {
    targets: Vec<Target>,
    /// Last snapshot sequence that has a resolved nearest sequence.
    snapshots: Vec<PointF>,
    nearest: Vec<PointF>,
    optimizer: S,
    /// The optimizer has moved past `snapshots`.
    stale: bool,
}

/// Plans one snapshot point per layer by gradient descent.
///
/// Generic over the gradient provider and the optimizer; [`new`](Self::new)
/// uses the burn autodiff gradient with burn's Adam.
pub struct SnapshotPlanner<G = AutodiffGradient, O = Adam> {
    config: PlannerConfig,
    resolver: NearestPointResolver,
    gradient: G,
    optimizer: O,
    renderer: Option<Box<dyn Renderer>>,
    state: PlannerState,
}

impl SnapshotPlanner {
    /// Create a planner with the autodiff gradient and Adam.
    pub fn new(config: PlannerConfig) -> Result<Self> {
        let optimizer = Adam::new(config.learning_rate);
        Self::with_parts(config, AutodiffGradient::new(), optimizer)
    }
}

impl<G, O> SnapshotPlanner<G, O>
where
    G: GradientProvider,
    O: Optimizer,
{
    /// Create a planner with a custom gradient provider and optimizer.
    pub fn with_parts(config: PlannerConfig, gradient: G, optimizer: O) -> Result<Self> {
        config.validate()?;
        let resolver = NearestPointResolver::new(&config.search)?;
        let renderer: Option<Box<dyn Renderer>> = if config.render_dir.is_some() {
            Some(Box::new(SvgAnimation::new()))
        } else {
            None
        };
        Ok(Self {
            config,
            resolver,
            gradient,
            optimizer,
            renderer,
            state: PlannerState::Init,
        })
    }

    /// Builder method: replace the renderer. Nothing is rendered unless a
    /// render directory is configured.
    pub fn with_renderer(mut self, renderer: Box<dyn Renderer>) -> Self {
        self.renderer = Some(renderer);
        self
    }

    /// Current controller state.
    pub fn state(&self) -> PlannerState {
        self.state
    }

    /// Get the configuration.
    pub fn config(&self) -> &PlannerConfig {
        &self.config
    }

    /// Run the planner to termination.
    ///
    /// `cancel` is checked at every iteration boundary and while waiting on
    /// nearest-point searches. Interruption is not an error: the run still
    /// finalizes, persists and reports. A fatal error during iteration is
    /// returned after finalization has completed.
    pub fn run<F>(
        &mut self,
        cloud: &PointCloud,
        cancel: &CancelToken,
        mut on_event: F,
    ) -> Result<PlanOutcome>
    where
        F: FnMut(PlanEvent),
    {
        self.state = PlannerState::Init;
        info!(
            "Planning {} layers ({} printed points)",
            cloud.layer_count(),
            cloud.point_count()
        );
        let mut seq = self.initialize(cloud, cancel)?;
        let initial_loss = evaluate(&seq.snapshots, &seq.targets, &seq.nearest);
        self.render("start", &seq)?;
        on_event(PlanEvent::Initialized { loss: initial_loss });

        self.state = PlannerState::Iterating;
        let (iterations, stopped) = self.iterate(cloud, cancel, &mut seq, &mut on_event);

        self.state = PlannerState::Finalizing;
        let finalized = self.finalize(cloud, &stopped, &mut seq, &mut on_event);
        self.state = PlannerState::Terminated;

        let termination = match (stopped, finalized) {
            (Err(e), Err(finalize_error)) => {
                error!("Finalization after a failed iteration also failed: {}", finalize_error);
                return Err(e);
            }
            (Err(e), Ok(_)) => return Err(e),
            (Ok(_), Err(e)) => return Err(e),
            (Ok(termination), Ok(_)) => termination,
        };
        let final_loss = evaluate(&seq.snapshots, &seq.targets, &seq.nearest);
        info!("Finished: {} after {} iterations", termination, iterations);

        Ok(PlanOutcome {
            snapshots: seq.snapshots,
            nearest: seq.nearest,
            initial_loss,
            final_loss,
            iterations,
            termination,
        })
    }

    fn initialize(&self, cloud: &PointCloud, cancel: &CancelToken) -> Result<Sequences<O::State>> {
        if cloud.is_empty() {
            return Err(Error::Config("Point cloud has no layers".into()));
        }
        let targets = vec![self.config.target; cloud.layer_count()];
        let anchors: Vec<PointF> = targets.iter().map(Target::anchor).collect();
        debug!("Resolving initial pairing against target {}", self.config.target);
        let nearest = self.resolver.resolve_batch(&anchors, cloud, Some(cancel))?;
        let snapshots = nearest.clone();
        let optimizer = self.optimizer.init(&snapshots);
        Ok(Sequences {
            targets,
            snapshots,
            nearest,
            optimizer,
            stale: false,
        })
    }

    /// Iterate until convergence, the iteration cap, interruption or a fatal
    /// error. Returns the number of optimizer steps applied.
    fn iterate<F>(
        &self,
        cloud: &PointCloud,
        cancel: &CancelToken,
        seq: &mut Sequences<O::State>,
        on_event: &mut F,
    ) -> (usize, Result<Termination>)
    where
        F: FnMut(PlanEvent),
    {
        let mut iteration = 0;
        let mut previous_loss = 0.0;
        loop {
            if cancel.is_cancelled() {
                info!("Interrupted after {} iterations", iteration);
                return (iteration, Ok(Termination::Interrupted));
            }
            if self.config.max_iterations.is_some_and(|max| iteration >= max) {
                info!("Stopping at iteration limit ({})", iteration);
                return (iteration, Ok(Termination::MaxIterations));
            }

            if seq.stale {
                match self.refresh(cloud, Some(cancel), seq) {
                    Ok(()) => {}
                    Err(Error::Cancelled) => {
                        info!("Interrupted while resolving iteration {}", iteration);
                        return (iteration, Ok(Termination::Interrupted));
                    }
                    Err(e) => {
                        error!("Iteration {} failed: {}", iteration, e);
                        return (iteration, Err(e));
                    }
                }
            }

            let (loss, gradient) =
                self.gradient
                    .value_and_gradient(&seq.snapshots, &seq.targets, &seq.nearest);
            self.optimizer.step(iteration, &gradient, &mut seq.optimizer);
            seq.stale = true;

            if iteration % self.config.report_every == 0 {
                on_event(PlanEvent::Report { iteration, loss });
            }
            if (loss - previous_loss).abs() < self.config.tolerance {
                info!("Converged at iteration {} (loss {:.6})", iteration, loss);
                return (iteration + 1, Ok(Termination::Converged));
            }

            iteration += 1;
            on_event(PlanEvent::Progress { iteration });
            previous_loss = loss;
        }
    }

    fn finalize<F>(
        &mut self,
        cloud: &PointCloud,
        stopped: &Result<Termination>,
        seq: &mut Sequences<O::State>,
        on_event: &mut F,
    ) -> Result<()>
    where
        F: FnMut(PlanEvent),
    {
        // Work may still be in flight after an interruption or failure.
        if !matches!(
            stopped,
            Ok(Termination::Converged) | Ok(Termination::MaxIterations)
        ) {
            self.resolver.rebuild()?;
        }
        if seq.stale {
            self.refresh(cloud, None, seq)?;
        }
        if self.config.snap_to_print {
            debug!("Snapping {} snapshots onto the print", seq.snapshots.len());
            seq.snapshots.clone_from(&seq.nearest);
        }
        if let Some(path) = &self.config.state_path {
            save_snapshots(path, &seq.snapshots)?;
        }

        let loss = evaluate(&seq.snapshots, &seq.targets, &seq.nearest);
        on_event(PlanEvent::Finalized { loss });

        self.render("end", seq)
    }

    /// Pair the optimizer's current parameters with freshly resolved nearest
    /// points. Nothing is committed unless the whole batch completes.
    fn refresh(
        &self,
        cloud: &PointCloud,
        cancel: Option<&CancelToken>,
        seq: &mut Sequences<O::State>,
    ) -> Result<()> {
        let snapshots = self.optimizer.extract(&seq.optimizer);
        let nearest = self.resolver.resolve_batch(&snapshots, cloud, cancel)?;
        seq.snapshots = snapshots;
        seq.nearest = nearest;
        seq.stale = false;
        Ok(())
    }

    fn render(&self, name: &str, seq: &Sequences<O::State>) -> Result<()> {
        let (Some(renderer), Some(dir)) = (&self.renderer, &self.config.render_dir) else {
            return Ok(());
        };
        let path = dir.join(format!("{}.{}", name, renderer.extension()));
        match renderer.render_animation(&seq.snapshots, &seq.nearest, &path) {
            Ok(()) => {
                info!("Rendered {}", path.display());
                Ok(())
            }
            Err(e) => {
                warn!("Failed to render {}: {}", path.display(), e);
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::objective::gradient::{AnalyticGradient, FiniteDifference};
    use crate::persist::load_snapshots;
    use crate::search::Fault;
    use approx::{assert_abs_diff_eq, assert_relative_eq};
    use std::path::{Path, PathBuf};
    use std::sync::{Arc, Mutex};
    use std::time::{Duration, Instant};

    fn p(x: f64, y: f64) -> PointF {
        PointF::new(x, y)
    }

    fn scenario_a() -> PointCloud {
        PointCloud::from_points(vec![
            vec![p(0.0, 0.0), p(10.0, 10.0)],
            vec![p(5.0, 5.0), p(15.0, 15.0)],
            vec![p(20.0, 20.0)],
        ])
        .unwrap()
    }

    fn config() -> PlannerConfig {
        PlannerConfig::new().learning_rate(0.5).threads(2)
    }

    fn temp_dir(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("snapper-pipeline-{}-{}", name, std::process::id()))
    }

    /// Records render calls instead of writing files.
    struct Recorder(Arc<Mutex<Vec<PathBuf>>>);

    impl Renderer for Recorder {
        fn render_animation(&self, _: &[PointF], _: &[PointF], path: &Path) -> Result<()> {
            self.0.lock().unwrap().push(path.to_path_buf());
            Ok(())
        }

        fn extension(&self) -> &'static str {
            "rec"
        }
    }

    #[test]
    fn test_initial_pairing_without_target() {
        let mut planner = SnapshotPlanner::new(config().max_iterations(Some(0))).unwrap();
        assert_eq!(planner.state(), PlannerState::Init);

        let outcome = planner.run(&scenario_a(), &CancelToken::new(), |_| {}).unwrap();

        // absent targets query (-1, -1)
        assert_eq!(outcome.nearest, vec![p(0.0, 0.0), p(5.0, 5.0), p(20.0, 20.0)]);
        assert_eq!(outcome.snapshots, outcome.nearest);
        assert_eq!(outcome.iterations, 0);
        assert_eq!(outcome.termination, Termination::MaxIterations);
        // continuity 50 + 450 over 10 degrees of freedom
        assert_relative_eq!(outcome.initial_loss, 50.0);
        assert_relative_eq!(outcome.final_loss, 50.0);
        assert_eq!(planner.state(), PlannerState::Terminated);
    }

    #[test]
    fn test_loss_decreases() {
        let mut planner = SnapshotPlanner::new(config().max_iterations(Some(200))).unwrap();
        let outcome = planner.run(&scenario_a(), &CancelToken::new(), |_| {}).unwrap();
        assert!(outcome.final_loss < outcome.initial_loss);
        assert_eq!(outcome.snapshots.len(), 3);
    }

    #[test]
    fn test_event_sequence() {
        let mut planner = SnapshotPlanner::new(config().max_iterations(Some(5))).unwrap();
        let mut events = Vec::new();
        let outcome = planner
            .run(&scenario_a(), &CancelToken::new(), |e| events.push(e))
            .unwrap();

        assert!(matches!(events.first(), Some(PlanEvent::Initialized { .. })));
        assert!(matches!(events.last(), Some(PlanEvent::Finalized { .. })));
        let reports: Vec<_> = events
            .iter()
            .filter_map(|e| match e {
                PlanEvent::Report { iteration, .. } => Some(*iteration),
                _ => None,
            })
            .collect();
        assert_eq!(reports, vec![0]);
        let progress = events
            .iter()
            .filter(|e| matches!(e, PlanEvent::Progress { .. }))
            .count();
        assert_eq!(progress, outcome.iterations);
        assert_eq!(outcome.iterations, 5);
    }

    #[test]
    fn test_converges_on_trivial_cloud() {
        let cloud = PointCloud::from_points(vec![vec![p(3.0, 4.0)]]).unwrap();
        let mut planner = SnapshotPlanner::new(config()).unwrap();
        let outcome = planner.run(&cloud, &CancelToken::new(), |_| {}).unwrap();

        assert_eq!(outcome.termination, Termination::Converged);
        assert_eq!(outcome.iterations, 1);
        assert_eq!(outcome.snapshots, vec![p(3.0, 4.0)]);
        assert_eq!(outcome.final_loss, 0.0);
    }

    #[test]
    fn test_interrupted_run_still_finalizes() {
        let dir = temp_dir("interrupt");
        let state = dir.join("points.json");
        let mut planner = SnapshotPlanner::new(config().state_path(Some(state.clone()))).unwrap();
        let cancel = CancelToken::new();
        cancel.cancel();

        let mut finalized = false;
        let outcome = planner
            .run(&scenario_a(), &cancel, |e| {
                finalized |= matches!(e, PlanEvent::Finalized { .. })
            })
            .unwrap_or_else(|e| panic!("interrupted run failed: {}", e));

        assert!(finalized);
        assert_eq!(outcome.termination, Termination::Interrupted);
        assert_eq!(outcome.iterations, 0);
        assert_eq!(load_snapshots(&state).unwrap(), outcome.snapshots);
        assert_eq!(planner.state(), PlannerState::Terminated);
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_interrupt_mid_run() {
        let mut planner = SnapshotPlanner::new(config()).unwrap();
        let cancel = CancelToken::new();
        let trigger = cancel.clone();
        let outcome = planner
            .run(&scenario_a(), &cancel, |e| {
                if e == (PlanEvent::Progress { iteration: 3 }) {
                    trigger.cancel();
                }
            })
            .unwrap();

        assert_eq!(outcome.termination, Termination::Interrupted);
        assert_eq!(outcome.iterations, 3);
        // the final pair is consistent: nearest was resolved for these snapshots
        let cloud = scenario_a();
        for (i, (s, n)) in outcome.snapshots.iter().zip(&outcome.nearest).enumerate() {
            let layer = cloud.layer(i).unwrap();
            let expected = planner.resolver.resolve(*s, layer.points()).unwrap();
            assert_eq!(*n, expected);
        }
    }

    #[test]
    fn test_snap_to_print() {
        let mut planner =
            SnapshotPlanner::new(config().snap_to_print(true).max_iterations(Some(25))).unwrap();
        let cloud = scenario_a();
        let outcome = planner.run(&cloud, &CancelToken::new(), |_| {}).unwrap();

        assert_eq!(outcome.snapshots, outcome.nearest);
        for (i, s) in outcome.snapshots.iter().enumerate() {
            assert!(cloud.contains(i, *s), "layer {} snapshot {} not printed", i, s);
        }
    }

    #[test]
    fn test_renders_start_and_end() {
        let dir = temp_dir("render");
        let calls = Arc::new(Mutex::new(Vec::new()));
        let mut planner = SnapshotPlanner::new(
            config()
                .render_dir(Some(dir.clone()))
                .max_iterations(Some(2)),
        )
        .unwrap()
        .with_renderer(Box::new(Recorder(calls.clone())));

        planner.run(&scenario_a(), &CancelToken::new(), |_| {}).unwrap();

        let calls = calls.lock().unwrap();
        assert_eq!(*calls, vec![dir.join("start.rec"), dir.join("end.rec")]);
    }

    #[test]
    fn test_no_render_dir_means_no_rendering() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let mut planner = SnapshotPlanner::new(config().max_iterations(Some(1)))
            .unwrap()
            .with_renderer(Box::new(Recorder(calls.clone())));
        planner.run(&scenario_a(), &CancelToken::new(), |_| {}).unwrap();
        assert!(calls.lock().unwrap().is_empty());
    }

    #[test]
    fn test_empty_cloud_is_rejected() {
        let mut planner = SnapshotPlanner::new(config()).unwrap();
        let result = planner.run(&PointCloud::new(Vec::new()), &CancelToken::new(), |_| {});
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_finite_difference_planner() {
        let cfg = config().max_iterations(Some(20));
        let mut planner =
            SnapshotPlanner::with_parts(cfg, FiniteDifference::standard(), Adam::new(0.5)).unwrap();
        let outcome = planner.run(&scenario_a(), &CancelToken::new(), |_| {}).unwrap();
        assert!(outcome.final_loss < outcome.initial_loss);
    }

    #[test]
    fn test_autodiff_follows_closed_form_gradient() {
        let cfg = config().max_iterations(Some(30));
        let mut autodiff = SnapshotPlanner::new(cfg.clone()).unwrap();
        let mut analytic =
            SnapshotPlanner::with_parts(cfg, AnalyticGradient, Adam::new(0.5)).unwrap();

        let a = autodiff.run(&scenario_a(), &CancelToken::new(), |_| {}).unwrap();
        let b = analytic.run(&scenario_a(), &CancelToken::new(), |_| {}).unwrap();

        assert_eq!(a.iterations, b.iterations);
        assert_eq!(a.nearest, b.nearest);
        for (x, y) in a.snapshots.iter().zip(&b.snapshots) {
            assert_abs_diff_eq!(x.x, y.x, epsilon = 1e-9);
            assert_abs_diff_eq!(x.y, y.y, epsilon = 1e-9);
        }
    }

    #[test]
    fn test_worker_failure_still_finalizes() {
        let dir = temp_dir("worker");
        let state = dir.join("points.json");
        let calls = Arc::new(Mutex::new(Vec::new()));
        let mut planner = SnapshotPlanner::new(
            config()
                .state_path(Some(state.clone()))
                .render_dir(Some(dir.clone())),
        )
        .unwrap()
        .with_renderer(Box::new(Recorder(calls.clone())));
        // batch 0 is the initial pairing, batch 1 the refresh of iteration 1
        planner.resolver.inject_fault(1, Fault::Panic);

        let mut events = Vec::new();
        let result = planner.run(&scenario_a(), &CancelToken::new(), |e| events.push(e));

        assert!(
            matches!(result, Err(Error::Worker { layer: 0 })),
            "unexpected result {:?}",
            result
        );
        assert_eq!(planner.state(), PlannerState::Terminated);
        assert!(matches!(events.last(), Some(PlanEvent::Finalized { .. })));
        assert_eq!(load_snapshots(&state).unwrap().len(), 3);
        assert_eq!(
            *calls.lock().unwrap(),
            vec![dir.join("start.rec"), dir.join("end.rec")]
        );
        assert!(planner.resolver.is_running());
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_cancel_during_batch_from_another_thread() {
        let mut planner = SnapshotPlanner::new(config()).unwrap();
        planner
            .resolver
            .inject_fault(1, Fault::Stall(Duration::from_secs(5)));
        let cancel = CancelToken::new();
        let trigger = cancel.clone();
        let mut canceller = None;

        let started = Instant::now();
        let outcome = planner
            .run(&scenario_a(), &cancel, |e| {
                if e == (PlanEvent::Progress { iteration: 1 }) {
                    let trigger = trigger.clone();
                    canceller = Some(std::thread::spawn(move || {
                        std::thread::sleep(Duration::from_millis(50));
                        trigger.cancel();
                    }));
                }
            })
            .unwrap();
        if let Some(handle) = canceller {
            handle.join().unwrap();
        }

        assert_eq!(outcome.termination, Termination::Interrupted);
        assert_eq!(outcome.iterations, 1);
        assert!(started.elapsed() < Duration::from_secs(4));
        let cloud = scenario_a();
        for (i, (s, n)) in outcome.snapshots.iter().zip(&outcome.nearest).enumerate() {
            let layer = cloud.layer(i).unwrap();
            assert_eq!(*n, planner.resolver.resolve(*s, layer.points()).unwrap());
        }
    }

    #[test]
    fn test_invalid_config() {
        assert!(SnapshotPlanner::new(PlannerConfig::new().learning_rate(0.0)).is_err());
    }
}
