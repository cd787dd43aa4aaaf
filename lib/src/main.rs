//! Snapper CLI - Command-line interface for the snapper library
//!
//! Usage:
//!   snapper-cli plan <input.gcode> [options]
//!   snapper-cli plan <input.gcode> --target-x 75 --snap-to-print
//!   snapper-cli plan <input.gcode> --config planner.json
//!   snapper-cli info <input.gcode>
//!   snapper-cli show <points.json>

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use log::{info, LevelFilter};
use snapper::{
    load_point_cloud, load_snapshots, CancelToken, PlanEvent, PlannerConfig, SnapshotPlanner,
    Target, Termination,
};
use std::path::PathBuf;
use std::time::Duration;

/// Plans timelapse snapshot positions for every layer of a 3D print
#[derive(Parser, Debug)]
#[command(name = "snapper-cli")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Enable debug output
    #[arg(short, long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Optimize snapshot points for a G-code file
    Plan(PlanArgs),

    /// Display per-layer information about a G-code file
    Info {
        /// Input G-code file
        #[arg(value_name = "INPUT")]
        input: PathBuf,
    },

    /// Print a saved snapshot sequence
    Show {
        /// State file written by `plan`
        #[arg(value_name = "STATE")]
        state: PathBuf,
    },
}

#[derive(Args, Debug)]
struct PlanArgs {
    /// Input G-code file
    #[arg(value_name = "INPUT")]
    input: PathBuf,

    /// Planner configuration file (JSON format); flags override it
    #[arg(short, long, value_name = "CONFIG")]
    config: Option<PathBuf>,

    /// Move every snapshot onto the nearest printed point at the end
    #[arg(long)]
    snap_to_print: bool,

    /// Target X coordinate in mm (blank or -1 for none)
    #[arg(long, value_name = "X", allow_hyphen_values = true)]
    target_x: Option<String>,

    /// Target Y coordinate in mm (blank or -1 for none)
    #[arg(long, value_name = "Y", allow_hyphen_values = true)]
    target_y: Option<String>,

    /// Directory for start/end animations (default: current directory)
    #[arg(short, long, value_name = "DIR")]
    output_dir: Option<PathBuf>,

    /// Skip rendering animations
    #[arg(long)]
    no_render: bool,

    /// File receiving the final snapshot sequence (default: points.json)
    #[arg(short, long, value_name = "FILE")]
    state: Option<PathBuf>,

    /// Optimizer step size
    #[arg(long)]
    learning_rate: Option<f64>,

    /// Convergence tolerance on the loss change between iterations
    #[arg(long)]
    tolerance: Option<f64>,

    /// Stop after this many iterations
    #[arg(long)]
    max_iterations: Option<usize>,

    /// Candidates per chunk in the nearest-point search
    #[arg(long)]
    chunk_size: Option<usize>,

    /// Number of threads per worker pool (0 = auto)
    #[arg(short = 'j', long)]
    threads: Option<usize>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Set up logging
    let log_level = if cli.debug {
        LevelFilter::Debug
    } else if cli.verbose {
        LevelFilter::Info
    } else {
        LevelFilter::Warn
    };

    env_logger::Builder::new()
        .filter_level(log_level)
        .format_timestamp(None)
        .init();

    match cli.command {
        Commands::Plan(args) => cmd_plan(args),
        Commands::Info { input } => cmd_info(input),
        Commands::Show { state } => cmd_show(state),
    }
}

/// Merge the config file (if any) with command-line overrides.
fn build_config(args: &PlanArgs) -> Result<PlannerConfig> {
    let mut config = match &args.config {
        Some(path) => {
            info!("Loading planner config from: {}", path.display());
            PlannerConfig::from_file(path).context("Failed to load planner config file")?
        }
        None => PlannerConfig::default(),
    };

    if args.target_x.is_some() || args.target_y.is_some() {
        config.target = Target::from_input(args.target_x.as_deref(), args.target_y.as_deref());
    }
    if args.snap_to_print {
        config.snap_to_print = true;
    }
    if let Some(rate) = args.learning_rate {
        config.learning_rate = rate;
    }
    if let Some(tolerance) = args.tolerance {
        config.tolerance = tolerance;
    }
    if args.max_iterations.is_some() {
        config.max_iterations = args.max_iterations;
    }
    if let Some(size) = args.chunk_size {
        config.search.chunk_size = size;
    }
    if let Some(threads) = args.threads {
        config = config.threads(threads);
    }

    config.render_dir = if args.no_render {
        None
    } else {
        args.output_dir
            .clone()
            .or(config.render_dir)
            .or_else(|| Some(PathBuf::from(".")))
    };
    config.state_path = args
        .state
        .clone()
        .or(config.state_path)
        .or_else(|| Some(PathBuf::from("points.json")));

    config.validate().context("Invalid planner configuration")?;
    Ok(config)
}

fn cmd_plan(args: PlanArgs) -> Result<()> {
    let config = build_config(&args)?;
    info!("Planner configuration:\n{}", config);

    info!("Loading G-code file: {}", args.input.display());
    let cloud = load_point_cloud(&args.input).context("Failed to load G-code file")?;
    info!(
        "  {} layers, {} printed points",
        cloud.layer_count(),
        cloud.point_count()
    );

    let cancel = CancelToken::new();
    let handler_token = cancel.clone();
    ctrlc::set_handler(move || {
        handler_token.cancel();
    })
    .context("Failed to install Ctrl-C handler")?;

    let state_path = config.state_path.clone();
    let mut planner = SnapshotPlanner::new(config).context("Failed to start planner")?;

    let progress = ProgressBar::new_spinner();
    progress.set_style(
        ProgressStyle::with_template("{spinner:.green} [{elapsed_precise}] {pos} iterations {msg}")
            .context("Invalid progress template")?,
    );
    progress.enable_steady_tick(Duration::from_millis(100));
    progress.set_message("resolving initial points...");

    let outcome = planner.run(&cloud, &cancel, |event| match event {
        PlanEvent::Initialized { loss } => {
            progress.println(format!("Initial loss: {}", loss));
            progress.println("");
            progress.set_message("optimizing (Ctrl-C to stop early)");
        }
        PlanEvent::Report { loss, .. } => progress.println(format!("{}", loss)),
        PlanEvent::Progress { iteration } => progress.set_position(iteration as u64),
        PlanEvent::Finalized { .. } => progress.set_message("finalizing..."),
    });
    progress.finish_and_clear();
    let outcome = outcome.context("Planning failed")?;

    if outcome.termination == Termination::Interrupted {
        println!("Interrupted after {} iterations", outcome.iterations);
    }
    println!("{}", outcome.final_loss);
    println!();
    println!("✓ Finished ({})", outcome.termination);
    println!("  Layers: {}", outcome.snapshots.len());
    println!("  Iterations: {}", outcome.iterations);
    println!(
        "  Loss: {:.6} -> {:.6}",
        outcome.initial_loss, outcome.final_loss
    );
    if let Some(path) = state_path {
        println!("  Snapshots: {}", path.display());
    }

    Ok(())
}

fn cmd_info(input: PathBuf) -> Result<()> {
    info!("Loading G-code file: {}", input.display());
    let cloud = load_point_cloud(&input).context("Failed to load G-code file")?;

    println!("Print Information:");
    println!("  File: {}", input.display());
    println!("  Layers: {}", cloud.layer_count());
    println!("  Printed points: {}", cloud.point_count());
    if let Some((min, max)) = cloud.bounds() {
        println!("  Bounding box:");
        println!("    Min: ({:.3}, {:.3})", min.x, min.y);
        println!("    Max: ({:.3}, {:.3})", max.x, max.y);
    }
    println!();
    println!("  {:>6}  {:>9}  {:>8}", "Layer", "Z (mm)", "Points");
    for layer in cloud.layers() {
        println!("  {:>6}  {:>9.3}  {:>8}", layer.index, layer.z, layer.len());
    }

    Ok(())
}

fn cmd_show(state: PathBuf) -> Result<()> {
    let snapshots = load_snapshots(&state)
        .with_context(|| format!("Failed to read state file {}", state.display()))?;

    println!("Snapshots ({} layers):", snapshots.len());
    println!("{:-<40}", "");
    for (layer, p) in snapshots.iter().enumerate() {
        println!("  {:>6}  ({:.3}, {:.3})", layer, p.x, p.y);
    }

    Ok(())
}
