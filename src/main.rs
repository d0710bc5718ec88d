//! Beamformer autotuner CLI
//!
//! Main entry point for the `beamtune` command.

use clap::{Parser, ValueEnum};
use miette::{IntoDiagnostic, Result};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use beamtune::backend::SimulatedBackend;
use beamtune::driver::{TuningDriver, TuningOptions};
use beamtune::ir::Dtype;
use beamtune::observation::{Observation, OutputMode};
use beamtune::tiling::{Configurations, SearchBounds, TilingConfig};
use beamtune::validation::Tolerance;

#[derive(Parser)]
#[command(name = "beamtune")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(
    about = "Autotuner for generated beamforming kernels",
    long_about = "Enumerates the feasible tiling space of a beamforming observation, \
generates a kernel per configuration, measures each one on a backend and reports \
throughput with the best configuration highlighted."
)]
struct Cli {
    /// Number of stations
    #[arg(long, default_value = "64")]
    stations: usize,

    /// Number of beams to form
    #[arg(long, default_value = "32")]
    beams: usize,

    /// Number of frequency channels
    #[arg(long, default_value = "64")]
    channels: usize,

    /// Time samples per second of observation
    #[arg(long, default_value = "768")]
    samples: usize,

    /// Alignment quantum for the time and beam axes
    #[arg(long, default_value = "32")]
    padding: usize,

    /// What the kernel stores per output position
    #[arg(long, value_enum, default_value = "raw")]
    mode: Mode,

    /// Backend to measure on
    #[arg(long, default_value = "simulated")]
    device: String,

    /// Generate double-precision kernels
    #[arg(long)]
    double: bool,

    /// Timed dispatches per configuration
    #[arg(short, long, default_value = "8")]
    iterations: usize,

    /// Smallest work-group extent along the sample axis
    #[arg(long, default_value = "32")]
    min_threads: usize,

    /// Largest work-group size to consider
    #[arg(long, default_value = "1024")]
    max_threads: usize,

    /// Largest per-thread accumulation count along either axis
    #[arg(long, default_value = "8")]
    max_items: usize,

    /// Work-group sizes must be a multiple of this
    #[arg(long, default_value = "32")]
    granularity: usize,

    /// Step for the sample-axis block extent (0 = step by min-threads)
    #[arg(long, default_value = "0")]
    thread_increment: usize,

    /// Accumulator-register budget per thread, in items
    #[arg(long, default_value = "64")]
    max_registers: usize,

    /// Measure only this samples-per-block value (with --bb, --st, --bt)
    #[arg(long)]
    sb: Option<usize>,

    /// Measure only this beams-per-block value
    #[arg(long)]
    bb: Option<usize>,

    /// Measure only this samples-per-thread value
    #[arg(long)]
    st: Option<usize>,

    /// Measure only this beams-per-thread value
    #[arg(long)]
    bt: Option<usize>,

    /// Print the generated source of every measured kernel
    #[arg(long)]
    print: bool,

    /// Fill input buffers from the seeded pseudo-random stream
    #[arg(long)]
    random: bool,

    /// Skip the oracle comparison
    #[arg(long)]
    no_validate: bool,
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Mode {
    /// Both complex polarizations
    Raw,
    /// Total intensity
    StokesI,
    /// All four Stokes parameters
    StokesIquv,
}

impl From<Mode> for OutputMode {
    fn from(mode: Mode) -> OutputMode {
        match mode {
            Mode::Raw => OutputMode::Raw,
            Mode::StokesI => OutputMode::StokesI,
            Mode::StokesIquv => OutputMode::StokesIquv,
        }
    }
}

fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    let obs = Observation::new(
        cli.stations,
        cli.beams,
        cli.channels,
        cli.samples,
        cli.padding,
        cli.mode.into(),
    )
    .into_diagnostic()?;

    let bounds = SearchBounds {
        min_threads: cli.min_threads,
        max_threads: cli.max_threads,
        max_items: cli.max_items,
        thread_granularity: cli.granularity,
        thread_increment: cli.thread_increment,
        max_registers: cli.max_registers,
    };
    if let Err(reason) = bounds.validate() {
        miette::bail!("invalid search bounds: {}", reason);
    }

    let fixed = match (cli.sb, cli.bb, cli.st, cli.bt) {
        (Some(sb), Some(bb), Some(st), Some(bt)) => Some(TilingConfig::new(sb, bb, st, bt)),
        (None, None, None, None) => None,
        _ => miette::bail!("--sb, --bb, --st and --bt must be given together"),
    };
    if let Some(tiling) = &fixed {
        if !tiling.is_feasible(&obs, &bounds) {
            miette::bail!("configuration {} is not feasible for this observation", tiling);
        }
    }

    let options = TuningOptions {
        iterations: cli.iterations,
        bounds: bounds.clone(),
        dtype: if cli.double { Dtype::F64 } else { Dtype::F32 },
        validate: !cli.no_validate,
        tolerance: Tolerance::default(),
        random_data: cli.random,
    };

    if cli.device != "simulated" {
        miette::bail!("unknown device `{}`; available: simulated", cli.device);
    }
    let backend = SimulatedBackend::new();
    let mut driver = TuningDriver::new(&backend, options);

    if cli.print {
        let tilings: Vec<_> = match fixed {
            Some(tiling) => vec![tiling],
            None => Configurations::new(&obs, bounds).collect(),
        };
        for tiling in &tilings {
            println!("// {}", tiling);
            println!("{}", driver.source(&obs, tiling).text);
        }
    }

    let report = match fixed {
        Some(tiling) => driver.run_single(&obs, tiling),
        None => driver.run(&obs),
    };

    if report.measurements.is_empty() {
        if let Some(failure) = report.failures.first() {
            miette::bail!("configuration {} failed: {}", failure.tiling, failure.kind);
        }
        miette::bail!("no feasible configuration within the search bounds");
    }

    print!("{}", report.render());
    Ok(())
}
