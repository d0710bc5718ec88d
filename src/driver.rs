//! Autotuning driver
//!
//! Walks the feasible tiling space for one observation, measures every
//! configuration on a backend, and collects the results into a
//! [`TuningReport`]. A configuration that fails to compile, dispatch
//! or validate is recorded and skipped; a sweep only aborts if the
//! caller's setup was wrong, never because one point in the space was.
//!
//! Each surviving configuration is dispatched once untimed to warm the
//! backend (and to produce the buffer checked against the oracle),
//! then `iterations` timed dispatches feed the throughput and time
//! statistics.

use std::fmt;

use rustc_hash::FxHashMap;
use tracing::{debug, info, warn};

use crate::backend::{BackendError, ComputeBackend};
use crate::generator::{generate, kernel_cost, KernelCost, KernelSource};
use crate::ir::Dtype;
use crate::observation::Observation;
use crate::reference;
use crate::stats::RunningStats;
use crate::tiling::{Configurations, SearchBounds, TilingConfig};
use crate::validation::{compare_output, Comparison, Tolerance};

// ============================================================================
// Options
// ============================================================================

/// Sweep parameters, fixed for the duration of one run.
#[derive(Debug, Clone)]
pub struct TuningOptions {
    /// Timed dispatches per configuration, after one warm-up.
    pub iterations: usize,
    pub bounds: SearchBounds,
    pub dtype: Dtype,
    /// Compare every configuration's warm-up output against the
    /// sequential oracle.
    pub validate: bool,
    pub tolerance: Tolerance,
    /// Fill input buffers from the seeded pseudo-random stream
    /// instead of the fixed ramp pattern.
    pub random_data: bool,
}

impl Default for TuningOptions {
    fn default() -> Self {
        Self {
            iterations: 8,
            bounds: SearchBounds::default(),
            dtype: Dtype::F32,
            validate: true,
            tolerance: Tolerance::default(),
            random_data: false,
        }
    }
}

// ============================================================================
// Results
// ============================================================================

/// Timing and throughput record for one surviving configuration.
#[derive(Debug, Clone)]
pub struct Measurement {
    pub tiling: TilingConfig,
    pub cost: KernelCost,
    /// GFLOP/s over the timed dispatches.
    pub gflops: RunningStats,
    /// GB/s over the timed dispatches.
    pub gbs: RunningStats,
    /// Elapsed seconds per dispatch.
    pub seconds: RunningStats,
    /// Oracle comparison of the warm-up output, when validation ran.
    pub comparison: Option<Comparison>,
}

/// Why a configuration produced no measurement.
#[derive(Debug, Clone)]
pub enum FailureKind {
    Compile(BackendError),
    Dispatch(BackendError),
    Validation(Comparison),
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureKind::Compile(err) => write!(f, "{}", err),
            FailureKind::Dispatch(err) => write!(f, "{}", err),
            FailureKind::Validation(cmp) => write!(f, "output mismatch: {}", cmp),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Failure {
    pub tiling: TilingConfig,
    pub kind: FailureKind,
}

/// Everything one sweep produced.
#[derive(Debug, Clone)]
pub struct TuningReport {
    pub observation: Observation,
    pub measurements: Vec<Measurement>,
    pub failures: Vec<Failure>,
}

impl TuningReport {
    /// The measurement with the highest mean throughput.
    pub fn best(&self) -> Option<&Measurement> {
        self.measurements.iter().max_by(|a, b| {
            a.gflops
                .mean()
                .partial_cmp(&b.gflops.mean())
                .unwrap_or(std::cmp::Ordering::Equal)
        })
    }

    /// Render the sweep as the columnar report format: one commented
    /// header line, one line per measurement, and a blank separator
    /// line whenever the sample-block extent (the outer sweep
    /// dimension) changes.
    pub fn render(&self) -> String {
        use std::fmt::Write;

        let obs = &self.observation;
        let mut out = String::from(
            "# stations beams samples channels samplesPerBlock beamsPerBlock \
             samplesPerThread beamsPerThread GFLOP/s std.dev. time std.dev.\n",
        );
        let mut previous_block = None;
        for m in &self.measurements {
            if previous_block.is_some_and(|sb| sb != m.tiling.samples_per_block) {
                out.push('\n');
            }
            previous_block = Some(m.tiling.samples_per_block);
            writeln!(
                out,
                "{} {} {} {} {} {} {} {} {:.3} {:.3} {:.6} {:.6}",
                obs.stations(),
                obs.beams(),
                obs.samples_per_second(),
                obs.channels(),
                m.tiling.samples_per_block,
                m.tiling.beams_per_block,
                m.tiling.samples_per_thread,
                m.tiling.beams_per_thread,
                m.gflops.mean(),
                m.gflops.std_dev(),
                m.seconds.mean(),
                m.seconds.std_dev(),
            )
            .ok();
        }
        out
    }
}

// ============================================================================
// Input synthesis
// ============================================================================

/// Fill a buffer with reproducible input data. The pseudo-random
/// stream is a fixed-seed drand48-style linear congruential sequence
/// mapped to [-1, 1); the patterned stream is a short ramp. Both are
/// identical across runs and platforms.
pub fn synthesize_buffer(len: usize, random: bool) -> Vec<f32> {
    if random {
        let mut state: u64 = 42;
        (0..len)
            .map(|_| {
                state = state
                    .wrapping_mul(0x0005_DEEC_E66D)
                    .wrapping_add(0xB)
                    & 0xFFFF_FFFF_FFFF;
                (state as f64 / 281_474_976_710_656.0 * 2.0 - 1.0) as f32
            })
            .collect()
    } else {
        (0..len).map(|i| ((i % 7) as f32 - 3.0) * 0.25).collect()
    }
}

// ============================================================================
// Driver
// ============================================================================

/// Sweeps the tiling space of one observation on one backend.
pub struct TuningDriver<'a, B: ComputeBackend> {
    backend: &'a B,
    options: TuningOptions,
    /// Generated source keyed by (observation, tiling); the same
    /// tiling generates different text and extents for different
    /// problem dimensions.
    source_cache: FxHashMap<(Observation, TilingConfig), KernelSource>,
}

impl<'a, B: ComputeBackend> TuningDriver<'a, B> {
    pub fn new(backend: &'a B, options: TuningOptions) -> Self {
        Self {
            backend,
            options,
            source_cache: FxHashMap::default(),
        }
    }

    pub fn options(&self) -> &TuningOptions {
        &self.options
    }

    /// Run one full sweep.
    pub fn run(&mut self, obs: &Observation) -> TuningReport {
        let tilings: Vec<_> = Configurations::new(obs, self.options.bounds.clone()).collect();
        self.run_over(obs, tilings)
    }

    /// Measure a single, caller-chosen configuration. The tiling must
    /// already be feasible for this observation.
    pub fn run_single(&mut self, obs: &Observation, tiling: TilingConfig) -> TuningReport {
        self.run_over(obs, vec![tiling])
    }

    fn run_over(&mut self, obs: &Observation, tilings: Vec<TilingConfig>) -> TuningReport {
        let samples = synthesize_buffer(obs.samples_len(), self.options.random_data);
        let weights = synthesize_buffer(obs.weights_len(), self.options.random_data);

        let expected = self.options.validate.then(|| {
            let mut out = vec![0.0; obs.output_len()];
            reference::beamform(obs, &samples, &weights, &mut out);
            out
        });

        let mut report = TuningReport {
            observation: obs.clone(),
            measurements: Vec::new(),
            failures: Vec::new(),
        };

        info!(backend = self.backend.name(), observation = %obs, "starting sweep");

        for tiling in tilings {
            match self.measure(obs, &tiling, &samples, &weights, expected.as_deref()) {
                Ok(measurement) => {
                    debug!(
                        tiling = %tiling,
                        gflops = measurement.gflops.mean(),
                        "measured configuration"
                    );
                    report.measurements.push(measurement);
                }
                Err(kind) => {
                    warn!(tiling = %tiling, reason = %kind, "configuration skipped");
                    report.failures.push(Failure { tiling, kind });
                }
            }
        }

        if let Some(best) = report.best() {
            info!(
                tiling = %best.tiling,
                gflops = best.gflops.mean(),
                gbs = best.gbs.mean(),
                cv = best.gflops.coefficient_of_variation(),
                intensity = best.cost.arithmetic_intensity(),
                "best configuration"
            );
        } else {
            warn!("sweep produced no successful measurement");
        }

        report
    }

    /// Generated source for one tiling, cached.
    pub fn source(&mut self, obs: &Observation, tiling: &TilingConfig) -> &KernelSource {
        let dtype = self.options.dtype;
        self.source_cache
            .entry((obs.clone(), *tiling))
            .or_insert_with(|| generate(obs, tiling, dtype))
    }

    fn measure(
        &mut self,
        obs: &Observation,
        tiling: &TilingConfig,
        samples: &[f32],
        weights: &[f32],
        expected: Option<&[f32]>,
    ) -> Result<Measurement, FailureKind> {
        let dtype = self.options.dtype;
        let source = self
            .source_cache
            .entry((obs.clone(), *tiling))
            .or_insert_with(|| generate(obs, tiling, dtype))
            .clone();

        let handle = self
            .backend
            .compile(&source)
            .map_err(FailureKind::Compile)?;

        let mut output = vec![0.0; obs.output_len()];

        // Warm-up dispatch, untimed; its output feeds validation.
        self.backend
            .dispatch(&handle, obs, samples, weights, &mut output)
            .map_err(FailureKind::Dispatch)?;

        let comparison = match expected {
            Some(expected) => {
                let cmp = compare_output(obs, expected, &output, &self.options.tolerance);
                if !cmp.passed() {
                    return Err(FailureKind::Validation(cmp));
                }
                Some(cmp)
            }
            None => None,
        };

        let cost = kernel_cost(obs, tiling);
        let mut measurement = Measurement {
            tiling: *tiling,
            cost,
            gflops: RunningStats::new(),
            gbs: RunningStats::new(),
            seconds: RunningStats::new(),
            comparison,
        };

        for _ in 0..self.options.iterations {
            let elapsed = self
                .backend
                .dispatch(&handle, obs, samples, weights, &mut output)
                .map_err(FailureKind::Dispatch)?;
            let secs = elapsed.as_secs_f64();
            measurement.gflops.push(cost.gflops(secs));
            measurement.gbs.push(cost.gbs(secs));
            measurement.seconds.push(secs);
        }

        Ok(measurement)
    }
}

// ============================================================================
// Tests
// ============================================================================
