//! Compute backends
//!
//! [`ComputeBackend`] is the seam between the tuning driver and
//! whatever executes a generated kernel. Compilation and dispatch can
//! each fail per configuration; the driver treats both as data points
//! rather than fatal errors, so everything here reports through
//! [`BackendError`] instead of panicking.
//!
//! [`SimulatedBackend`] is the host-side device used by tests and by
//! sweeps on machines without an accelerator: it produces the oracle's
//! output bit-for-bit and deterministic synthetic timings, and it can
//! be configured to reject configurations above a group-size limit
//! the way a real device driver would.

use std::cell::Cell;
use std::time::Duration;

use thiserror::Error;

use crate::generator::KernelSource;
use crate::observation::Observation;
use crate::reference;

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug, Clone, Error, PartialEq)]
pub enum BackendError {
    #[error("kernel `{kernel}` failed to compile: {reason}")]
    CompileFailed { kernel: String, reason: String },

    #[error("invalid launch geometry: {reason}")]
    InvalidLaunch { reason: String },

    #[error("dispatch of `{kernel}` failed: {reason}")]
    DispatchFailed { kernel: String, reason: String },
}

// ============================================================================
// Backend trait
// ============================================================================

/// A compiled kernel, ready for dispatch on the backend that built it.
#[derive(Debug, Clone)]
pub struct KernelHandle {
    source: KernelSource,
}

impl KernelHandle {
    pub fn name(&self) -> &str {
        &self.source.name
    }

    pub fn global(&self) -> [usize; 3] {
        self.source.global
    }

    pub fn local(&self) -> [usize; 3] {
        self.source.local
    }
}

/// Executes generated kernels and reports per-dispatch elapsed time.
pub trait ComputeBackend {
    fn name(&self) -> &str;

    fn compile(&self, source: &KernelSource) -> Result<KernelHandle, BackendError>;

    /// Run one dispatch, writing the beamformed output and returning
    /// the elapsed kernel time.
    fn dispatch(
        &self,
        handle: &KernelHandle,
        obs: &Observation,
        samples: &[f32],
        weights: &[f32],
        output: &mut [f32],
    ) -> Result<Duration, BackendError>;
}

/// Reject geometry no device would accept: zero extents or a global
/// size the local size does not divide.
fn validate_launch(source: &KernelSource) -> Result<(), BackendError> {
    for dim in 0..3 {
        if source.global[dim] == 0 || source.local[dim] == 0 {
            return Err(BackendError::InvalidLaunch {
                reason: format!("zero extent in dimension {}", dim),
            });
        }
        if source.global[dim] % source.local[dim] != 0 {
            return Err(BackendError::InvalidLaunch {
                reason: format!(
                    "global extent {} not divisible by local extent {} in dimension {}",
                    source.global[dim], source.local[dim], dim
                ),
            });
        }
    }
    Ok(())
}

// ============================================================================
// Simulated backend
// ============================================================================

/// Host-side backend: executes the reference reduction and fabricates
/// deterministic timings from the dispatch's work volume.
#[derive(Debug)]
pub struct SimulatedBackend {
    /// Compilation rejects work-groups larger than this, mimicking a
    /// device limit.
    max_group_threads: usize,
    /// Nominal cost of one reduction flop.
    seconds_per_flop: f64,
    /// Monotonic dispatch counter driving the timing jitter sequence.
    clock: Cell<u64>,
}

impl Default for SimulatedBackend {
    fn default() -> Self {
        Self {
            max_group_threads: 1024,
            seconds_per_flop: 1.0e-11,
            clock: Cell::new(0),
        }
    }
}

impl SimulatedBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lower the simulated device's group-size limit. Configurations
    /// above it fail to compile, which exercises the driver's
    /// record-and-continue path.
    pub fn with_max_group_threads(max_group_threads: usize) -> Self {
        Self {
            max_group_threads,
            ..Self::default()
        }
    }

    /// Deterministic multiplicative jitter in [1.0, 1.125), advanced
    /// per dispatch. SplitMix-style bit mix of the dispatch counter.
    fn jitter(&self) -> f64 {
        let tick = self.clock.get();
        self.clock.set(tick + 1);
        let mut z = tick.wrapping_add(0x9E37_79B9_7F4A_7C15);
        z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
        z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
        1.0 + ((z >> 61) as f64) / 64.0
    }
}

impl ComputeBackend for SimulatedBackend {
    fn name(&self) -> &str {
        "simulated"
    }

    fn compile(&self, source: &KernelSource) -> Result<KernelHandle, BackendError> {
        validate_launch(source)?;
        let group = source.local[0] * source.local[1] * source.local[2];
        if group > self.max_group_threads {
            return Err(BackendError::CompileFailed {
                kernel: source.name.clone(),
                reason: format!(
                    "work-group size {} exceeds device limit {}",
                    group, self.max_group_threads
                ),
            });
        }
        Ok(KernelHandle {
            source: source.clone(),
        })
    }

    fn dispatch(
        &self,
        handle: &KernelHandle,
        obs: &Observation,
        samples: &[f32],
        weights: &[f32],
        output: &mut [f32],
    ) -> Result<Duration, BackendError> {
        if samples.len() != obs.samples_len()
            || weights.len() != obs.weights_len()
            || output.len() != obs.output_len()
        {
            return Err(BackendError::DispatchFailed {
                kernel: handle.name().to_string(),
                reason: "buffer lengths do not match the observation layout".to_string(),
            });
        }

        reference::beamform(obs, samples, weights, output);

        // Volume-proportional nominal time; small groups pay a fixed
        // scheduling overhead per thread so sweeps have a real
        // optimum to find.
        let flops = (obs.channels() * obs.samples_per_second() * obs.beams() * obs.stations())
            as f64
            * 16.0;
        let group = (handle.local()[0] * handle.local()[1]) as f64;
        let nominal = flops * self.seconds_per_flop * (1.0 + 8.0 / group);
        Ok(Duration::from_secs_f64(nominal * self.jitter()))
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generator::generate;
    use crate::ir::Dtype;
    use crate::observation::OutputMode;
    use crate::tiling::TilingConfig;

    fn problem() -> (Observation, KernelSource) {
        let obs = Observation::new(4, 2, 1, 64, 32, OutputMode::Raw).unwrap();
        let source = generate(&obs, &TilingConfig::new(32, 1, 1, 1), Dtype::F32);
        (obs, source)
    }

    #[test]
    fn test_compile_then_dispatch_matches_reference() {
        let (obs, source) = problem();
        let backend = SimulatedBackend::new();
        let handle = backend.compile(&source).unwrap();

        let samples: Vec<f32> = (0..obs.samples_len()).map(|i| (i % 9) as f32 - 4.0).collect();
        let weights: Vec<f32> = (0..obs.weights_len()).map(|i| (i % 3) as f32 * 0.5).collect();

        let mut actual = vec![0.0; obs.output_len()];
        let elapsed = backend
            .dispatch(&handle, &obs, &samples, &weights, &mut actual)
            .unwrap();
        assert!(elapsed > Duration::ZERO);

        let mut expected = vec![0.0; obs.output_len()];
        reference::beamform(&obs, &samples, &weights, &mut expected);
        assert_eq!(actual, expected);
    }

    #[test]
    fn test_group_size_limit_fails_compilation() {
        let (_, source) = problem();
        let backend = SimulatedBackend::with_max_group_threads(16);
        let err = backend.compile(&source).unwrap_err();
        assert!(matches!(err, BackendError::CompileFailed { .. }));
    }

    #[test]
    fn test_invalid_launch_rejected() {
        let (_, mut source) = problem();
        source.global[0] = 33;
        let err = SimulatedBackend::new().compile(&source).unwrap_err();
        assert!(matches!(err, BackendError::InvalidLaunch { .. }));
    }

    #[test]
    fn test_mis_sized_buffers_rejected() {
        let (obs, source) = problem();
        let backend = SimulatedBackend::new();
        let handle = backend.compile(&source).unwrap();
        let samples = vec![0.0; obs.samples_len() - 1];
        let weights = vec![0.0; obs.weights_len()];
        let mut output = vec![0.0; obs.output_len()];
        let err = backend
            .dispatch(&handle, &obs, &samples, &weights, &mut output)
            .unwrap_err();
        assert!(matches!(err, BackendError::DispatchFailed { .. }));
    }

    #[test]
    fn test_timing_is_deterministic_per_sequence() {
        let (obs, source) = problem();
        let samples = vec![1.0; obs.samples_len()];
        let weights = vec![1.0; obs.weights_len()];

        let run = || {
            let backend = SimulatedBackend::new();
            let handle = backend.compile(&source).unwrap();
            let mut output = vec![0.0; obs.output_len()];
            (0..4)
                .map(|_| {
                    backend
                        .dispatch(&handle, &obs, &samples, &weights, &mut output)
                        .unwrap()
                })
                .collect::<Vec<_>>()
        };
        assert_eq!(run(), run());
    }
}
