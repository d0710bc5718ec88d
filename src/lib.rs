//! Beamformer kernel autotuner
//!
//! Generates OpenCL-C beamforming kernels over a tiling search space,
//! measures every feasible configuration on a compute backend and
//! reports the best one, with every result checked against a
//! sequential oracle.
//!
//! # Architecture
//!
//! ```text
//! Observation → Configurations → generate → ComputeBackend → TuningReport
//!                                               │
//!                                 reference::beamform (oracle)
//! ```
//!
//! An [`observation::Observation`] fixes the problem dimensions and
//! buffer layouts. [`tiling::Configurations`] enumerates the feasible
//! tiling space, [`generator::generate`] maps each point to kernel
//! source via the typed tree in [`ir`], and [`driver::TuningDriver`]
//! sweeps the space on a [`backend::ComputeBackend`], validating
//! outputs with [`validation`] and aggregating timings with [`stats`].

pub mod backend;
pub mod driver;
pub mod generator;
pub mod ir;
pub mod observation;
pub mod reference;
pub mod stats;
pub mod tiling;
pub mod validation;

// Problem description
pub use observation::{Observation, ObservationError, OutputMode};

// Search space
pub use tiling::{Configurations, SearchBounds, TilingConfig};

// Code generation
pub use generator::{generate, kernel_cost, KernelCost, KernelSource};
pub use ir::Dtype;

// Execution
pub use backend::{BackendError, ComputeBackend, KernelHandle, SimulatedBackend};

// Tuning
pub use driver::{
    Failure, FailureKind, Measurement, TuningDriver, TuningOptions, TuningReport,
};
pub use stats::RunningStats;

// Correctness
pub use reference::beamform;
pub use validation::{compare_output, Comparison, Mismatch, Tolerance};
