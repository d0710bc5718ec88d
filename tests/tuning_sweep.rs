//! End-to-end sweeps on the simulated backend
//!
//! Drives the full pipeline (enumerate, generate, compile, dispatch,
//! validate, report) over small observations where the expected
//! behavior can be stated exactly.

use beamtune::{
    beamform, compare_output, ComputeBackend, Configurations, Dtype, FailureKind, Observation,
    OutputMode, SearchBounds, SimulatedBackend, TilingConfig, Tolerance, TuningDriver,
    TuningOptions,
};

fn small_bounds() -> SearchBounds {
    SearchBounds {
        max_threads: 128,
        max_items: 2,
        ..SearchBounds::default()
    }
}

fn options() -> TuningOptions {
    TuningOptions {
        iterations: 4,
        bounds: small_bounds(),
        ..TuningOptions::default()
    }
}

/// Unit samples and unit weights through the raw pipeline: every
/// configuration must reproduce the analytic output (1, 0, 1, 0).
#[test]
fn unit_weights_raw_output_is_exact_for_every_configuration() {
    let obs = Observation::new(16, 4, 2, 64, 32, OutputMode::Raw).unwrap();
    let backend = SimulatedBackend::new();

    let mut samples = vec![0.0; obs.samples_len()];
    for chunk in samples.chunks_exact_mut(4) {
        chunk[0] = 1.0;
        chunk[2] = 1.0;
    }
    let mut weights = vec![0.0; obs.weights_len()];
    for chunk in weights.chunks_exact_mut(2) {
        chunk[0] = 1.0;
    }

    for tiling in Configurations::new(&obs, small_bounds()) {
        let source = beamtune::generate(&obs, &tiling, Dtype::F32);
        let handle = backend.compile(&source).unwrap();
        let mut output = vec![0.0; obs.output_len()];
        backend
            .dispatch(&handle, &obs, &samples, &weights, &mut output)
            .unwrap();

        for beam in 0..obs.beams() {
            for channel in 0..obs.channels() {
                for sample in 0..obs.samples_per_second() {
                    let out = obs.output_index(beam, channel, sample);
                    assert_eq!(
                        &output[out..out + 4],
                        &[1.0, 0.0, 1.0, 0.0],
                        "wrong value under {}",
                        tiling
                    );
                }
            }
        }
    }
}

/// The same unit inputs under Stokes I: both polarizations contribute
/// unit intensity, so every real position holds 2.0 in all lanes.
#[test]
fn unit_weights_stokes_i_is_two_everywhere() {
    let obs = Observation::new(8, 2, 1, 64, 32, OutputMode::StokesI).unwrap();
    let mut samples = vec![0.0; obs.samples_len()];
    for chunk in samples.chunks_exact_mut(4) {
        chunk[0] = 1.0;
        chunk[2] = 1.0;
    }
    let mut weights = vec![0.0; obs.weights_len()];
    for chunk in weights.chunks_exact_mut(2) {
        chunk[0] = 1.0;
    }

    let mut output = vec![0.0; obs.output_len()];
    beamform(&obs, &samples, &weights, &mut output);
    for beam in 0..obs.beams() {
        for sample in 0..obs.samples_per_second() {
            let out = obs.output_index(beam, 0, sample);
            assert_eq!(&output[out..out + 4], &[2.0, 2.0, 2.0, 2.0]);
        }
    }
}

/// A full sweep validates every configuration against the oracle and
/// agrees with it under the default tolerance.
#[test]
fn sweep_validates_all_configurations_against_oracle() {
    let obs = Observation::new(8, 4, 2, 64, 32, OutputMode::StokesIquv).unwrap();
    let backend = SimulatedBackend::new();
    let mut driver = TuningDriver::new(&backend, options());
    let report = driver.run(&obs);

    assert!(report.failures.is_empty());
    assert!(!report.measurements.is_empty());
    for m in &report.measurements {
        let cmp = m.comparison.as_ref().unwrap();
        assert!(cmp.passed(), "{} failed validation: {}", m.tiling, cmp);
    }

    let best = report.best().unwrap();
    assert!(best.gflops.mean() > 0.0);
    assert!(best.seconds.count() == 4);
}

/// Awkward beam count: 10 beams force the enumerator to skip every
/// group width that does not divide 10, and the sweep still succeeds.
#[test]
fn awkward_beam_count_sweeps_cleanly() {
    let obs = Observation::new(16, 10, 1, 64, 32, OutputMode::Raw).unwrap();
    let backend = SimulatedBackend::new();
    let mut driver = TuningDriver::new(&backend, options());
    let report = driver.run(&obs);

    assert!(report.failures.is_empty());
    for m in &report.measurements {
        assert_eq!(10 % m.tiling.beams_per_group(), 0, "bad tiling {}", m.tiling);
    }
    // 1, 2, 5 and 10 beams per group are the only divisors available.
    assert!(report
        .measurements
        .iter()
        .all(|m| [1, 2, 5, 10].contains(&m.tiling.beams_per_group())));
}

/// Backend rejections are recorded per configuration; the sweep keeps
/// going and still finds a best among the survivors.
#[test]
fn backend_failures_do_not_abort_the_sweep() {
    let obs = Observation::new(8, 4, 2, 64, 32, OutputMode::Raw).unwrap();
    let backend = SimulatedBackend::with_max_group_threads(64);
    let mut driver = TuningDriver::new(&backend, options());
    let report = driver.run(&obs);

    assert!(!report.failures.is_empty());
    assert!(!report.measurements.is_empty());
    for failure in &report.failures {
        assert!(matches!(failure.kind, FailureKind::Compile(_)));
        assert!(failure.tiling.group_threads() > 64);
    }
    assert!(report.best().is_some());

    let total = Configurations::new(&obs, small_bounds()).count();
    assert_eq!(report.measurements.len() + report.failures.len(), total);
}

/// The rendered report carries one record per measurement in the
/// columnar format, and repeated sweeps render identically apart from
/// the timing columns.
#[test]
fn rendered_report_matches_measurements() {
    let obs = Observation::new(8, 4, 1, 64, 32, OutputMode::Raw).unwrap();
    let backend = SimulatedBackend::new();
    let mut driver = TuningDriver::new(&backend, options());
    let report = driver.run(&obs);
    let text = report.render();

    let records: Vec<&str> = text
        .lines()
        .skip(1)
        .filter(|line| !line.is_empty())
        .collect();
    assert_eq!(records.len(), report.measurements.len());
    for (line, m) in records.iter().zip(&report.measurements) {
        let fields: Vec<&str> = line.split_whitespace().collect();
        assert_eq!(fields[4], m.tiling.samples_per_block.to_string());
        assert_eq!(fields[5], m.tiling.beams_per_block.to_string());
        assert_eq!(fields[6], m.tiling.samples_per_thread.to_string());
        assert_eq!(fields[7], m.tiling.beams_per_thread.to_string());
    }
}

/// A deliberately corrupted output fails the tolerance comparison the
/// driver applies, while an honest one passes.
#[test]
fn tolerance_comparison_detects_corruption() {
    let obs = Observation::new(4, 2, 1, 32, 32, OutputMode::Raw).unwrap();
    let samples: Vec<f32> = (0..obs.samples_len()).map(|i| (i % 11) as f32 * 0.1).collect();
    let weights: Vec<f32> = (0..obs.weights_len()).map(|i| (i % 5) as f32 * 0.3).collect();

    let mut expected = vec![0.0; obs.output_len()];
    beamform(&obs, &samples, &weights, &mut expected);

    let tolerance = Tolerance::default();
    let clean = compare_output(&obs, &expected, &expected, &tolerance);
    assert!(clean.passed());

    let mut corrupted = expected.clone();
    let victim = obs.output_index(1, 0, 7);
    corrupted[victim] += 1.0;
    let dirty = compare_output(&obs, &expected, &corrupted, &tolerance);
    assert!(!dirty.passed());
    assert_eq!(dirty.first_mismatch.unwrap().index, victim);
}

/// Double-precision sweeps run end to end; the generated source uses
/// the wide element type but weights stay single precision.
#[test]
fn double_precision_sweep_runs() {
    let obs = Observation::new(8, 2, 1, 64, 32, OutputMode::Raw).unwrap();
    let backend = SimulatedBackend::new();
    let mut driver = TuningDriver::new(
        &backend,
        TuningOptions {
            dtype: Dtype::F64,
            ..options()
        },
    );
    let report = driver.run(&obs);
    assert!(report.failures.is_empty());
    assert!(!report.measurements.is_empty());

    let tiling = TilingConfig::new(32, 1, 1, 1);
    let source = driver.source(&obs, &tiling).text.clone();
    assert!(source.contains("double4"));
    assert!(source.contains("float2"));
}
