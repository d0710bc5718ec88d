//! Output validation against the reference beamformer
//!
//! Floating-point comparison between a backend's output buffer and
//! the sequential oracle. A lane matches when it is within an
//! absolute tolerance (dominant near zero) or a relative tolerance
//! (dominant for large magnitudes); reduction order differs between
//! the tiled kernel and the oracle, so exact equality is not a
//! meaningful criterion.

use std::fmt;

use crate::observation::Observation;

// ============================================================================
// Tolerance
// ============================================================================

/// Acceptance thresholds for one lane comparison.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Tolerance {
    /// Absolute difference accepted regardless of magnitude.
    pub absolute: f32,
    /// Difference accepted relative to the larger magnitude.
    pub relative: f32,
}

impl Default for Tolerance {
    fn default() -> Self {
        // Single-precision station reductions reorder freely under
        // tiling; these bounds absorb that without masking real
        // indexing errors, which produce wildly different values.
        Self {
            absolute: 1.0e-4,
            relative: 1.0e-3,
        }
    }
}

impl Tolerance {
    /// True when `actual` is acceptably close to `expected`.
    pub fn matches(&self, expected: f32, actual: f32) -> bool {
        if expected == actual {
            return true;
        }
        if expected.is_nan() || actual.is_nan() {
            return false;
        }
        let diff = (expected - actual).abs();
        if diff <= self.absolute {
            return true;
        }
        diff / expected.abs().max(actual.abs()) <= self.relative
    }
}

// ============================================================================
// Comparison
// ============================================================================

/// One lane that failed the tolerance check.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Mismatch {
    pub index: usize,
    pub expected: f32,
    pub actual: f32,
}

/// Outcome of comparing one output buffer against the oracle.
#[derive(Debug, Clone, PartialEq)]
pub struct Comparison {
    /// Lanes actually compared (padded positions are skipped).
    pub compared: usize,
    pub matching: usize,
    /// First failing lane, if any.
    pub first_mismatch: Option<Mismatch>,
    /// Largest absolute difference over all compared lanes.
    pub max_abs_error: f32,
}

impl Comparison {
    pub fn passed(&self) -> bool {
        self.matching == self.compared
    }

    pub fn mismatches(&self) -> usize {
        self.compared - self.matching
    }

    pub fn match_percentage(&self) -> f64 {
        if self.compared == 0 {
            100.0
        } else {
            self.matching as f64 * 100.0 / self.compared as f64
        }
    }
}

impl fmt::Display for Comparison {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.passed() {
            write!(
                f,
                "{} lanes match (max abs error {:.3e})",
                self.compared, self.max_abs_error
            )
        } else {
            let m = self.first_mismatch.as_ref().ok_or(fmt::Error)?;
            write!(
                f,
                "{}/{} lanes match ({:.2}%), first mismatch at lane {}: expected {}, got {}",
                self.matching,
                self.compared,
                self.match_percentage(),
                m.index,
                m.expected,
                m.actual
            )
        }
    }
}

/// Compare a backend output buffer against the oracle's, lane by
/// lane, skipping the padded tail of the time axis. Padded positions
/// are scratch space and carry no defined value.
pub fn compare_output(
    obs: &Observation,
    expected: &[f32],
    actual: &[f32],
    tolerance: &Tolerance,
) -> Comparison {
    debug_assert_eq!(expected.len(), obs.output_len());
    debug_assert_eq!(actual.len(), obs.output_len());

    let mut comparison = Comparison {
        compared: 0,
        matching: 0,
        first_mismatch: None,
        max_abs_error: 0.0,
    };

    for beam in 0..obs.beams() {
        for channel in 0..obs.channels() {
            for sample in 0..obs.samples_per_second() {
                let base = obs.output_index(beam, channel, sample);
                for lane in 0..4 {
                    let index = base + lane;
                    let (e, a) = (expected[index], actual[index]);
                    comparison.compared += 1;
                    if tolerance.matches(e, a) {
                        comparison.matching += 1;
                    } else if comparison.first_mismatch.is_none() {
                        comparison.first_mismatch = Some(Mismatch {
                            index,
                            expected: e,
                            actual: a,
                        });
                    }
                    let diff = (e - a).abs();
                    if diff.is_finite() && diff > comparison.max_abs_error {
                        comparison.max_abs_error = diff;
                    }
                }
            }
        }
    }

    comparison
}

// ============================================================================
// Tests
// ============================================================================
