//! Observation descriptor and buffer layouts
//!
//! An [`Observation`] fixes the dimensions of one beamforming problem:
//! how many stations contribute, how many beams are formed, over how
//! many frequency channels and time samples. The time and beam axes
//! are padded up to an alignment quantum, and every memory-layout
//! formula in this crate goes through the index functions defined
//! here so that generated device code and the host reference agree on
//! addressing by construction.

use std::fmt;

use thiserror::Error;

// ============================================================================
// Output Mode
// ============================================================================

/// What the kernel stores per (beam, channel, sample) position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum OutputMode {
    /// Both complex polarization accumulators: (P0.re, P0.im, P1.re, P1.im).
    #[default]
    Raw,
    /// Total intensity I broadcast to all four lanes; only lane 0 is
    /// meaningful downstream.
    StokesI,
    /// The four Stokes parameters (I, Q, U, V).
    StokesIquv,
}

impl fmt::Display for OutputMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutputMode::Raw => write!(f, "raw"),
            OutputMode::StokesI => write!(f, "stokes-i"),
            OutputMode::StokesIquv => write!(f, "stokes-iquv"),
        }
    }
}

// ============================================================================
// Observation
// ============================================================================

/// Errors from constructing an [`Observation`].
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ObservationError {
    #[error("observation dimension `{name}` must be greater than zero")]
    ZeroDimension { name: &'static str },
}

/// Immutable description of one beamforming problem.
///
/// Constructed once from configuration input, read-only thereafter.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Observation {
    stations: usize,
    beams: usize,
    channels: usize,
    samples_per_second: usize,
    padding: usize,
    output_mode: OutputMode,
}

/// Round `value` up to the next multiple of `quantum`.
pub fn round_up(value: usize, quantum: usize) -> usize {
    value.div_ceil(quantum) * quantum
}

impl Observation {
    pub fn new(
        stations: usize,
        beams: usize,
        channels: usize,
        samples_per_second: usize,
        padding: usize,
        output_mode: OutputMode,
    ) -> Result<Self, ObservationError> {
        for (name, value) in [
            ("stations", stations),
            ("beams", beams),
            ("channels", channels),
            ("samples_per_second", samples_per_second),
            ("padding", padding),
        ] {
            if value == 0 {
                return Err(ObservationError::ZeroDimension { name });
            }
        }
        Ok(Self {
            stations,
            beams,
            channels,
            samples_per_second,
            padding,
            output_mode,
        })
    }

    pub fn stations(&self) -> usize {
        self.stations
    }
    pub fn beams(&self) -> usize {
        self.beams
    }
    pub fn channels(&self) -> usize {
        self.channels
    }
    pub fn samples_per_second(&self) -> usize {
        self.samples_per_second
    }
    pub fn padding(&self) -> usize {
        self.padding
    }
    pub fn output_mode(&self) -> OutputMode {
        self.output_mode
    }

    /// Time axis rounded up to the padding quantum. All sample
    /// addressing uses this extent, never the raw one.
    pub fn samples_per_padded_second(&self) -> usize {
        round_up(self.samples_per_second, self.padding)
    }

    /// Beam axis of the weights buffer rounded up to the padding quantum.
    pub fn padded_beams(&self) -> usize {
        round_up(self.beams, self.padding)
    }

    /// Averaging factor applied after the station reduction. Always
    /// derived from the unpadded station count.
    pub fn averaging_factor(&self) -> f32 {
        1.0 / self.stations as f32
    }

    // ------------------------------------------------------------------
    // Buffer layouts, in f32 lanes
    // ------------------------------------------------------------------

    /// Length of the samples buffer: samples[channel][station][padded_sample],
    /// four lanes per element (P0 re/im, P1 re/im).
    pub fn samples_len(&self) -> usize {
        self.channels * self.stations * self.samples_per_padded_second() * 4
    }

    /// Length of the weights buffer: weights[channel][station][padded_beam],
    /// two lanes per element (re, im).
    pub fn weights_len(&self) -> usize {
        self.channels * self.stations * self.padded_beams() * 2
    }

    /// Length of the output buffer: output[beam][channel][padded_sample],
    /// four lanes per element.
    pub fn output_len(&self) -> usize {
        self.beams * self.channels * self.samples_per_padded_second() * 4
    }

    /// Lane offset of samples[channel][station][sample].
    pub fn sample_index(&self, channel: usize, station: usize, sample: usize) -> usize {
        let spp = self.samples_per_padded_second();
        ((channel * self.stations * spp) + (station * spp) + sample) * 4
    }

    /// Lane offset of weights[channel][station][beam].
    pub fn weight_index(&self, channel: usize, station: usize, beam: usize) -> usize {
        let pb = self.padded_beams();
        ((channel * self.stations * pb) + (station * pb) + beam) * 2
    }

    /// Lane offset of output[beam][channel][sample].
    pub fn output_index(&self, beam: usize, channel: usize, sample: usize) -> usize {
        let spp = self.samples_per_padded_second();
        ((beam * self.channels * spp) + (channel * spp) + sample) * 4
    }
}

impl fmt::Display for Observation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} stations, {} beams, {} channels, {} samples/s (padding {}), {}",
            self.stations,
            self.beams,
            self.channels,
            self.samples_per_second,
            self.padding,
            self.output_mode
        )
    }
}

// ============================================================================
// Tests
// ============================================================================
