//! Sequential reference beamformer
//!
//! The correctness oracle: a plain host-side reduction over the
//! [`Observation`] dimensions. The autotuning driver compares every
//! backend result against this output, so the index arithmetic here
//! and in the generated kernel source must match exactly — any
//! divergence between the two is a correctness bug by definition.

use crate::observation::{Observation, OutputMode};

/// Run the sequential beamforming reduction.
///
/// For each (beam, channel, sample) position the two polarization
/// accumulators are the station sums of `sample * weight` under the
/// complex product `(x.re*w.re - x.im*w.im, x.re*w.im + x.im*w.re)`,
/// averaged by the unpadded station count, then transformed per the
/// observation's output mode.
///
/// Only the unpadded `samples_per_second` positions are written; the
/// padded tail of `output` is left untouched.
///
/// # Panics
///
/// Panics if any buffer length does not match the observation's
/// layout. Mis-sized buffers are a programming-contract violation,
/// not a runtime condition to recover from.
pub fn beamform(obs: &Observation, samples: &[f32], weights: &[f32], output: &mut [f32]) {
    assert_eq!(samples.len(), obs.samples_len(), "samples buffer size");
    assert_eq!(weights.len(), obs.weights_len(), "weights buffer size");
    assert_eq!(output.len(), obs.output_len(), "output buffer size");

    let factor = obs.averaging_factor();

    for beam in 0..obs.beams() {
        for channel in 0..obs.channels() {
            for sample in 0..obs.samples_per_second() {
                let mut p0 = (0.0f32, 0.0f32);
                let mut p1 = (0.0f32, 0.0f32);

                for station in 0..obs.stations() {
                    let s = obs.sample_index(channel, station, sample);
                    let w = obs.weight_index(channel, station, beam);
                    let (w_re, w_im) = (weights[w], weights[w + 1]);

                    p0.0 += (samples[s] * w_re) - (samples[s + 1] * w_im);
                    p0.1 += (samples[s] * w_im) + (samples[s + 1] * w_re);
                    p1.0 += (samples[s + 2] * w_re) - (samples[s + 3] * w_im);
                    p1.1 += (samples[s + 2] * w_im) + (samples[s + 3] * w_re);
                }

                p0.0 *= factor;
                p0.1 *= factor;
                p1.0 *= factor;
                p1.1 *= factor;

                let out = obs.output_index(beam, channel, sample);
                match obs.output_mode() {
                    OutputMode::Raw => {
                        output[out] = p0.0;
                        output[out + 1] = p0.1;
                        output[out + 2] = p1.0;
                        output[out + 3] = p1.1;
                    }
                    OutputMode::StokesI => {
                        let i = (p0.0 * p0.0 + p0.1 * p0.1) + (p1.0 * p1.0 + p1.1 * p1.1);
                        output[out] = i;
                        output[out + 1] = i;
                        output[out + 2] = i;
                        output[out + 3] = i;
                    }
                    OutputMode::StokesIquv => {
                        let a = p0.0 * p0.0 + p0.1 * p0.1;
                        let b = p1.0 * p1.0 + p1.1 * p1.1;
                        output[out] = a + b;
                        output[out + 1] = a - b;
                        output[out + 2] = 2.0 * (p0.0 * p1.0 + p0.1 * p1.1);
                        output[out + 3] = 2.0 * (p0.1 * p1.0 - p0.0 * p1.1);
                    }
                }
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
