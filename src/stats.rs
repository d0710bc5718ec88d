//! Online measurement statistics
//!
//! Welford's single-pass mean/variance accumulator. The tuning driver
//! feeds it one throughput (or time) observation per timed dispatch,
//! so no per-iteration history needs to be retained across a sweep.

/// Single-pass mean and variance over a stream of samples.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RunningStats {
    count: u64,
    mean: f64,
    // Sum of squared deviations from the running mean.
    m2: f64,
}

impl RunningStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, value: f64) {
        self.count += 1;
        let delta = value - self.mean;
        self.mean += delta / self.count as f64;
        self.m2 += delta * (value - self.mean);
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn mean(&self) -> f64 {
        self.mean
    }

    /// Population variance; zero until two samples have been seen.
    pub fn variance(&self) -> f64 {
        if self.count < 2 {
            0.0
        } else {
            self.m2 / self.count as f64
        }
    }

    pub fn std_dev(&self) -> f64 {
        self.variance().sqrt()
    }

    /// Relative spread of the samples, `std_dev / mean`. Zero for an
    /// empty or zero-mean stream.
    pub fn coefficient_of_variation(&self) -> f64 {
        if self.mean == 0.0 {
            0.0
        } else {
            self.std_dev() / self.mean.abs()
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
