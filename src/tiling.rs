//! Tiling configurations and the feasible-space enumerator
//!
//! A [`TilingConfig`] describes how one kernel dispatch partitions
//! work: threads per work-group along the sample and beam axes, and
//! how many independent partial sums one thread accumulates along
//! each axis. [`Configurations`] walks the feasible subset of that
//! space in a fixed nested order so sweeps are deterministic and
//! restartable.

use std::fmt;

use crate::observation::Observation;

// ============================================================================
// Tiling Configuration
// ============================================================================

/// One point in the tiling search space. Generated transiently by the
/// enumerator, never mutated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TilingConfig {
    /// Work-group extent along the sample axis.
    pub samples_per_block: usize,
    /// Work-group extent along the beam axis.
    pub beams_per_block: usize,
    /// Samples accumulated per thread.
    pub samples_per_thread: usize,
    /// Beams accumulated per thread.
    pub beams_per_thread: usize,
}

impl TilingConfig {
    pub fn new(
        samples_per_block: usize,
        beams_per_block: usize,
        samples_per_thread: usize,
        beams_per_thread: usize,
    ) -> Self {
        Self {
            samples_per_block,
            beams_per_block,
            samples_per_thread,
            beams_per_thread,
        }
    }

    /// Threads in one work-group.
    pub fn group_threads(&self) -> usize {
        self.samples_per_block * self.beams_per_block
    }

    /// Samples covered by one work-group.
    pub fn samples_per_group(&self) -> usize {
        self.samples_per_block * self.samples_per_thread
    }

    /// Beams covered by one work-group.
    pub fn beams_per_group(&self) -> usize {
        self.beams_per_block * self.beams_per_thread
    }

    /// Accumulator-register pressure estimate: four scalar partial
    /// sums per (sample, beam) pair held by a thread, one register
    /// per hoisted sample vector, plus fixed indexing overhead.
    pub fn register_items(&self) -> usize {
        self.samples_per_thread + 4 * self.samples_per_thread * self.beams_per_thread + 8
    }

    /// Check every feasibility predicate, cheapest first. The
    /// enumerator only yields configurations for which this holds;
    /// generating source for anything else is a contract violation.
    pub fn is_feasible(&self, obs: &Observation, bounds: &SearchBounds) -> bool {
        obs.samples_per_padded_second() % self.samples_per_group() == 0
            && obs.beams() % self.beams_per_group() == 0
            && self.group_threads() <= bounds.max_threads
            && self.group_threads() % bounds.thread_granularity == 0
            && self.register_items() <= bounds.max_registers
    }
}

impl fmt::Display for TilingConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}x{} block, {}x{} per thread",
            self.samples_per_block,
            self.beams_per_block,
            self.samples_per_thread,
            self.beams_per_thread
        )
    }
}

// ============================================================================
// Search Bounds
// ============================================================================

/// Hardware-derived bounds on the tiling search space.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchBounds {
    /// Smallest useful work-group extent along the sample axis; also
    /// the default step for that extent.
    pub min_threads: usize,
    /// Maximum threads in one work-group.
    pub max_threads: usize,
    /// Maximum accumulation items per thread along either axis.
    pub max_items: usize,
    /// Work-group sizes must be a multiple of this scheduling unit.
    pub thread_granularity: usize,
    /// Step for the sample-axis block extent. Zero means step by
    /// `min_threads`.
    pub thread_increment: usize,
    /// Accumulator-register budget per thread, in items.
    pub max_registers: usize,
}

impl Default for SearchBounds {
    fn default() -> Self {
        Self {
            min_threads: 32,
            max_threads: 1024,
            max_items: 8,
            thread_granularity: 32,
            thread_increment: 0,
            max_registers: 64,
        }
    }
}

impl SearchBounds {
    /// Check the bounds before enumerating with them. A zero
    /// granularity or block extent would divide by zero inside the
    /// feasibility predicates, so these are rejected up front.
    /// `thread_increment` may be zero; that selects the default step.
    pub fn validate(&self) -> Result<(), String> {
        for (name, value) in [
            ("min_threads", self.min_threads),
            ("max_threads", self.max_threads),
            ("max_items", self.max_items),
            ("thread_granularity", self.thread_granularity),
            ("max_registers", self.max_registers),
        ] {
            if value == 0 {
                return Err(format!("{} must be greater than zero", name));
            }
        }
        Ok(())
    }

    fn sample_block_step(&self) -> usize {
        if self.thread_increment > 0 {
            self.thread_increment
        } else {
            self.min_threads
        }
    }
}

// ============================================================================
// Enumerator
// ============================================================================

/// Lazy iterator over the feasible tiling configurations for one
/// observation.
///
/// Order is fixed: `samples_per_block` ascending (stepped by the
/// thread increment), then `beams_per_block`, `samples_per_thread`
/// and `beams_per_thread`, each ascending by one. Two iterators built
/// from the same observation and bounds yield the same sequence.
#[derive(Debug, Clone)]
pub struct Configurations<'a> {
    obs: &'a Observation,
    bounds: SearchBounds,
    samples_per_block: usize,
    beams_per_block: usize,
    samples_per_thread: usize,
    beams_per_thread: usize,
}

impl<'a> Configurations<'a> {
    pub fn new(obs: &'a Observation, bounds: SearchBounds) -> Self {
        let samples_per_block = bounds.min_threads;
        Self {
            obs,
            bounds,
            samples_per_block,
            beams_per_block: 1,
            samples_per_thread: 1,
            beams_per_thread: 1,
        }
    }
}

impl Iterator for Configurations<'_> {
    type Item = TilingConfig;

    fn next(&mut self) -> Option<TilingConfig> {
        loop {
            if self.samples_per_block > self.bounds.max_threads {
                return None;
            }
            // The group-size bound is monotonic in beams_per_block:
            // once exceeded, the rest of that inner loop is infeasible.
            if self.samples_per_block * self.beams_per_block > self.bounds.max_threads {
                self.samples_per_block += self.bounds.sample_block_step();
                self.beams_per_block = 1;
                self.samples_per_thread = 1;
                self.beams_per_thread = 1;
                continue;
            }
            if self.samples_per_thread > self.bounds.max_items {
                self.beams_per_block += 1;
                self.samples_per_thread = 1;
                self.beams_per_thread = 1;
                continue;
            }
            if self.beams_per_thread > self.bounds.max_items {
                self.samples_per_thread += 1;
                self.beams_per_thread = 1;
                continue;
            }

            let candidate = TilingConfig::new(
                self.samples_per_block,
                self.beams_per_block,
                self.samples_per_thread,
                self.beams_per_thread,
            );
            self.beams_per_thread += 1;

            if candidate.is_feasible(self.obs, &self.bounds) {
                return Some(candidate);
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
