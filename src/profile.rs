//! Execution-count profiling for the ancillary loop-unroll pass.
//!
//! `--loop-unroll-profile` weights the unroll factor choice by how hot a
//! loop actually is at runtime, rather than unrolling every eligible loop
//! to the same fixed factor. This module only does the classification;
//! collecting the counts themselves is the host's job (it already has a
//! sampling profiler or instrumented-build counters; we just consume
//! `(location, count)` pairs).

use std::collections::HashMap;
use std::fmt;

/// A profiled loop, identified by its enclosing function and a per-function
/// loop index (the order `loop_fold`/`loop_unroll` discover loops in).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct LoopLocation {
    pub function: String,
    pub loop_id: u32,
}

impl LoopLocation {
    pub fn new(function: impl Into<String>, loop_id: u32) -> Self {
        Self {
            function: function.into(),
            loop_id,
        }
    }
}

impl fmt::Display for LoopLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.function, self.loop_id)
    }
}

/// Mapping from a profiled loop to some per-loop value.
pub type PerLoop<T> = HashMap<LoopLocation, T>;

/// The three-way classification `--print-profiler-loop` reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Temperature {
    Hot,
    Mid,
    Cold,
}

impl fmt::Display for Temperature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Hot => "hot",
            Self::Mid => "mid",
            Self::Cold => "cold",
        };
        f.write_str(s)
    }
}

/// Receives the per-loop classification once profiling has run. Lets a
/// host route the report somewhere other than a log line (a JSON dump via
/// `--specify-serialize-profiler-loop-file-name`, for instance).
pub trait ProfileReceiver {
    fn on_classified(&mut self, classification: &PerLoop<Temperature>);
}

/// Logs the classification at debug level.
#[derive(Default)]
pub struct TracingProfileReceiver;

impl ProfileReceiver for TracingProfileReceiver {
    fn on_classified(&mut self, classification: &PerLoop<Temperature>) {
        for (loc, temp) in classification {
            tracing::debug!(%loc, %temp, "loop classified");
        }
    }
}

/// Accumulates per-loop execution counts and fits the hot/mid/cold
/// threshold curve over them.
#[derive(Debug, Clone, Default)]
pub struct LoopProfiler {
    counts: PerLoop<u64>,
}

impl LoopProfiler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, location: LoopLocation, count: u64) {
        *self.counts.entry(location).or_insert(0) += count;
    }

    pub fn counts(&self) -> &PerLoop<u64> {
        &self.counts
    }

    /// Classify every recorded loop as hot, mid, or cold.
    ///
    /// Counts are sorted ascending and fit to `ln(count) = a*rank + b` by
    /// ordinary least squares; the fitted curve plus a small additive
    /// floor `c` (the smallest non-zero count seen) gives two thresholds
    /// at the 1/3 and 2/3 rank marks. A loop at or above the upper
    /// threshold is hot, at or above the lower is mid, otherwise cold.
    /// Returns an empty map if no loop has been recorded, and classifies
    /// every loop as `Cold` if fewer than two distinct counts exist (the
    /// regression is degenerate with a single point).
    pub fn classify(&self) -> PerLoop<Temperature> {
        if self.counts.is_empty() {
            return PerLoop::new();
        }
        let mut sorted: Vec<u64> = self.counts.values().copied().collect();
        sorted.sort_unstable();

        let floor = sorted.iter().copied().find(|&c| c > 0).unwrap_or(0) as f64;
        let (a, b) = match fit_log_linear(&sorted) {
            Some(coeffs) => coeffs,
            None => {
                return self
                    .counts
                    .iter()
                    .map(|(loc, _)| (loc.clone(), Temperature::Cold))
                    .collect();
            }
        };

        let n = sorted.len();
        let hot_rank = (2 * n / 3) as f64;
        let mid_rank = (n / 3) as f64;
        let hot_threshold = (a * hot_rank + b).exp() + floor;
        let mid_threshold = (a * mid_rank + b).exp() + floor;

        self.counts
            .iter()
            .map(|(loc, &count)| {
                let temp = if count as f64 >= hot_threshold {
                    Temperature::Hot
                } else if count as f64 >= mid_threshold {
                    Temperature::Mid
                } else {
                    Temperature::Cold
                };
                (loc.clone(), temp)
            })
            .collect()
    }
}

/// Ordinary least squares fit of `ln(y) = a*x + b` over `(rank, count)`
/// pairs, `rank` running `0..counts.len()`. Zero counts are excluded from
/// the fit (their log is undefined) but still get a rank. Returns `None`
/// if fewer than two counts survive the zero-filter.
fn fit_log_linear(sorted_counts: &[u64]) -> Option<(f64, f64)> {
    let points: Vec<(f64, f64)> = sorted_counts
        .iter()
        .enumerate()
        .filter(|(_, &c)| c > 0)
        .map(|(i, &c)| (i as f64, (c as f64).ln()))
        .collect();
    if points.len() < 2 {
        return None;
    }

    let n = points.len() as f64;
    let sum_x: f64 = points.iter().map(|(x, _)| x).sum();
    let sum_y: f64 = points.iter().map(|(_, y)| y).sum();
    let sum_xx: f64 = points.iter().map(|(x, _)| x * x).sum();
    let sum_xy: f64 = points.iter().map(|(x, y)| x * y).sum();

    let denom = n * sum_xx - sum_x * sum_x;
    if denom.abs() < f64::EPSILON {
        return None;
    }
    let a = (n * sum_xy - sum_x * sum_y) / denom;
    let b = (sum_y - a * sum_x) / n;
    Some((a, b))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hottest_loop_classified_hot() {
        let mut profiler = LoopProfiler::new();
        for i in 0..9u32 {
            profiler.record(LoopLocation::new("f", i), 2u64.pow(i));
        }
        let classification = profiler.classify();
        assert_eq!(
            classification[&LoopLocation::new("f", 8)],
            Temperature::Hot
        );
        assert_eq!(
            classification[&LoopLocation::new("f", 0)],
            Temperature::Cold
        );
    }

    #[test]
    fn single_loop_is_cold_by_default() {
        let mut profiler = LoopProfiler::new();
        profiler.record(LoopLocation::new("f", 0), 100);
        let classification = profiler.classify();
        assert_eq!(classification.len(), 1);
        assert_eq!(classification[&LoopLocation::new("f", 0)], Temperature::Cold);
    }

    #[test]
    fn empty_profiler_classifies_nothing() {
        let profiler = LoopProfiler::new();
        assert!(profiler.classify().is_empty());
    }
}
