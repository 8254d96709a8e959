use std::{collections::BTreeMap, num::NonZeroUsize};

use log::info;

use crate::timing::{Clock, TimeRecorder};

/// Added to every average so ratios never divide by zero.
pub const EPSILON: f64 = 1e-6;

/// Where the learner spends its time, derived from the phase averages.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpeedStats {
    /// Mean seconds to learn from a batch.
    pub learn_time: f64,
    /// Mean seconds the training loop waited for a batch.
    pub fetch_time: f64,
    /// Mean seconds of a full iteration.
    pub iter_time: f64,
    pub compute_bound_percent: f64,
    pub io_bound_percent: f64,
}

impl SpeedStats {
    /// Derives the stats from the average duration in seconds of each phase.
    ///
    /// Both percentages are clamped to 100 and are independent of each other.
    pub fn derive(fetch_avg: f64, learn_avg: f64, iter_avg: f64) -> Self {
        let learn_time = learn_avg + EPSILON;
        let fetch_time = fetch_avg + EPSILON;
        let iter_time = iter_avg + EPSILON;

        Self {
            learn_time,
            fetch_time,
            iter_time,
            compute_bound_percent: (learn_time / iter_time * 100.).min(100.),
            io_bound_percent: (fetch_time / iter_time * 100.).min(100.),
        }
    }

    /// Derives the stats from the running averages of the three phase recorders.
    pub fn from_recorders<C: Clock>(
        fetch: &TimeRecorder<C>,
        learn: &TimeRecorder<C>,
        iter: &TimeRecorder<C>,
    ) -> Self {
        Self::derive(fetch.avg_secs(), learn.avg_secs(), iter.avg_secs())
    }

    /// The stats as tagged values, ready for a `PeriodicReporter`.
    pub fn entries(&self) -> [(&'static str, f64); 5] {
        [
            ("speed/learn_time", self.learn_time),
            ("speed/fetch_time", self.fetch_time),
            ("speed/iter_time", self.iter_time),
            ("speed/compute_bound_percent", self.compute_bound_percent),
            ("speed/io_bound_percent", self.io_bound_percent),
        ]
    }
}

/// Receives the aggregated values of every reporting period.
pub trait StatsSink {
    fn emit(&mut self, step: u64, values: &BTreeMap<String, f64>);
}

/// Writes every reported period to the `log` facade.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl StatsSink for LogSink {
    fn emit(&mut self, step: u64, values: &BTreeMap<String, f64>) {
        let line = values
            .iter()
            .map(|(tag, value)| format!("{tag}={value:.6}"))
            .collect::<Vec<_>>()
            .join(" ");

        info!(target: "learner::stats", step = step; "{line}");
    }
}

/// Averages tagged values over `period` updates and hands them to a sink.
#[derive(Debug)]
pub struct PeriodicReporter<S: StatsSink = LogSink> {
    period: NonZeroUsize,
    sink: S,
    sums: BTreeMap<String, f64>,
    updates: usize,
    step: u64,
}

impl PeriodicReporter {
    /// Creates a new `PeriodicReporter` that logs its output.
    pub fn new(period: NonZeroUsize) -> Self {
        Self::with_sink(period, LogSink)
    }
}

impl<S: StatsSink> PeriodicReporter<S> {
    /// Creates a new `PeriodicReporter`.
    ///
    /// # Arguments
    /// * `period` - Amount of updates aggregated before emitting.
    /// * `sink` - Destination of the aggregated values.
    pub fn with_sink(period: NonZeroUsize, sink: S) -> Self {
        Self {
            period,
            sink,
            sums: BTreeMap::new(),
            updates: 0,
            step: 0,
        }
    }

    /// Adds a set of tagged values.
    ///
    /// # Arguments
    /// * `values` - The tagged values of this update.
    /// * `global_step` - The step to report under, `None` to count updates internally.
    ///
    /// # Returns
    /// Whether this update completed a period and the averages were emitted.
    pub fn update<'a, I>(&mut self, values: I, global_step: Option<u64>) -> bool
    where
        I: IntoIterator<Item = (&'a str, f64)>,
    {
        for (tag, value) in values {
            *self.sums.entry(tag.to_string()).or_default() += value;
        }

        self.updates += 1;
        self.step = global_step.unwrap_or(self.step + 1);

        if self.updates < self.period.get() {
            return false;
        }

        let n = self.updates as f64;
        let averages = std::mem::take(&mut self.sums)
            .into_iter()
            .map(|(tag, sum)| (tag, sum / n))
            .collect();

        self.sink.emit(self.step, &averages);
        self.updates = 0;
        true
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }
}
