use std::time::{Duration, Instant};

use parking_lot::Mutex;

/// A source of monotonic instants.
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

/// The wall clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    #[inline]
    fn now(&self) -> Instant {
        Instant::now()
    }
}

#[derive(Debug, Default)]
struct Totals {
    count: u64,
    total: Duration,
}

/// Running average of the time spent in a phase.
///
/// Samples are accumulated for the whole lifetime of the recorder.
#[derive(Debug, Default)]
pub struct TimeRecorder<C: Clock = SystemClock> {
    clock: C,
    totals: Mutex<Totals>,
}

impl TimeRecorder {
    /// Creates a new `TimeRecorder` measuring with the wall clock.
    pub fn new() -> Self {
        Self::with_clock(SystemClock)
    }
}

impl<C: Clock> TimeRecorder<C> {
    /// Creates a new `TimeRecorder` measuring with `clock`.
    ///
    /// # Arguments
    /// * `clock` - The instant source to measure with.
    ///
    /// # Returns
    /// A new `TimeRecorder` instance without samples.
    pub fn with_clock(clock: C) -> Self {
        Self {
            clock,
            totals: Mutex::default(),
        }
    }

    /// Runs `f` and records how long it took.
    ///
    /// # Arguments
    /// * `f` - The closure to measure.
    ///
    /// # Returns
    /// Whatever `f` returns.
    pub fn time<R>(&self, f: impl FnOnce() -> R) -> R {
        let start = self.clock.now();
        let ret = f();
        self.record(self.clock.now().saturating_duration_since(start));
        ret
    }

    /// Adds a single sample.
    ///
    /// # Arguments
    /// * `elapsed` - The duration of the sample.
    pub fn record(&self, elapsed: Duration) {
        let mut totals = self.totals.lock();
        totals.count += 1;
        totals.total += elapsed;
    }

    pub fn count(&self) -> u64 {
        self.totals.lock().count
    }

    pub fn total(&self) -> Duration {
        self.totals.lock().total
    }

    /// The mean duration of all samples, zero if there are none.
    pub fn avg(&self) -> Duration {
        let totals = self.totals.lock();

        match totals.count {
            0 => Duration::ZERO,
            n => {
                let nanos = totals.total.as_nanos() / u128::from(n);
                Duration::from_nanos(u64::try_from(nanos).unwrap_or(u64::MAX))
            }
        }
    }

    /// Same as `avg` but in seconds.
    pub fn avg_secs(&self) -> f64 {
        self.avg().as_secs_f64()
    }
}
