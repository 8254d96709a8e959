use std::{convert::Infallible, net::SocketAddr, path::Path, sync::Arc};

use log::info;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::runtime::{self, Runtime};

use crate::{
    LearnerErr, Result,
    config::{self, CoreParams},
    fetch::FetchPool,
    publish::{ModuleSource, ParameterPublisher},
    queue::PrefetchQueue,
    stats::SpeedStats,
    timing::{Clock, SystemClock, TimeRecorder},
};

/// The algorithm specific part of a learner.
pub trait Learner: ModuleSource {
    /// A unit of training data as delivered by the sampler.
    type Batch: DeserializeOwned + Send + 'static;
    /// Whatever a learning step reports back, e.g. new priorities.
    type Output;

    /// Runs a single step of learning on `batch`.
    fn learn(&mut self, batch: Self::Batch) -> Self::Output;

    /// Checkpoints the learner to `path`.
    fn save(&self, path: &Path) -> Result<()> {
        let _ = path;
        Err(LearnerErr::NotImplemented("save"))
    }

    /// The defaults the learner config tree is merged with.
    fn default_config() -> Value
    where
        Self: Sized,
    {
        config::base_learner_config()
    }
}

/// Lifecycle of a `LearnerCore`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoreState {
    /// Everything is wired but nothing runs.
    Constructed,
    /// The publisher is bound and the fetch pool is running.
    Initialized,
    /// The main loop took its first step.
    Running,
}

/// Couples the fetch pool, the prefetch queue and the parameter publisher around a
/// `Learner`.
///
/// Construction only wires things together, `initialize` must be called exactly once
/// before stepping. Every step dequeues a batch, learns from it and publishes the
/// resulting parameters, timing each phase with `C`.
pub struct LearnerCore<L: Learner, C: Clock = SystemClock> {
    learner: L,
    state: CoreState,
    queue: Arc<PrefetchQueue<L::Batch>>,
    fetch_pool: FetchPool<L::Batch>,
    publisher: ParameterPublisher,
    fetch_timer: TimeRecorder<C>,
    learn_timer: TimeRecorder<C>,
    iter_timer: TimeRecorder<C>,
    iteration: u64,
    io_threads: usize,
    runtime: Option<Runtime>,
}

impl<L: Learner> LearnerCore<L> {
    /// Creates a new `LearnerCore`.
    ///
    /// # Arguments
    /// * `learner` - The algorithm to train.
    /// * `params` - Where to fetch batches from and publish parameters to.
    ///
    /// # Returns
    /// A new core in the `Constructed` state.
    pub fn new(learner: L, params: CoreParams) -> Self {
        Self::with_clocks(learner, params, SystemClock, SystemClock, SystemClock)
    }
}

impl<L: Learner, C: Clock> LearnerCore<L, C> {
    /// Creates a new `LearnerCore` whose phase timers read the given clocks.
    ///
    /// # Arguments
    /// * `learner` - The algorithm to train.
    /// * `params` - Where to fetch batches from and publish parameters to.
    /// * `fetch` - Clock of the time spent waiting on the prefetch queue.
    /// * `learn` - Clock of the time spent in `Learner::learn`.
    /// * `iter` - Clock of the time spent learning and publishing.
    pub fn with_clocks(learner: L, params: CoreParams, fetch: C, learn: C, iter: C) -> Self {
        let CoreParams {
            sampler_host,
            sampler_port,
            ps_publish_port,
            batch_size,
            max_prefetch_batch_queue,
            fetch_workers,
        } = params;

        Self {
            learner,
            state: CoreState::Constructed,
            queue: Arc::new(PrefetchQueue::new(max_prefetch_batch_queue)),
            fetch_pool: FetchPool::new(&sampler_host, sampler_port, batch_size, fetch_workers),
            publisher: ParameterPublisher::new(ps_publish_port),
            fetch_timer: TimeRecorder::with_clock(fetch),
            learn_timer: TimeRecorder::with_clock(learn),
            iter_timer: TimeRecorder::with_clock(iter),
            iteration: 0,
            io_threads: fetch_workers.get() + 1,
            runtime: None,
        }
    }

    /// Binds the publisher to the learner's modules and starts fetching batches.
    ///
    /// # Returns
    /// An `AlreadyInitialized` error if called more than once, nothing new is
    /// started in that case.
    pub fn initialize(&mut self) -> Result<()> {
        if self.state != CoreState::Constructed {
            return Err(LearnerErr::AlreadyInitialized);
        }

        let runtime = runtime::Builder::new_multi_thread()
            .worker_threads(self.io_threads)
            .thread_name("learner-io")
            .enable_all()
            .build()?;

        self.publisher.bind(runtime.handle(), &self.learner)?;

        let queue = Arc::clone(&self.queue);
        self.fetch_pool
            .start(runtime.handle(), move |batch| queue.enqueue(batch))?;

        self.runtime = Some(runtime);
        self.state = CoreState::Initialized;
        info!(
            queue_capacity = self.queue.capacity();
            "learner initialized, fetching from {}", self.fetch_pool.addr()
        );

        Ok(())
    }

    /// Takes the next batch out of the prefetch queue, waiting for one if needed.
    ///
    /// The wait is recorded as fetch time.
    pub fn fetch_batch(&self) -> Result<L::Batch> {
        if self.state == CoreState::Constructed {
            return Err(LearnerErr::NotInitialized);
        }

        Ok(self.fetch_timer.time(|| self.queue.dequeue()))
    }

    /// Broadcasts the learner's current modules.
    ///
    /// # Arguments
    /// * `iteration` - The current amount of learning iterations.
    /// * `message` - A free form message sent along.
    pub fn publish_parameter(&self, iteration: u64, message: &str) -> Result<()> {
        self.publisher.publish(&self.learner, iteration, message)
    }

    /// Runs a single iteration: fetch, learn and publish.
    ///
    /// Waiting on the queue is recorded as fetch time only, the iteration timer
    /// covers learning and publishing. A failed publish still counts the iteration,
    /// the batch was consumed and the next publish uses the next index.
    ///
    /// # Returns
    /// The learner's output for the batch, untouched, or the publish error.
    pub fn step(&mut self) -> Result<L::Output> {
        match self.state {
            CoreState::Constructed => return Err(LearnerErr::NotInitialized),
            CoreState::Initialized => {
                info!("entering main loop");
                self.state = CoreState::Running;
            }
            CoreState::Running => {}
        }

        let Self {
            learner,
            queue,
            publisher,
            fetch_timer,
            learn_timer,
            iter_timer,
            iteration,
            ..
        } = self;

        let i = *iteration;
        let batch = fetch_timer.time(|| queue.dequeue());
        let (output, published) = iter_timer.time(|| {
            let output = learn_timer.time(|| learner.learn(batch));
            let published = publisher.publish(&*learner, i, &format!("batch {i}"));
            (output, published)
        });

        *iteration += 1;
        published?;
        Ok(output)
    }

    /// Runs `n` iterations of the main loop.
    pub fn run_iterations(&mut self, n: u64) -> Result<()> {
        for _ in 0..n {
            self.step()?;
        }

        Ok(())
    }

    /// Runs the main loop forever, only returns on error.
    pub fn run(&mut self) -> Result<Infallible> {
        loop {
            self.step()?;
        }
    }

    /// Checkpoints the learner.
    pub fn save(&self, path: &Path) -> Result<()> {
        self.learner.save(path)
    }

    pub fn learner(&self) -> &L {
        &self.learner
    }

    pub fn learner_mut(&mut self) -> &mut L {
        &mut self.learner
    }

    pub fn state(&self) -> CoreState {
        self.state
    }

    /// The amount of completed iterations.
    pub fn iteration(&self) -> u64 {
        self.iteration
    }

    /// The amount of prefetched batches waiting to be learned from.
    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    /// The address the publisher is listening on, once initialized.
    pub fn publish_addr(&self) -> Option<SocketAddr> {
        self.publisher.local_addr()
    }

    pub fn publisher(&self) -> &ParameterPublisher {
        &self.publisher
    }

    pub fn running_fetch_workers(&self) -> usize {
        self.fetch_pool.running_workers()
    }

    pub fn fetch_timer(&self) -> &TimeRecorder<C> {
        &self.fetch_timer
    }

    pub fn learn_timer(&self) -> &TimeRecorder<C> {
        &self.learn_timer
    }

    pub fn iter_timer(&self) -> &TimeRecorder<C> {
        &self.iter_timer
    }

    pub fn speed_stats(&self) -> SpeedStats {
        SpeedStats::from_recorders(&self.fetch_timer, &self.learn_timer, &self.iter_timer)
    }
}

impl<L: Learner, C: Clock> Drop for LearnerCore<L, C> {
    fn drop(&mut self) {
        // Fetch workers may be parked on a full queue forever.
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_background();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{collections::BTreeMap, net::TcpListener, num::NonZeroUsize, time::Duration};

    use super::*;
    use crate::{publish::ModuleDict, timing::tests::ManualClock};

    struct Counter(u32);

    impl ModuleSource for Counter {
        type State = u32;

        fn module_dict(&self) -> ModuleDict<u32> {
            BTreeMap::from([("counter".to_string(), self.0)])
        }
    }

    impl Learner for Counter {
        type Batch = u32;
        type Output = ();

        fn learn(&mut self, batch: u32) {
            self.0 += batch;
        }
    }

    /// Grows a new module with every batch learned.
    struct Growing(u32);

    impl ModuleSource for Growing {
        type State = u32;

        fn module_dict(&self) -> ModuleDict<u32> {
            (0..=self.0).map(|i| (format!("layer{i}"), i)).collect()
        }
    }

    impl Learner for Growing {
        type Batch = u32;
        type Output = u32;

        fn learn(&mut self, batch: u32) -> u32 {
            self.0 += batch;
            self.0
        }
    }

    /// Points the fetch pool at a closed port, batches are enqueued by hand.
    fn params(queue: usize) -> CoreParams {
        let closed = TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap();

        CoreParams {
            sampler_host: closed.ip().to_string(),
            sampler_port: closed.port(),
            ps_publish_port: 0,
            batch_size: NonZeroUsize::MIN,
            max_prefetch_batch_queue: NonZeroUsize::new(queue).unwrap(),
            fetch_workers: NonZeroUsize::MIN,
        }
    }

    fn core() -> LearnerCore<Counter> {
        LearnerCore::new(Counter(0), params(1))
    }

    fn clock(secs: [u64; 3]) -> ManualClock {
        ManualClock::from_durations(&secs.map(Duration::from_secs))
    }

    #[test]
    fn construction_starts_nothing() {
        let core = core();

        assert_eq!(core.state(), CoreState::Constructed);
        assert_eq!(core.running_fetch_workers(), 0);
        assert_eq!(core.publish_addr(), None);
        assert_eq!(core.queue_len(), 0);
    }

    #[test]
    fn stepping_before_initialize_fails() {
        let mut core = core();

        assert!(matches!(core.step(), Err(LearnerErr::NotInitialized)));
        assert!(matches!(core.fetch_batch(), Err(LearnerErr::NotInitialized)));
        assert!(matches!(core.run_iterations(1), Err(LearnerErr::NotInitialized)));
        assert_eq!(core.iteration(), 0);
    }

    #[test]
    fn publishing_before_initialize_fails() {
        let core = core();
        let err = core.publish_parameter(0, "batch 0").unwrap_err();

        assert!(matches!(err, LearnerErr::NotBound));
    }

    #[test]
    fn save_is_optional() {
        let core = core();
        let err = core.save(Path::new("counter.json")).unwrap_err();

        assert!(matches!(err, LearnerErr::NotImplemented("save")));
        assert!(!err.is_config_error());
    }

    #[test]
    fn default_config_is_the_base_one() {
        assert_eq!(Counter::default_config(), config::base_learner_config());
    }

    #[test]
    fn learner_is_reachable() {
        let mut core = core();
        core.learner_mut().learn(3);

        assert_eq!(core.learner().0, 3);
    }

    #[test]
    fn iteration_average_with_deterministic_clocks() {
        let mut core = LearnerCore::with_clocks(
            Counter(0),
            params(4),
            clock([5, 5, 5]),
            clock([1, 1, 1]),
            clock([1, 2, 3]),
        );
        core.initialize().unwrap();

        for batch in 1..=3 {
            core.queue.enqueue(batch);
        }
        core.run_iterations(3).unwrap();

        assert_eq!(core.iteration(), 3);
        assert_eq!(core.learner().0, 6);
        assert_eq!(core.iter_timer().avg(), Duration::from_secs(2));
        assert_eq!(core.fetch_timer().avg(), Duration::from_secs(5));

        // Waiting on the queue takes longer than a whole iteration.
        let stats = core.speed_stats();
        assert_eq!(stats.io_bound_percent, 100.);
        assert!((stats.compute_bound_percent - 50.).abs() < 1e-3);
    }

    #[test]
    fn failed_publish_still_counts_the_iteration() {
        let mut core = LearnerCore::new(Growing(0), params(2));
        core.initialize().unwrap();
        core.queue.enqueue(1);

        let err = core.step().unwrap_err();
        assert!(matches!(err, LearnerErr::InconsistentModules { .. }));
        assert_eq!(core.iteration(), 1);
        assert_eq!(core.learn_timer().count(), 1);
        assert_eq!(core.iter_timer().count(), 1);
        assert_eq!(core.queue_len(), 0);
    }
}
