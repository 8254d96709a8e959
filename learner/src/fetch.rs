use std::{io, marker::PhantomData, num::NonZeroUsize, sync::Arc, time::Duration};

use comms::msg::{Command, Msg, Payload};
use log::{debug, info, warn};
use serde::de::DeserializeOwned;
use tokio::{net::TcpStream, runtime::Handle, task, task::JoinSet, time};

use crate::{LearnerErr, Result};

const INITIAL_BACKOFF: Duration = Duration::from_millis(100);
const MAX_BACKOFF: Duration = Duration::from_secs(5);

/// A pool of sampler clients that keep requesting batches and hand every received
/// item to a callback.
///
/// The callback runs on the worker that received the item and may block, which stalls
/// that worker's next request. Connection failures are retried forever with an
/// exponential backoff and never reach the callback.
pub struct FetchPool<T> {
    addr: String,
    batch_size: NonZeroUsize,
    workers: NonZeroUsize,
    tasks: Option<JoinSet<()>>,
    _item: PhantomData<fn() -> T>,
}

impl<T> FetchPool<T> {
    /// Creates a new idle `FetchPool`.
    ///
    /// # Arguments
    /// * `host` - The sampler's host.
    /// * `port` - The sampler's port.
    /// * `batch_size` - The amount of items asked for in every request.
    /// * `workers` - The amount of concurrent sampler clients.
    pub fn new(host: &str, port: u16, batch_size: NonZeroUsize, workers: NonZeroUsize) -> Self {
        Self {
            addr: format!("{host}:{port}"),
            batch_size,
            workers,
            tasks: None,
            _item: PhantomData,
        }
    }

    pub fn is_running(&self) -> bool {
        self.tasks.is_some()
    }

    /// The amount of live fetch workers.
    pub fn running_workers(&self) -> usize {
        self.tasks.as_ref().map_or(0, JoinSet::len)
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }
}

impl<T: DeserializeOwned + Send + 'static> FetchPool<T> {
    /// Spawns the fetch workers on `runtime`.
    ///
    /// The runtime must be multi threaded, `handler` is run in place on its workers.
    ///
    /// # Arguments
    /// * `runtime` - The runtime to run the workers on.
    /// * `handler` - Called once for every received item.
    ///
    /// # Returns
    /// An `AlreadyRunning` error if the pool was started before, in which case
    /// nothing is spawned.
    pub fn start<H>(&mut self, runtime: &Handle, handler: H) -> Result<()>
    where
        H: Fn(T) + Send + Sync + 'static,
    {
        if self.tasks.is_some() {
            return Err(LearnerErr::AlreadyRunning);
        }

        let handler = Arc::new(handler);
        let mut tasks = JoinSet::new();

        for worker_id in 0..self.workers.get() {
            let task = fetch_loop(
                worker_id,
                self.addr.clone(),
                self.batch_size,
                Arc::clone(&handler),
            );

            tasks.spawn_on(task, runtime);
        }

        info!(
            workers = self.workers.get(), batch_size = self.batch_size.get();
            "fetch pool started against {}", self.addr
        );

        self.tasks = Some(tasks);
        Ok(())
    }
}

async fn fetch_loop<T, H>(worker_id: usize, addr: String, batch_size: NonZeroUsize, handler: Arc<H>)
where
    T: DeserializeOwned,
    H: Fn(T),
{
    let mut backoff = INITIAL_BACKOFF;

    loop {
        match fetch_from(worker_id, &addr, batch_size, &*handler, &mut backoff).await {
            Ok(()) => info!(worker_id = worker_id; "sampler closed the session"),
            Err(e) => warn!(
                worker_id = worker_id, retry_ms = backoff.as_millis() as u64;
                "fetch from {addr} failed: {e}"
            ),
        }

        time::sleep(backoff).await;
        backoff = (backoff * 2).min(MAX_BACKOFF);
    }
}

/// Runs a single sampler session until it's closed or fails.
async fn fetch_from<T, H>(
    worker_id: usize,
    addr: &str,
    batch_size: NonZeroUsize,
    handler: &H,
    backoff: &mut Duration,
) -> io::Result<()>
where
    T: DeserializeOwned,
    H: Fn(T),
{
    let stream = TcpStream::connect(addr).await?;
    stream.set_nodelay(true)?;
    debug!(worker_id = worker_id; "connected to sampler at {addr}");

    let (rx, tx) = stream.into_split();
    let (mut rx, mut tx) = comms::channel(rx, tx);

    let request = Msg::Control(Command::Sample {
        batch_size: batch_size.get(),
    });
    let mut buf = Vec::new();

    loop {
        tx.send(&request).await?;

        match rx.recv_into(&mut buf).await? {
            Msg::Data(Payload::Items(items)) => {
                *backoff = INITIAL_BACKOFF;
                debug!(worker_id = worker_id, items = items.len(); "received items");

                for raw in items {
                    match serde_json::from_slice::<T>(raw) {
                        Ok(item) => task::block_in_place(|| handler(item)),
                        Err(e) => warn!(worker_id = worker_id; "dropping undecodable item: {e}"),
                    }
                }
            }
            Msg::Control(Command::Disconnect) => return Ok(()),
            Msg::Err(detail) => return Err(io::Error::other(format!("sampler error: {detail}"))),
            other => {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("unexpected message from sampler: {}", other.kind()),
                ));
            }
        }
    }
}
