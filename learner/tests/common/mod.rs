#![allow(dead_code)]

use std::{
    io,
    net::{Ipv4Addr, SocketAddr},
    num::NonZeroUsize,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    thread,
    time::{Duration, Instant},
};

use comms::msg::{Command, Msg, Payload};
use learner::config::CoreParams;
use parking_lot::Mutex;
use tokio::{
    io::AsyncWriteExt,
    net::{TcpListener, TcpStream},
};

/// A sampler that answers every request with at most `max_reply` items, each item
/// being a single element batch holding its sequence number.
///
/// Once `budget` items were served every further request is left unanswered.
pub struct MockSampler {
    pub addr: SocketAddr,
    requests: Arc<Mutex<Vec<usize>>>,
    served: Arc<AtomicUsize>,
    accepted: Arc<AtomicUsize>,
}

struct Limits {
    max_reply: usize,
    budget: usize,
    corrupt_connections: usize,
}

impl MockSampler {
    /// Starts a sampler on a free loopback port, must be called within a runtime.
    pub async fn start(max_reply: usize, budget: usize) -> io::Result<Self> {
        Self::start_at((Ipv4Addr::LOCALHOST, 0).into(), max_reply, budget).await
    }

    pub async fn start_at(addr: SocketAddr, max_reply: usize, budget: usize) -> io::Result<Self> {
        Self::spawn(addr, max_reply, budget, 0).await
    }

    /// Like `start` but the first `corrupt_connections` connections are answered
    /// with a frame header announcing `u64::MAX` bytes.
    pub async fn start_corrupting(corrupt_connections: usize, max_reply: usize) -> io::Result<Self> {
        let addr = (Ipv4Addr::LOCALHOST, 0).into();
        Self::spawn(addr, max_reply, usize::MAX, corrupt_connections).await
    }

    async fn spawn(
        addr: SocketAddr,
        max_reply: usize,
        budget: usize,
        corrupt_connections: usize,
    ) -> io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        let sampler = Self {
            addr: listener.local_addr()?,
            requests: Arc::default(),
            served: Arc::default(),
            accepted: Arc::default(),
        };

        let limits = Arc::new(Limits {
            max_reply,
            budget,
            corrupt_connections,
        });
        tokio::spawn(accept(
            listener,
            limits,
            Arc::clone(&sampler.requests),
            Arc::clone(&sampler.served),
            Arc::clone(&sampler.accepted),
        ));

        Ok(sampler)
    }

    /// The batch size of every request received so far.
    pub fn requested(&self) -> Vec<usize> {
        self.requests.lock().clone()
    }

    pub fn served(&self) -> usize {
        self.served.load(Ordering::SeqCst)
    }

    /// The amount of connections accepted so far.
    pub fn accepted(&self) -> usize {
        self.accepted.load(Ordering::SeqCst)
    }
}

async fn accept(
    listener: TcpListener,
    limits: Arc<Limits>,
    requests: Arc<Mutex<Vec<usize>>>,
    served: Arc<AtomicUsize>,
    accepted: Arc<AtomicUsize>,
) {
    while let Ok((stream, _)) = listener.accept().await {
        let n = accepted.fetch_add(1, Ordering::SeqCst);

        if n < limits.corrupt_connections {
            tokio::spawn(corrupt(stream));
            continue;
        }

        tokio::spawn(serve(
            stream,
            Arc::clone(&limits),
            Arc::clone(&requests),
            Arc::clone(&served),
        ));
    }
}

async fn corrupt(mut stream: TcpStream) -> io::Result<()> {
    stream.write_all(&u64::MAX.to_be_bytes()).await?;
    tokio::io::copy(&mut stream, &mut tokio::io::sink()).await?;
    Ok(())
}

async fn serve(
    stream: TcpStream,
    limits: Arc<Limits>,
    requests: Arc<Mutex<Vec<usize>>>,
    served: Arc<AtomicUsize>,
) -> io::Result<()> {
    let (rx, tx) = stream.into_split();
    let (mut rx, mut tx) = comms::channel(rx, tx);
    let mut buf = Vec::new();

    loop {
        let batch_size = match rx.recv_into(&mut buf).await? {
            Msg::Control(Command::Sample { batch_size }) => batch_size,
            _ => return Ok(()),
        };

        requests.lock().push(batch_size);

        let first = served.load(Ordering::SeqCst);
        let n = batch_size
            .min(limits.max_reply)
            .min(limits.budget.saturating_sub(first));

        if n == 0 {
            std::future::pending::<()>().await;
        }

        served.fetch_add(n, Ordering::SeqCst);

        let items = (first..first + n)
            .map(|i| serde_json::to_vec(&vec![i as f64]))
            .collect::<Result<Vec<_>, _>>()?;

        let msg = Msg::Data(Payload::Items(items.iter().map(Vec::as_slice).collect()));
        tx.send(&msg).await?;
    }
}

/// Core parameters pointing at `sampler`, publishing on a free port.
pub fn core_params(
    sampler: SocketAddr,
    batch_size: usize,
    queue: usize,
    workers: usize,
) -> CoreParams {
    CoreParams {
        sampler_host: sampler.ip().to_string(),
        sampler_port: sampler.port(),
        ps_publish_port: 0,
        batch_size: NonZeroUsize::new(batch_size).unwrap(),
        max_prefetch_batch_queue: NonZeroUsize::new(queue).unwrap(),
        fetch_workers: NonZeroUsize::new(workers).unwrap(),
    }
}

/// The loopback address of something listening on every interface.
pub fn loopback(addr: SocketAddr) -> SocketAddr {
    (Ipv4Addr::LOCALHOST, addr.port()).into()
}

/// Polls `cond` until it holds, panics after a few seconds.
pub fn wait_until(mut cond: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);

    while !cond() {
        assert!(Instant::now() < deadline, "condition not met in time");
        thread::sleep(Duration::from_millis(10));
    }
}
