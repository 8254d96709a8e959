use std::{
    collections::BTreeMap,
    io,
    net::{Ipv4Addr, SocketAddr, TcpListener as StdTcpListener},
    sync::Arc,
};

use comms::{
    Encoded,
    msg::{Msg, Params, Payload},
};
use log::{debug, info, warn};
use serde::Serialize;
use tokio::{
    net::{TcpListener, TcpStream},
    runtime::Handle,
    sync::broadcast::{self, error::RecvError},
    task::JoinSet,
};

use crate::{LearnerErr, Result};

/// Amount of broadcasts a slow subscriber may fall behind before skipping some.
const BACKLOG: usize = 16;

/// Module name to module state.
pub type ModuleDict<S> = BTreeMap<String, S>;

/// Anything that can expose the current state of its modules.
pub trait ModuleSource {
    type State: Serialize;

    /// The modules to broadcast, keyed by a unique name.
    ///
    /// Must stay consistent with the module dict of the workers consuming them.
    fn module_dict(&self) -> ModuleDict<Self::State>;
}

/// Broadcasts parameter snapshots to every connected subscriber.
///
/// Every `publish` call is sent at most once: there are no acknowledgements nor
/// retries, subscribers that connect later miss it and subscribers that fall too far
/// behind skip it.
pub struct ParameterPublisher {
    port: u16,
    tx: broadcast::Sender<Arc<Encoded>>,
    modules: Option<Vec<String>>,
    local_addr: Option<SocketAddr>,
    tasks: JoinSet<()>,
}

impl ParameterPublisher {
    /// Creates a new unbound `ParameterPublisher`.
    ///
    /// # Arguments
    /// * `port` - The port subscribers connect to, `0` picks a free one on bind.
    pub fn new(port: u16) -> Self {
        let (tx, _) = broadcast::channel(BACKLOG);

        Self {
            port,
            tx,
            modules: None,
            local_addr: None,
            tasks: JoinSet::new(),
        }
    }

    /// Binds the publisher to the modules of `source` and starts accepting subscribers.
    ///
    /// The set of module names is fixed from here on.
    ///
    /// # Arguments
    /// * `runtime` - The runtime to serve subscribers on.
    /// * `source` - The module state accessor that will be published.
    ///
    /// # Returns
    /// An `AlreadyInitialized` error if it was already bound or an io error if the
    /// port can't be bound.
    pub fn bind<S>(&mut self, runtime: &Handle, source: &S) -> Result<()>
    where
        S: ModuleSource + ?Sized,
    {
        if self.modules.is_some() {
            return Err(LearnerErr::AlreadyInitialized);
        }

        let listener = StdTcpListener::bind((Ipv4Addr::UNSPECIFIED, self.port))?;
        listener.set_nonblocking(true)?;
        let local_addr = listener.local_addr()?;

        let listener = {
            let _guard = runtime.enter();
            TcpListener::from_std(listener)?
        };

        let modules: Vec<_> = source.module_dict().into_keys().collect();
        info!(port = local_addr.port(); "publishing modules {modules:?}");

        self.tasks
            .spawn_on(accept_loop(listener, self.tx.clone()), runtime);
        self.modules = Some(modules);
        self.local_addr = Some(local_addr);
        Ok(())
    }

    /// Serializes the modules of `source` and broadcasts them once.
    ///
    /// # Arguments
    /// * `source` - The module state accessor.
    /// * `iteration` - The learner iteration the snapshot belongs to.
    /// * `message` - A free form message sent along.
    ///
    /// # Returns
    /// A `NotBound` error before `bind`, a `Serialization` error if a module state
    /// can't be serialized and `InconsistentModules` if the module names changed.
    /// Nothing is sent on error.
    pub fn publish<S>(&self, source: &S, iteration: u64, message: &str) -> Result<()>
    where
        S: ModuleSource + ?Sized,
    {
        let Some(expected) = &self.modules else {
            return Err(LearnerErr::NotBound);
        };

        let dict = source.module_dict();

        if !dict.keys().eq(expected.iter()) {
            return Err(LearnerErr::InconsistentModules {
                expected: expected.clone(),
                got: dict.into_keys().collect(),
            });
        }

        let states = dict
            .iter()
            .map(|(name, state)| -> Result<_> { Ok((name.as_str(), serde_json::to_vec(state)?)) })
            .collect::<Result<Vec<_>>>()?;

        let params = Params {
            iteration,
            message,
            modules: states
                .iter()
                .map(|(name, state)| (*name, state.as_slice()))
                .collect(),
        };

        let frame = Encoded::new(&Msg::Data(Payload::Params(params)))?;

        match self.tx.send(Arc::new(frame)) {
            Ok(subscribers) => {
                debug!(iteration = iteration, subscribers = subscribers; "published parameters")
            }
            Err(_) => debug!(iteration = iteration; "published parameters to no subscribers"),
        }

        Ok(())
    }

    pub fn is_bound(&self) -> bool {
        self.modules.is_some()
    }

    /// The address subscribers should connect to, once bound.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// The amount of currently connected subscribers.
    pub fn subscribers(&self) -> usize {
        self.tx.receiver_count()
    }
}

async fn accept_loop(listener: TcpListener, tx: broadcast::Sender<Arc<Encoded>>) {
    let mut subscribers = JoinSet::new();

    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, addr)) => {
                    // Subscribe before spawning so nothing published after accept is lost.
                    let updates = tx.subscribe();
                    info!("subscriber connected from {addr}");
                    subscribers.spawn(serve_subscriber(stream, addr, updates));
                }
                Err(e) => warn!("failed to accept subscriber: {e}"),
            },
            Some(_) = subscribers.join_next(), if !subscribers.is_empty() => {
                debug!(subscribers = subscribers.len(); "subscriber task finished");
            }
        }
    }
}

async fn serve_subscriber(
    stream: TcpStream,
    addr: SocketAddr,
    mut updates: broadcast::Receiver<Arc<Encoded>>,
) {
    if let Err(e) = forward(stream, &mut updates).await {
        info!("subscriber {addr} disconnected: {e}");
    }
}

async fn forward(
    stream: TcpStream,
    updates: &mut broadcast::Receiver<Arc<Encoded>>,
) -> io::Result<()> {
    stream.set_nodelay(true)?;
    let (rx, tx) = stream.into_split();
    let (_, mut tx) = comms::channel(rx, tx);

    loop {
        match updates.recv().await {
            Ok(frame) => tx.send(&*frame).await?,
            Err(RecvError::Lagged(skipped)) => {
                warn!(skipped = skipped; "subscriber fell behind, skipping broadcasts")
            }
            Err(RecvError::Closed) => return Ok(()),
        }
    }
}
