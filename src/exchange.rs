//! Partition exchange coordinator.
//!
//! The exchange goes through the following phases:
//!
//! 1. `PartitionLocal`: local records are split into one bucket per node;
//! 2. `Exchanging`: the mesh listener is started, then one sender thread per peer;
//! 3. `Draining`: inbound records are accumulated until every peer has sent its completion marker;
//! 4. `Done`: the coordinator waits for every sender to finish before handing the records over.
//!
//! All threads report to the coordinator through a single bounded channel of [`MeshEvent`]s,
//! the coordinator being its only consumer.

use std::error::Error;
use std::fmt;
use std::fmt::Display;
use std::io;
use std::mem;
use std::panic::{self, AssertUnwindSafe};
use std::net::SocketAddr;
use std::sync::mpsc::{self, Receiver, SyncSender};
use std::thread;

use log;

use crate::config::{ConfigError, ServerConfigs};
use crate::mesh::{MeshEvent, MeshListener};
use crate::partition::Partitioner;
use crate::record::{Record, RecordError};
use crate::sender::{PeerSender, RetryPolicy};

/// Exchange error.
#[derive(Debug)]
pub enum ExchangeError {
    /// Listener could not be bound to the node address.
    Listen(String, io::Error),
    /// Inbound connection accepting error.
    Accept(io::Error),
    /// Peer could not be dialed within the retry policy.
    Connect(String, io::Error),
    /// Outbound stream writing error.
    Write(String, io::Error),
    /// Inbound stream reading or decoding error.
    Receive(SocketAddr, RecordError),
    /// Exchange thread could not be started.
    Spawn(io::Error),
    /// Every exchange thread is gone before the exchange finished.
    Disconnected,
    /// Sender thread panicked.
    Panicked(usize),
}

impl Error for ExchangeError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match &self {
            ExchangeError::Listen(_, err) => Some(err),
            ExchangeError::Accept(err) => Some(err),
            ExchangeError::Connect(_, err) => Some(err),
            ExchangeError::Write(_, err) => Some(err),
            ExchangeError::Receive(_, err) => Some(err),
            ExchangeError::Spawn(err) => Some(err),
            ExchangeError::Disconnected => None,
            ExchangeError::Panicked(_) => None,
        }
    }
}

impl Display for ExchangeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self {
            ExchangeError::Listen(address, err) => write!(f, "listening on {} failed: {}", address, err),
            ExchangeError::Accept(err) => write!(f, "accepting peer connection failed: {}", err),
            ExchangeError::Connect(address, err) => write!(f, "connecting to {} failed: {}", address, err),
            ExchangeError::Write(address, err) => write!(f, "sending records to {} failed: {}", address, err),
            ExchangeError::Receive(peer, err) => write!(f, "receiving records from {} failed: {}", peer, err),
            ExchangeError::Spawn(err) => write!(f, "exchange thread not started: {}", err),
            ExchangeError::Disconnected => write!(f, "exchange threads terminated before completion"),
            ExchangeError::Panicked(peer) => write!(f, "sender thread for server {} panicked", peer),
        }
    }
}

/// Exchange phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Init,
    PartitionLocal,
    Exchanging,
    Draining,
    Done,
}

impl Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Init => "init",
            Phase::PartitionLocal => "partition-local",
            Phase::Exchanging => "exchanging",
            Phase::Draining => "draining",
            Phase::Done => "done",
        };
        f.write_str(name)
    }
}

/// Accumulates exchange events.
///
/// Tracks inbound completion markers and finished outbound transfers separately:
/// a node having received everything says nothing about its own sends.
#[derive(Debug)]
pub struct Drain {
    peers: usize,
    completed: usize,
    sent: usize,
    records: Vec<Record>,
}

impl Drain {
    /// Creates a drain expecting `peers` completion markers, seeded with the self-owned records.
    pub fn new(peers: usize, seed: Vec<Record>) -> Self {
        Drain {
            peers,
            completed: 0,
            sent: 0,
            records: seed,
        }
    }

    /// Returns `true` once every peer sent its completion marker.
    pub fn is_drained(&self) -> bool {
        self.completed >= self.peers
    }

    /// Returns `true` once every outbound transfer finished.
    pub fn is_sent(&self) -> bool {
        self.sent >= self.peers
    }

    pub fn completed(&self) -> usize {
        self.completed
    }

    pub fn records(&self) -> &[Record] {
        &self.records
    }

    /// Applies a single event.
    pub fn accept(&mut self, event: MeshEvent) -> Result<(), ExchangeError> {
        match event {
            MeshEvent::Record(record) => self.records.push(record),
            MeshEvent::Complete => {
                self.completed += 1;
                log::info!("{} of {} peers completed", self.completed, self.peers);
            }
            MeshEvent::Sent(peer, count) => {
                self.sent += 1;
                log::debug!("transfer to server {} finished ({} records)", peer, count);
            }
            MeshEvent::Failed(err) => return Err(err),
        }

        return Ok(());
    }

    /// Receives events until `done` holds.
    pub fn receive_until(
        &mut self,
        events: &Receiver<MeshEvent>,
        done: impl Fn(&Drain) -> bool,
    ) -> Result<(), ExchangeError> {
        while !done(&*self) {
            let event = events.recv().map_err(|_| ExchangeError::Disconnected)?;
            self.accept(event)?;
        }

        return Ok(());
    }

    pub fn into_records(self) -> Vec<Record> {
        self.records
    }
}

/// Exchange builder. Provides methods for [`Exchange`] initialization.
#[derive(Clone)]
pub struct ExchangeBuilder {
    /// Cluster description.
    configs: ServerConfigs,
    /// Local server id.
    server_id: usize,
    /// Peer dial retry policy.
    retry: RetryPolicy,
    /// Event channel capacity.
    channel_capacity: usize,
}

impl ExchangeBuilder {
    /// Creates a builder for the node `server_id` of the cluster.
    pub fn new(configs: ServerConfigs, server_id: usize) -> Self {
        ExchangeBuilder {
            configs,
            server_id,
            retry: RetryPolicy::default(),
            channel_capacity: 1024,
        }
    }

    /// Sets peer dial retry policy.
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> ExchangeBuilder {
        self.retry = retry;
        return self;
    }

    /// Sets event channel capacity (in records).
    pub fn with_channel_capacity(mut self, capacity: usize) -> ExchangeBuilder {
        self.channel_capacity = capacity.max(1);
        return self;
    }

    /// Validates the cluster and builds an [`Exchange`] instance.
    pub fn build(self) -> Result<Exchange, ConfigError> {
        let partitioner = self.configs.validate(self.server_id)?;
        let address = self
            .configs
            .get(self.server_id)
            .map(|server| server.address())
            .ok_or(ConfigError::MissingServer(self.server_id))?;

        return Ok(Exchange {
            configs: self.configs,
            server_id: self.server_id,
            address,
            partitioner,
            retry: self.retry,
            channel_capacity: self.channel_capacity,
        });
    }
}

/// Exchange coordinator of a single node.
pub struct Exchange {
    configs: ServerConfigs,
    server_id: usize,
    address: String,
    partitioner: Partitioner,
    retry: RetryPolicy,
    channel_capacity: usize,
}

impl Exchange {
    pub fn server_id(&self) -> usize {
        self.server_id
    }

    pub fn partitioner(&self) -> &Partitioner {
        &self.partitioner
    }

    /// Binds the node listener and runs the exchange.
    /// Returns every record owned by this node, unsorted.
    pub fn run(&self, records: Vec<Record>) -> Result<Vec<Record>, ExchangeError> {
        let listener = MeshListener::bind(&self.address)?;
        self.run_with_listener(listener, records)
    }

    /// Runs the exchange using an already bound listener.
    pub fn run_with_listener(
        &self,
        listener: MeshListener,
        records: Vec<Record>,
    ) -> Result<Vec<Record>, ExchangeError> {
        let peers = self.partitioner.node_count() - 1;
        self.enter(Phase::Init);

        self.enter(Phase::PartitionLocal);
        let mut buckets = self.partitioner.split(records);
        let own = mem::take(&mut buckets[self.server_id]);
        log::info!("{} local records owned by server {}", own.len(), self.server_id);

        self.enter(Phase::Exchanging);
        let (events_tx, events_rx) = mpsc::sync_channel(self.channel_capacity);
        listener.start(peers, events_tx.clone())?;

        let mut senders = Vec::with_capacity(peers);
        for peer in self.configs.peers(self.server_id) {
            let share = mem::take(&mut buckets[peer.server_id]);
            let sender = PeerSender::new(peer.clone(), self.retry);
            let handle = spawn_sender(peer.server_id, events_tx.clone(), move || sender.send(share))?;
            senders.push((peer.server_id, handle));
        }
        // only exchange threads hold senders from now on
        drop(events_tx);

        self.enter(Phase::Draining);
        let mut drain = Drain::new(peers, own);
        drain.receive_until(&events_rx, Drain::is_drained)?;

        self.enter(Phase::Done);
        drain.receive_until(&events_rx, Drain::is_sent)?;
        for (peer, handle) in senders.into_iter() {
            handle.join().map_err(|_| ExchangeError::Panicked(peer))?;
        }

        log::info!("server {} owns {} records", self.server_id, drain.records().len());

        return Ok(drain.into_records());
    }

    fn enter(&self, phase: Phase) {
        log::debug!("server {}: entering {} phase", self.server_id, phase);
    }
}

/// Runs a transfer to `peer` on its own thread and reports its outcome to `events`.
/// A panicking transfer is reported as [`ExchangeError::Panicked`].
fn spawn_sender<F>(
    peer: usize,
    events: SyncSender<MeshEvent>,
    transfer: F,
) -> Result<thread::JoinHandle<()>, ExchangeError>
where
    F: FnOnce() -> Result<usize, ExchangeError> + Send + 'static,
{
    thread::Builder::new()
        .name(format!("sender-{}", peer))
        .spawn(move || {
            let event = match panic::catch_unwind(AssertUnwindSafe(transfer)) {
                Ok(Ok(count)) => MeshEvent::Sent(peer, count),
                Ok(Err(err)) => MeshEvent::Failed(err),
                Err(_) => MeshEvent::Failed(ExchangeError::Panicked(peer)),
            };
            let _ = events.send(event);
        })
        .map_err(ExchangeError::Spawn)
}
