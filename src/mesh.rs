//! Inbound side of the mesh.
//!
//! The listener accepts one connection per peer and spawns a handler thread for each of them.
//! Handlers decode frames and forward them into the coordinator's event channel until the peer
//! sends its completion marker. Peers are not identified: every connection is handled the same.

use std::io;
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::mpsc::SyncSender;
use std::thread;

use log;

use crate::exchange::ExchangeError;
use crate::record::{read_frame, Frame, Record};

/// Event delivered to the exchange coordinator.
#[derive(Debug)]
pub enum MeshEvent {
    /// A record received from some peer.
    Record(Record),
    /// Some peer finished sending to this node.
    Complete,
    /// Outbound transfer to the peer finished, carrying the number of records sent.
    Sent(usize, usize),
    /// Fatal error in one of the exchange threads.
    Failed(ExchangeError),
}

/// Listener for inbound peer connections.
pub struct MeshListener {
    listener: TcpListener,
}

impl MeshListener {
    /// Binds the listener to `address`.
    pub fn bind(address: &str) -> Result<Self, ExchangeError> {
        let listener = TcpListener::bind(address).map_err(|err| ExchangeError::Listen(address.to_string(), err))?;
        log::info!("listening for peers on {}", address);

        return Ok(MeshListener { listener });
    }

    /// Wraps an already bound listener.
    pub fn from_listener(listener: TcpListener) -> Self {
        MeshListener { listener }
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Starts accepting exactly `connections` peers in the background.
    ///
    /// Every decoded frame is forwarded to `events`, completion markers included.
    /// Accept and decoding errors are forwarded as [`MeshEvent::Failed`].
    pub fn start(self, connections: usize, events: SyncSender<MeshEvent>) -> Result<(), ExchangeError> {
        if connections == 0 {
            return Ok(());
        }

        thread::Builder::new()
            .name("mesh-accept".into())
            .spawn(move || self.accept_loop(connections, events))
            .map_err(ExchangeError::Spawn)?;

        return Ok(());
    }

    fn accept_loop(self, connections: usize, events: SyncSender<MeshEvent>) {
        for _ in 0..connections {
            let (stream, peer) = match self.listener.accept() {
                Ok(accepted) => accepted,
                Err(err) => {
                    let _ = events.send(MeshEvent::Failed(ExchangeError::Accept(err)));
                    return;
                }
            };
            log::debug!("accepted connection from {}", peer);

            let handler_events = events.clone();
            let spawned = thread::Builder::new()
                .name(format!("mesh-conn-{}", peer))
                .spawn(move || handle_connection(stream, peer, handler_events));

            if let Err(err) = spawned {
                let _ = events.send(MeshEvent::Failed(ExchangeError::Spawn(err)));
                return;
            }
        }
    }
}

fn handle_connection(stream: TcpStream, peer: SocketAddr, events: SyncSender<MeshEvent>) {
    let mut reader = io::BufReader::new(stream);
    let mut received = 0usize;

    loop {
        let event = match read_frame(&mut reader) {
            Ok(Frame::Record(record)) => {
                received += 1;
                MeshEvent::Record(record)
            }
            Ok(Frame::Complete) => {
                log::debug!("peer {} completed after {} records", peer, received);
                let _ = events.send(MeshEvent::Complete);
                return;
            }
            Err(err) => {
                let _ = events.send(MeshEvent::Failed(ExchangeError::Receive(peer, err)));
                return;
            }
        };

        // the coordinator is gone, nobody needs the rest of the stream
        if events.send(event).is_err() {
            return;
        }
    }
}
