//! Outbound side of the mesh.

use std::io::{self, prelude::*};
use std::net::{Shutdown, TcpStream};
use std::thread;
use std::time::Duration;

use log;

use crate::config::ServerConfig;
use crate::exchange::ExchangeError;
use crate::record::{write_frame, Frame, Record};

/// Dial retry policy: fixed backoff between attempts, optionally capped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    interval: Duration,
    max_attempts: Option<usize>,
}

impl RetryPolicy {
    /// Retries forever, sleeping `interval` between attempts.
    pub fn unbounded(interval: Duration) -> Self {
        RetryPolicy {
            interval,
            max_attempts: None,
        }
    }

    /// Gives up after `max_attempts` failed attempts, the first dial included.
    pub fn bounded(interval: Duration, max_attempts: usize) -> Self {
        RetryPolicy {
            interval,
            max_attempts: Some(max_attempts.max(1)),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn max_attempts(&self) -> Option<usize> {
        self.max_attempts
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy::unbounded(Duration::from_secs(1))
    }
}

/// Sends a node's share of the local records to a single peer.
pub struct PeerSender {
    peer: ServerConfig,
    retry: RetryPolicy,
}

impl PeerSender {
    pub fn new(peer: ServerConfig, retry: RetryPolicy) -> Self {
        PeerSender { peer, retry }
    }

    /// Dials the peer, retrying according to the policy.
    pub fn connect(&self) -> Result<TcpStream, ExchangeError> {
        let address = self.peer.address();
        let mut attempts = 0usize;

        loop {
            match TcpStream::connect(&address) {
                Ok(stream) => {
                    log::info!("connected to server {} ({})", self.peer.server_id, address);
                    return Ok(stream);
                }
                Err(err) => {
                    attempts += 1;
                    if let Some(max_attempts) = self.retry.max_attempts {
                        if attempts >= max_attempts {
                            return Err(ExchangeError::Connect(address, err));
                        }
                    }
                    log::debug!(
                        "connection to server {} ({}) failed (attempt {}): {}",
                        self.peer.server_id,
                        address,
                        attempts,
                        err
                    );
                    thread::sleep(self.retry.interval);
                }
            }
        }
    }

    /// Connects to the peer and streams `records` followed by a completion marker.
    /// Returns the number of records sent.
    pub fn send(&self, records: Vec<Record>) -> Result<usize, ExchangeError> {
        let stream = self.connect()?;
        let count = records.len();

        self.transmit(&stream, records)
            .map_err(|err| ExchangeError::Write(self.peer.address(), err))?;

        log::info!("sent {} records to server {}", count, self.peer.server_id);

        return Ok(count);
    }

    fn transmit(&self, stream: &TcpStream, records: Vec<Record>) -> io::Result<()> {
        let mut writer = io::BufWriter::new(stream);
        for record in records.into_iter() {
            write_frame(&mut writer, &Frame::Record(record))?;
        }
        write_frame(&mut writer, &Frame::Complete)?;
        writer.flush()?;

        stream.shutdown(Shutdown::Write)
    }
}
