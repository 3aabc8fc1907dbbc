//! `net-sort` is a distributed partition-exchange sort of fixed-size key/value records.
//!
//! Every node of a cluster starts with a private, unsorted shard of records. Nodes connect into a full
//! TCP mesh, send every record to the node owning its key range, then sort whatever they own and persist
//! it. Concatenating the outputs of all nodes in server id order yields the globally sorted data set.
//!
//! # Overview
//!
//! * **Records:**
//!   a record is a 10-byte key followed by a 90-byte value. On disk records are stored back to back,
//!   on the wire each one is prefixed by a completion flag byte (see [`record`]).
//! * **Partitioning:**
//!   with `2^n` nodes a key is owned by the node whose id equals the top `n` bits of the key's first byte
//!   (see [`Partitioner`]).
//! * **Exchange:**
//!   every node listens for one connection per peer and dials every peer, retrying until the peer is up.
//!   Each outbound stream ends with a completion marker; a node is done once it has received a marker
//!   from every peer and finished all its own sends (see [`Exchange`]).
//! * **Sorting:**
//!   owned records are sorted in parallel by unsigned byte-wise key comparison (see [`RecordSorter`]).
//!
//! # Example
//!
//! ```no_run
//! use std::fs;
//! use std::io;
//! use std::path::Path;
//!
//! use net_sort::{ExchangeBuilder, Record, RecordReader, RecordSorter, ServerConfigs};
//!
//! fn main() {
//!     let configs = ServerConfigs::load(Path::new("cluster.yaml")).unwrap();
//!     let exchange = ExchangeBuilder::new(configs, 0).build().unwrap();
//!
//!     let input = io::BufReader::new(fs::File::open("input.bin").unwrap());
//!     let records: Vec<Record> = RecordReader::new(input).collect::<Result<_, _>>().unwrap();
//!
//!     let owned = exchange.run(records).unwrap();
//!     let sorted = RecordSorter::new(None).unwrap().sort(owned);
//!
//!     net_sort::persist_to_path(&sorted, Path::new("output.bin")).unwrap();
//! }
//! ```

pub mod config;
pub mod exchange;
pub mod mesh;
pub mod partition;
pub mod record;
pub mod sender;
pub mod sort;

pub use config::{ConfigError, ServerConfig, ServerConfigs};
pub use exchange::{Exchange, ExchangeBuilder, ExchangeError};
pub use mesh::{MeshEvent, MeshListener};
pub use partition::Partitioner;
pub use record::{Frame, Record, RecordError, RecordReader};
pub use sender::{PeerSender, RetryPolicy};
pub use sort::{persist, persist_to_path, RecordSorter, SortError};
