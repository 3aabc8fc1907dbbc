//! Cluster configuration.
//!
//! The cluster is described by a YAML document listing every node:
//!
//! ```yaml
//! servers:
//!   - serverId: 0
//!     host: localhost
//!     port: "8080"
//!   - serverId: 1
//!     host: localhost
//!     port: "8081"
//! ```
//!
//! The server id doubles as the partition bucket the node owns, so ids must cover `0..count`
//! exactly and the count must be a power of two.

use std::error::Error;
use std::fmt;
use std::fmt::Display;
use std::fs;
use std::io;
use std::path::Path;

use serde::{Deserialize, Deserializer, Serialize};

use crate::partition::{Partitioner, MAX_NODES};

/// Configuration error.
#[derive(Debug)]
pub enum ConfigError {
    /// Configuration file reading error.
    IO(io::Error),
    /// Configuration document format error.
    Parse(serde_yaml::Error),
    /// No servers listed.
    EmptyCluster,
    /// Server count is not a power of two or is too large.
    NodeCount(usize),
    /// The same server id is listed more than once.
    DuplicateServer(usize),
    /// Server id falls outside of the `0..count` range.
    UnknownServer(usize),
    /// The local server id is not listed.
    MissingServer(usize),
}

impl Error for ConfigError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match &self {
            ConfigError::IO(err) => Some(err),
            ConfigError::Parse(err) => Some(err),
            _ => None,
        }
    }
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self {
            ConfigError::IO(err) => write!(f, "configuration file not read: {}", err),
            ConfigError::Parse(err) => write!(f, "configuration format error: {}", err),
            ConfigError::EmptyCluster => write!(f, "no servers configured"),
            ConfigError::NodeCount(count) => write!(
                f,
                "server count must be a power of two not exceeding {} (got {})",
                MAX_NODES, count
            ),
            ConfigError::DuplicateServer(id) => write!(f, "server {} is listed more than once", id),
            ConfigError::UnknownServer(id) => write!(f, "server id {} is out of the partition range", id),
            ConfigError::MissingServer(id) => write!(f, "server {} is not listed in the configuration", id),
        }
    }
}

/// Single cluster node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(rename = "serverId")]
    pub server_id: usize,
    pub host: String,
    #[serde(deserialize_with = "port_from_yaml")]
    pub port: String,
}

impl ServerConfig {
    /// Returns `host:port` address of the node.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

// ports are usually quoted but a bare number is accepted too
fn port_from_yaml<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Port {
        Text(String),
        Number(u16),
    }

    Ok(match Port::deserialize(deserializer)? {
        Port::Text(port) => port,
        Port::Number(port) => port.to_string(),
    })
}

/// Whole cluster. Immutable once loaded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerConfigs {
    pub servers: Vec<ServerConfig>,
}

impl ServerConfigs {
    /// Reads a cluster configuration file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(ConfigError::IO)?;
        let configs = Self::from_yaml(&content)?;

        log::info!("loaded {} server configs from {}", configs.servers.len(), path.display());

        return Ok(configs);
    }

    /// Parses a cluster configuration document.
    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        serde_yaml::from_str(content).map_err(ConfigError::Parse)
    }

    /// Checks that the cluster forms a valid partition space containing `server_id`.
    /// Returns the partitioner for the cluster.
    pub fn validate(&self, server_id: usize) -> Result<Partitioner, ConfigError> {
        if self.servers.is_empty() {
            return Err(ConfigError::EmptyCluster);
        }

        let count = self.servers.len();
        let partitioner = Partitioner::new(count)?;

        let mut seen = vec![false; count];
        for server in &self.servers {
            if server.server_id >= count {
                return Err(ConfigError::UnknownServer(server.server_id));
            }
            if seen[server.server_id] {
                return Err(ConfigError::DuplicateServer(server.server_id));
            }
            seen[server.server_id] = true;
        }

        if server_id >= count {
            return Err(ConfigError::MissingServer(server_id));
        }

        return Ok(partitioner);
    }

    /// Returns the node with the given id.
    pub fn get(&self, server_id: usize) -> Option<&ServerConfig> {
        self.servers.iter().find(|server| server.server_id == server_id)
    }

    /// Returns every node except `server_id`.
    pub fn peers(&self, server_id: usize) -> impl Iterator<Item = &ServerConfig> {
        self.servers.iter().filter(move |server| server.server_id != server_id)
    }
}

#[cfg(test)]
mod test {
    use std::io::Write;

    use rstest::*;

    use super::{ConfigError, ServerConfig, ServerConfigs};

    fn cluster(ids: &[usize]) -> ServerConfigs {
        ServerConfigs {
            servers: Vec::from_iter(ids.iter().map(|id| ServerConfig {
                server_id: *id,
                host: "localhost".to_string(),
                port: format!("{}", 9000 + id),
            })),
        }
    }

    #[test]
    fn test_parse() {
        let content = r#"
servers:
  - serverId: 0
    host: "localhost"
    port: "8080"
  - serverId: 1
    host: "10.0.0.2"
    port: 8081
"#;
        let configs = ServerConfigs::from_yaml(content).unwrap();

        assert_eq!(configs.servers.len(), 2);
        assert_eq!(configs.get(0).unwrap().address(), "localhost:8080");
        assert_eq!(configs.get(1).unwrap().address(), "10.0.0.2:8081");
        assert!(configs.get(2).is_none());
        assert_eq!(Vec::from_iter(configs.peers(0).map(|s| s.server_id)), vec![1]);
    }

    #[test]
    fn test_load() {
        let mut file = tempfile::NamedTempFile::new_in("./").unwrap();
        file.write_all(b"servers:\n  - serverId: 0\n    host: localhost\n    port: \"7000\"\n")
            .unwrap();

        let configs = ServerConfigs::load(file.path()).unwrap();
        assert_eq!(configs.servers.len(), 1);
        assert_eq!(configs.get(0).unwrap().address(), "localhost:7000");
    }

    #[test]
    fn test_malformed() {
        assert!(matches!(
            ServerConfigs::from_yaml("servers: [{serverId: x}]"),
            Err(ConfigError::Parse(_))
        ));
        assert!(matches!(
            ServerConfigs::load(std::path::Path::new("./no-such-config.yaml")),
            Err(ConfigError::IO(_))
        ));
    }

    #[rstest]
    #[case(&[0], 0)]
    #[case(&[1, 0], 1)]
    #[case(&[3, 1, 2, 0], 2)]
    fn test_valid(#[case] ids: &[usize], #[case] server_id: usize) {
        let partitioner = cluster(ids).validate(server_id).unwrap();
        assert_eq!(partitioner.node_count(), ids.len());
    }

    #[test]
    fn test_invalid() {
        assert!(matches!(cluster(&[]).validate(0), Err(ConfigError::EmptyCluster)));
        assert!(matches!(cluster(&[0, 1, 2]).validate(0), Err(ConfigError::NodeCount(3))));
        assert!(matches!(cluster(&[0, 0]).validate(0), Err(ConfigError::DuplicateServer(0))));
        assert!(matches!(cluster(&[0, 2]).validate(0), Err(ConfigError::UnknownServer(2))));
        assert!(matches!(cluster(&[0, 1]).validate(2), Err(ConfigError::MissingServer(2))));
    }
}
