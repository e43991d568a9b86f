//! Backend configuration structures for the networked KV backend.
//!
//! A [`KvServer`](crate::store::kv::KvServer) persists these structures under
//! the two reserved keys `server_config` and `client_config` the first time it
//! is started against a fresh data directory. They are stored as plain,
//! uncompressed JSON so that any client can read them before its own codec
//! settings are known. Once written they are read-only for the lifetime of
//! that data directory: every participant observes the same `client_config`,
//! and a later writer's requested settings are discarded with a warning.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// The default port of the networked KV backend.
///
/// This is only a documented default for [`ServerConfig`]; the port is always
/// an explicit configuration field injected at construction. Pass `0` to bind
/// an ephemeral port and recover it with
/// [`KvServer::port`](crate::store::kv::KvServer::port).
pub const DEFAULT_KV_PORT: u16 = 65535;

/// The reserved key holding the serialized [`ServerConfig`].
pub const SERVER_CONFIG_KEY: &str = "server_config";

/// The reserved key holding the serialized [`ClientConfig`].
pub const CLIENT_CONFIG_KEY: &str = "client_config";

/// The serialization algorithm applied to every value stored through the
/// networked KV backend.
///
/// Fixed at backend-configuration time, not per call: the selector is
/// resolved once into a [`Serializer`](crate::codec::serialization::Serializer)
/// when a client connects.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SerializationFormat {
    /// A general-purpose tagged binary format preserving arbitrary value
    /// trees.
    Packed,
    /// A columnar format storing numeric arrays as raw little-endian buffers,
    /// with a tagged fallback for non-array values.
    Columnar,
}

/// Launch parameters of a [`KvServer`](crate::store::kv::KvServer).
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// The directory holding the server's persisted state.
    pub data_directory: PathBuf,
    /// The port to bind. `0` binds an ephemeral port.
    pub port: u16,
    /// Additional launch arguments, recorded for provenance.
    #[serde(default)]
    pub launch_args: Vec<String>,
}

impl ServerConfig {
    /// Create a server configuration for `data_directory` on the
    /// [default port](DEFAULT_KV_PORT).
    #[must_use]
    pub fn new(data_directory: impl Into<PathBuf>) -> Self {
        Self {
            data_directory: data_directory.into(),
            port: DEFAULT_KV_PORT,
            launch_args: Vec::new(),
        }
    }

    /// Set the port to bind.
    #[must_use]
    pub const fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }
}

/// Codec parameters that every client connecting to the same backend
/// instance must honor.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct ClientConfig {
    /// The serialization algorithm.
    pub serialization: SerializationFormat,
    /// Whether values are compressed after serialization.
    pub use_compression: bool,
    /// Whether `get_all` decodes list elements on the parallel worker pool.
    pub use_multiprocess_deserialization: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            serialization: SerializationFormat::Packed,
            use_compression: true,
            use_multiprocess_deserialization: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_config_json() {
        let config = ClientConfig {
            serialization: SerializationFormat::Columnar,
            use_compression: false,
            use_multiprocess_deserialization: true,
        };
        let json = serde_json::to_string(&config).unwrap();
        assert!(json.contains("\"serialization\":\"columnar\""));
        let roundtrip: ClientConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(roundtrip, config);
    }

    #[test]
    fn server_config_defaults() {
        let config = ServerConfig::new("/tmp/data");
        assert_eq!(config.port, DEFAULT_KV_PORT);
        assert!(config.launch_args.is_empty());
        let config = config.with_port(0);
        assert_eq!(config.port, 0);
    }
}
