//! The networked KV backend.
//!
//! A [`KvStore`] is a client of a [`KvServer`] reachable over TCP. Values are
//! serialized and optionally compressed before they cross the wire; the codec
//! settings are not chosen per client but read from the reserved
//! `client_config` key the server installed for its data directory, so every
//! client of one backend instance encodes identically.

pub mod protocol;
pub mod server;

use std::{
    net::TcpStream,
    sync::Mutex,
};

use rayon::prelude::*;

pub use server::KvServer;

use crate::{
    codec::{compression::Compressor, serialization::Serializer},
    config::{ClientConfig, CLIENT_CONFIG_KEY, SERVER_CONFIG_KEY},
    key::RecordKey,
    record::{Record, RecordValue},
    store::{
        kv::protocol::{read_response, write_request, Request, Response, ValueKind},
        Store, StoreError,
    },
};

#[derive(Debug)]
struct Connection {
    stream: Mutex<TcpStream>,
    serializer: Serializer,
    compressor: Compressor,
    parallel_deserialization: bool,
}

/// A [`Store`] backed by a [`KvServer`].
///
/// `set` keys hold one value; `append` keys hold an ordered list with one
/// element per appended value. Array appends do not accumulate into a chunked
/// dataset here: every appended value is one encoded list element.
#[derive(Debug)]
pub struct KvStore {
    host: String,
    port: u16,
    connection: Option<Connection>,
    closed: bool,
}

impl KvStore {
    /// Create a client for the backend at `host:port`. No connection is made
    /// until [`connect`](Store::connect).
    #[must_use]
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            connection: None,
            closed: false,
        }
    }

    /// Create a client for a backend on the local host.
    #[must_use]
    pub fn localhost(port: u16) -> Self {
        Self::new("127.0.0.1", port)
    }

    fn connection(&self) -> Result<&Connection, StoreError> {
        self.connection.as_ref().ok_or(StoreError::NotConnected)
    }

    fn request(&self, request: &Request) -> Result<Response, StoreError> {
        let connection = self.connection()?;
        let mut stream = connection.stream.lock().unwrap();
        write_request(&mut *stream, request)?;
        match read_response(&mut *stream)? {
            Response::Error(message) => Err(StoreError::Protocol(message)),
            response => Ok(response),
        }
    }

    fn check_key(&self, key: &str) -> Result<RecordKey, StoreError> {
        if key == SERVER_CONFIG_KEY || key == CLIENT_CONFIG_KEY {
            return Err(StoreError::ReservedKey(key.to_string()));
        }
        Ok(RecordKey::new(key)?)
    }

    fn encode(&self, value: &RecordValue) -> Result<Vec<u8>, StoreError> {
        let connection = self.connection()?;
        let bytes = connection.serializer.encode(value)?;
        Ok(connection.compressor.compress(&bytes)?)
    }

    fn decode(&self, bytes: &[u8]) -> Result<RecordValue, StoreError> {
        let connection = self.connection()?;
        let bytes = connection.compressor.decompress(bytes)?;
        Ok(connection.serializer.decode(&bytes)?)
    }
}

impl Store for KvStore {
    fn connect(&mut self) -> Result<(), StoreError> {
        if self.closed {
            return Err(StoreError::NotConnected);
        }
        if self.connection.is_some() {
            return Ok(());
        }
        let mut stream = TcpStream::connect((self.host.as_str(), self.port))?;
        write_request(&mut stream, &Request::Ping)?;
        match read_response(&mut stream)? {
            Response::Pong => {}
            other => {
                return Err(StoreError::Protocol(format!(
                    "unexpected handshake reply: {other:?}"
                )))
            }
        }
        write_request(&mut stream, &Request::Get(CLIENT_CONFIG_KEY.to_string()))?;
        let config: ClientConfig = match read_response(&mut stream)? {
            Response::Value(bytes) => serde_json::from_slice(&bytes).map_err(|err| {
                StoreError::InvalidMetadata(CLIENT_CONFIG_KEY.to_string(), err.to_string())
            })?,
            Response::Nil => {
                return Err(StoreError::UninitializedBackend(format!(
                    "{}:{}",
                    self.host, self.port
                )))
            }
            other => {
                return Err(StoreError::Protocol(format!(
                    "unexpected configuration reply: {other:?}"
                )))
            }
        };
        self.connection = Some(Connection {
            stream: Mutex::new(stream),
            serializer: Serializer::new(config.serialization),
            compressor: Compressor::new(config.use_compression),
            parallel_deserialization: config.use_multiprocess_deserialization,
        });
        Ok(())
    }

    fn set(&mut self, key: &str, value: &RecordValue) -> Result<(), StoreError> {
        let key = self.check_key(key)?;
        let blob = self.encode(value)?;
        match self.request(&Request::Set(key.as_str().to_string(), blob))? {
            Response::Ok => Ok(()),
            other => Err(StoreError::Protocol(format!(
                "unexpected set reply: {other:?}"
            ))),
        }
    }

    fn get(&self, key: &str) -> Result<Option<Record>, StoreError> {
        let key = self.check_key(key)?;
        match self.request(&Request::Get(key.as_str().to_string())) {
            Ok(Response::Value(bytes)) => Ok(Some(Record::Value(self.decode(&bytes)?))),
            Ok(Response::Nil) => Ok(None),
            Ok(other) => Err(StoreError::Protocol(format!(
                "unexpected get reply: {other:?}"
            ))),
            Err(StoreError::Protocol(_)) => Err(StoreError::WrongKeyType {
                key: key.as_str().to_string(),
                kind: "sequence".to_string(),
            }),
            Err(err) => Err(err),
        }
    }

    fn append(&mut self, key: &str, value: &RecordValue) -> Result<(), StoreError> {
        let key = self.check_key(key)?;
        let blob = self.encode(value)?;
        match self.request(&Request::Rpush(key.as_str().to_string(), blob)) {
            Ok(Response::Ok) => Ok(()),
            Ok(other) => Err(StoreError::Protocol(format!(
                "unexpected append reply: {other:?}"
            ))),
            Err(StoreError::Protocol(_)) => Err(StoreError::WrongKeyType {
                key: key.as_str().to_string(),
                kind: "single value".to_string(),
            }),
            Err(err) => Err(err),
        }
    }

    fn get_all(&self, key: &str) -> Result<Record, StoreError> {
        let key = self.check_key(key)?;
        let kind = match self.request(&Request::Type(key.as_str().to_string()))? {
            Response::Kind(kind) => kind,
            other => {
                return Err(StoreError::Protocol(format!(
                    "unexpected type reply: {other:?}"
                )))
            }
        };
        match kind {
            ValueKind::None => Ok(Record::Sequence(Vec::new())),
            ValueKind::Value => Err(StoreError::WrongKeyType {
                key: key.as_str().to_string(),
                kind: "single value".to_string(),
            }),
            ValueKind::List => {
                let blobs = match self.request(&Request::Lrange(key.as_str().to_string()))? {
                    Response::Values(blobs) => blobs,
                    other => {
                        return Err(StoreError::Protocol(format!(
                            "unexpected range reply: {other:?}"
                        )))
                    }
                };
                let connection = self.connection()?;
                let parallel = connection.parallel_deserialization;
                let blobs = connection.compressor.decompress_batch(&blobs, parallel)?;
                let decode = |bytes: &Vec<u8>| -> Result<RecordValue, StoreError> {
                    Ok(connection.serializer.decode(bytes)?)
                };
                let values = if parallel {
                    blobs.par_iter().map(decode).collect::<Result<Vec<_>, _>>()?
                } else {
                    blobs.iter().map(decode).collect::<Result<Vec<_>, _>>()?
                };
                Ok(Record::Sequence(values))
            }
        }
    }

    fn close(&mut self) -> Result<(), StoreError> {
        self.connection = None;
        self.closed = true;
        Ok(())
    }
}
