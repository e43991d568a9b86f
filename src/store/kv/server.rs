//! The networked KV engine process.
//!
//! A [`KvServer`] owns the keyspace of the networked backend: a flat map from
//! keys to either a single value or an ordered list, held in memory and
//! snapshotted to the configured data directory on shutdown. Clients speak
//! the framed protocol of [`super::protocol`] over TCP.
//!
//! Starting a server against a data directory that already holds a client
//! configuration keeps the stored configuration and discards the newly
//! requested one with a warning, so every client of that directory observes
//! the same codec settings regardless of start order.

use std::{
    collections::HashMap,
    io::{BufReader, BufWriter},
    net::{Ipv4Addr, SocketAddr, TcpListener, TcpStream},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex,
    },
    thread::JoinHandle,
};

use serde::{Deserialize, Serialize};

use crate::{
    config::{ClientConfig, ServerConfig, CLIENT_CONFIG_KEY, SERVER_CONFIG_KEY},
    store::{
        kv::protocol::{read_request, write_response, Request, Response, ValueKind},
        StoreError,
    },
};

const SNAPSHOT_FILE: &str = "kv.snapshot";

/// One stored key.
#[derive(Clone, Debug, Serialize, Deserialize)]
enum Entry {
    Value(Vec<u8>),
    List(Vec<Vec<u8>>),
}

type State = Arc<Mutex<HashMap<String, Entry>>>;

/// The networked KV engine.
///
/// Binds a TCP listener on start, serves requests from handler threads, and
/// persists its keyspace to `kv.snapshot` in the data directory on stop.
#[derive(Debug)]
pub struct KvServer {
    server_config: ServerConfig,
    client_config: ClientConfig,
    state: State,
    listener_thread: Option<JoinHandle<()>>,
    shutdown: Arc<AtomicBool>,
    bound_port: Option<u16>,
}

impl KvServer {
    /// Create a server for `server_config`, requesting `client_config` as the
    /// codec settings of a fresh data directory.
    #[must_use]
    pub fn new(server_config: ServerConfig, client_config: ClientConfig) -> Self {
        Self {
            server_config,
            client_config,
            state: Arc::new(Mutex::new(HashMap::new())),
            listener_thread: None,
            shutdown: Arc::new(AtomicBool::new(false)),
            bound_port: None,
        }
    }

    /// The port the listener is bound to.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotConnected`] if the server has not been
    /// started.
    pub fn port(&self) -> Result<u16, StoreError> {
        self.bound_port.ok_or(StoreError::NotConnected)
    }

    /// Bind the listener, restore the persisted keyspace, and begin serving.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::AlreadyRunning`] if the configured port is
    /// taken, or another [`StoreError`] if the data directory or snapshot
    /// cannot be read.
    pub fn start(&mut self) -> Result<(), StoreError> {
        if self.listener_thread.is_some() {
            return Ok(());
        }
        let listener =
            match TcpListener::bind((Ipv4Addr::LOCALHOST, self.server_config.port)) {
                Ok(listener) => listener,
                Err(err) if err.kind() == std::io::ErrorKind::AddrInUse => {
                    return Err(StoreError::AlreadyRunning(self.server_config.port))
                }
                Err(err) => return Err(err.into()),
            };
        self.bound_port = Some(listener.local_addr()?.port());

        std::fs::create_dir_all(&self.server_config.data_directory)?;
        self.restore_snapshot()?;
        self.install_config()?;
        // The negotiated configuration must survive a crash before the first
        // clean stop, or the next generation would renegotiate from scratch.
        self.write_snapshot()?;

        self.shutdown.store(false, Ordering::SeqCst);
        log::debug!(
            "kv server listening on port {}",
            self.bound_port.unwrap_or(0)
        );
        let state = Arc::clone(&self.state);
        let shutdown = Arc::clone(&self.shutdown);
        self.listener_thread = Some(std::thread::spawn(move || {
            for stream in listener.incoming() {
                if shutdown.load(Ordering::SeqCst) {
                    break;
                }
                let Ok(stream) = stream else { continue };
                let state = Arc::clone(&state);
                std::thread::spawn(move || {
                    if let Err(err) = serve_connection(&stream, &state) {
                        log::debug!("connection ended with error: {err}");
                    }
                });
            }
        }));
        Ok(())
    }

    /// Stop serving and write the keyspace snapshot.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] if the snapshot cannot be written.
    pub fn stop(&mut self) -> Result<(), StoreError> {
        let Some(thread) = self.listener_thread.take() else {
            return Ok(());
        };
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(port) = self.bound_port {
            // Wake the accept loop so it observes the shutdown flag.
            let addr = SocketAddr::from((Ipv4Addr::LOCALHOST, port));
            drop(TcpStream::connect(addr));
        }
        let _ = thread.join();
        self.bound_port = None;
        self.write_snapshot()?;
        log::debug!("kv server stopped");
        Ok(())
    }

    fn snapshot_path(&self) -> std::path::PathBuf {
        self.server_config.data_directory.join(SNAPSHOT_FILE)
    }

    fn restore_snapshot(&self) -> Result<(), StoreError> {
        let bytes = match std::fs::read(self.snapshot_path()) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(err) => return Err(err.into()),
        };
        let restored: HashMap<String, Entry> = bincode::deserialize(&bytes)
            .map_err(|err| StoreError::InvalidMetadata(SNAPSHOT_FILE.to_string(), err.to_string()))?;
        *self.state.lock().unwrap() = restored;
        Ok(())
    }

    fn write_snapshot(&self) -> Result<(), StoreError> {
        let state = self.state.lock().unwrap();
        let bytes = bincode::serialize(&*state)
            .map_err(|err| StoreError::Other(err.to_string()))?;
        drop(state);
        std::fs::write(self.snapshot_path(), bytes)?;
        Ok(())
    }

    /// Record the configuration keys, first writer wins.
    fn install_config(&self) -> Result<(), StoreError> {
        let mut state = self.state.lock().unwrap();
        match state.get(CLIENT_CONFIG_KEY) {
            Some(Entry::Value(stored)) => {
                let stored: ClientConfig = serde_json::from_slice(stored).map_err(|err| {
                    StoreError::InvalidMetadata(CLIENT_CONFIG_KEY.to_string(), err.to_string())
                })?;
                if stored != self.client_config {
                    log::warn!(
                        "client configuration already set for this data directory; \
                         keeping {stored:?} and ignoring {:?}",
                        self.client_config
                    );
                }
            }
            Some(Entry::List(_)) => {
                return Err(StoreError::InvalidMetadata(
                    CLIENT_CONFIG_KEY.to_string(),
                    "expected a single value".to_string(),
                ))
            }
            None => {
                state.insert(
                    CLIENT_CONFIG_KEY.to_string(),
                    Entry::Value(serde_json::to_vec(&self.client_config)?),
                );
                state.insert(
                    SERVER_CONFIG_KEY.to_string(),
                    Entry::Value(serde_json::to_vec(&self.server_config)?),
                );
            }
        }
        Ok(())
    }
}

impl Drop for KvServer {
    fn drop(&mut self) {
        if self.listener_thread.is_some() {
            if let Err(err) = self.stop() {
                log::error!("failed to stop KV server cleanly: {err}");
            }
        }
    }
}

fn handle_request(request: Request, state: &State) -> Response {
    let mut state = state.lock().unwrap();
    match request {
        Request::Ping => Response::Pong,
        Request::Get(key) => match state.get(&key) {
            Some(Entry::Value(value)) => Response::Value(value.clone()),
            Some(Entry::List(_)) => Response::Error(format!("{key} holds a list")),
            None => Response::Nil,
        },
        Request::Set(key, value) => {
            state.insert(key, Entry::Value(value));
            Response::Ok
        }
        Request::Rpush(key, value) => match state
            .entry(key)
            .or_insert_with(|| Entry::List(Vec::new()))
        {
            Entry::List(values) => {
                values.push(value);
                Response::Ok
            }
            Entry::Value(_) => Response::Error("key holds a single value".to_string()),
        },
        Request::Lrange(key) => match state.get(&key) {
            Some(Entry::List(values)) => Response::Values(values.clone()),
            Some(Entry::Value(_)) => Response::Error(format!("{key} holds a single value")),
            None => Response::Values(Vec::new()),
        },
        Request::Type(key) => Response::Kind(match state.get(&key) {
            Some(Entry::Value(_)) => ValueKind::Value,
            Some(Entry::List(_)) => ValueKind::List,
            None => ValueKind::None,
        }),
    }
}

fn serve_connection(stream: &TcpStream, state: &State) -> std::io::Result<()> {
    let mut reader = BufReader::new(stream.try_clone()?);
    let mut writer = BufWriter::new(stream);
    while let Some(request) = read_request(&mut reader)? {
        write_response(&mut writer, &handle_request(request, state))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::io::{BufReader, BufWriter};
    use std::net::TcpStream;

    use crate::store::kv::protocol::{read_response, write_request};

    use super::*;

    fn roundtrip(stream: &TcpStream, request: &Request) -> Response {
        let mut writer = BufWriter::new(stream.try_clone().unwrap());
        write_request(&mut writer, request).unwrap();
        drop(writer);
        read_response(&mut BufReader::new(stream)).unwrap()
    }

    #[test]
    fn serves_requests_over_tcp() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut server = KvServer::new(
            ServerConfig::new(dir.path()).with_port(0),
            ClientConfig::default(),
        );
        server.start().unwrap();
        let port = server.port().unwrap();
        let stream = TcpStream::connect((Ipv4Addr::LOCALHOST, port)).unwrap();

        assert_eq!(roundtrip(&stream, &Request::Ping), Response::Pong);
        assert_eq!(
            roundtrip(&stream, &Request::Set("k".to_string(), vec![1, 2])),
            Response::Ok
        );
        assert_eq!(
            roundtrip(&stream, &Request::Get("k".to_string())),
            Response::Value(vec![1, 2])
        );
        assert_eq!(
            roundtrip(&stream, &Request::Get("missing".to_string())),
            Response::Nil
        );
        for i in 0..3u8 {
            assert_eq!(
                roundtrip(&stream, &Request::Rpush("l".to_string(), vec![i])),
                Response::Ok
            );
        }
        assert_eq!(
            roundtrip(&stream, &Request::Lrange("l".to_string())),
            Response::Values(vec![vec![0], vec![1], vec![2]])
        );
        assert_eq!(
            roundtrip(&stream, &Request::Type("l".to_string())),
            Response::Kind(ValueKind::List)
        );
        assert_eq!(
            roundtrip(&stream, &Request::Type("nope".to_string())),
            Response::Kind(ValueKind::None)
        );
        server.stop().unwrap();
    }

    #[test]
    fn snapshot_survives_restart() {
        let dir = tempfile::TempDir::new().unwrap();
        let config = ServerConfig::new(dir.path()).with_port(0);
        let mut server = KvServer::new(config.clone(), ClientConfig::default());
        server.start().unwrap();
        let stream =
            TcpStream::connect((Ipv4Addr::LOCALHOST, server.port().unwrap())).unwrap();
        roundtrip(&stream, &Request::Set("persisted".to_string(), vec![7]));
        drop(stream);
        server.stop().unwrap();

        let mut server = KvServer::new(config, ClientConfig::default());
        server.start().unwrap();
        let stream =
            TcpStream::connect((Ipv4Addr::LOCALHOST, server.port().unwrap())).unwrap();
        assert_eq!(
            roundtrip(&stream, &Request::Get("persisted".to_string())),
            Response::Value(vec![7])
        );
        server.stop().unwrap();
    }

    #[test]
    fn config_survives_an_unclean_shutdown() {
        let dir = tempfile::TempDir::new().unwrap();
        let first = ClientConfig {
            serialization: crate::config::SerializationFormat::Columnar,
            use_compression: false,
            use_multiprocess_deserialization: false,
        };
        let mut server = KvServer::new(ServerConfig::new(dir.path()).with_port(0), first);
        server.start().unwrap();
        assert!(dir.path().join(SNAPSHOT_FILE).exists());
        // Crash: no stop(), no final snapshot.
        std::mem::forget(server);

        let mut server = KvServer::new(
            ServerConfig::new(dir.path()).with_port(0),
            ClientConfig::default(),
        );
        server.start().unwrap();
        let stream =
            TcpStream::connect((Ipv4Addr::LOCALHOST, server.port().unwrap())).unwrap();
        let Response::Value(bytes) =
            roundtrip(&stream, &Request::Get(CLIENT_CONFIG_KEY.to_string()))
        else {
            panic!("expected the stored configuration");
        };
        let stored: ClientConfig = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(stored, first);
        server.stop().unwrap();
    }

    #[test]
    fn occupied_port_is_already_running() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut first = KvServer::new(
            ServerConfig::new(dir.path()).with_port(0),
            ClientConfig::default(),
        );
        first.start().unwrap();
        let port = first.port().unwrap();
        let mut second = KvServer::new(
            ServerConfig::new(dir.path()).with_port(port),
            ClientConfig::default(),
        );
        assert!(matches!(
            second.start(),
            Err(StoreError::AlreadyRunning(p)) if p == port
        ));
        first.stop().unwrap();
    }
}
