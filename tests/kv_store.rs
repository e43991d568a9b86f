//! End-to-end scenarios against the networked KV backend.

use ndarray::{ArrayD, IxDyn};
use simrec::{
    config::{ClientConfig, SerializationFormat, ServerConfig},
    record::{Record, RecordValue},
    store::{
        kv::{KvServer, KvStore},
        Store, StoreError,
    },
};

fn start_server(dir: &std::path::Path, config: ClientConfig) -> KvServer {
    let mut server = KvServer::new(ServerConfig::new(dir).with_port(0), config);
    server.start().unwrap();
    server
}

fn connect(server: &KvServer) -> KvStore {
    let mut store = KvStore::localhost(server.port().unwrap());
    store.connect().unwrap();
    store
}

#[test]
fn records_arrays_and_scalars_in_order() {
    let dir = tempfile::TempDir::new().unwrap();
    let mut server = start_server(dir.path(), ClientConfig::default());
    let mut store = connect(&server);

    let array = ArrayD::from_shape_vec(IxDyn(&[3, 2]), (0..6).map(|i| i as f32).collect()).unwrap();
    let values = vec![
        RecordValue::Array(array),
        RecordValue::Float(0.5),
        RecordValue::Text("note".to_string()),
    ];
    for value in &values {
        store.append("run/trace", value).unwrap();
    }
    assert_eq!(store.get_all("run/trace").unwrap().values().unwrap(), values);

    store.close().unwrap();
    server.stop().unwrap();
}

#[test]
fn columnar_clients_interoperate() {
    let dir = tempfile::TempDir::new().unwrap();
    let config = ClientConfig {
        serialization: SerializationFormat::Columnar,
        use_compression: true,
        use_multiprocess_deserialization: true,
    };
    let mut server = start_server(dir.path(), config);

    let array =
        ArrayD::from_shape_vec(IxDyn(&[4, 4]), (0..16).map(|i| i as f32).collect()).unwrap();
    let mut writer = connect(&server);
    for _ in 0..8 {
        writer.append("acts", &RecordValue::Array(array.clone())).unwrap();
    }
    writer.close().unwrap();

    // A second client reads with codec settings resolved from the backend,
    // not from anything configured locally.
    let reader = connect(&server);
    let values = reader.get_all("acts").unwrap().values().unwrap();
    assert_eq!(values.len(), 8);
    for value in values {
        assert_eq!(value, RecordValue::Array(array.clone()));
    }
    server.stop().unwrap();
}

#[test]
fn stored_codec_settings_outlive_restart() {
    let dir = tempfile::TempDir::new().unwrap();
    let first = ClientConfig {
        serialization: SerializationFormat::Packed,
        use_compression: false,
        use_multiprocess_deserialization: false,
    };
    {
        let mut server = start_server(dir.path(), first);
        let mut store = connect(&server);
        store.append("metric", &RecordValue::Float(1.0)).unwrap();
        store.close().unwrap();
        server.stop().unwrap();
    }
    // Restart requesting different settings; the first writer's stay.
    let mut server = start_server(dir.path(), ClientConfig::default());
    let mut store = connect(&server);
    store.append("metric", &RecordValue::Float(2.0)).unwrap();
    assert_eq!(
        store.get_all("metric").unwrap().values().unwrap(),
        vec![RecordValue::Float(1.0), RecordValue::Float(2.0)]
    );
    server.stop().unwrap();
}

#[test]
fn connect_refused_without_server() {
    let mut store = KvStore::localhost(1);
    assert!(store.connect().is_err());
}

#[test]
fn second_server_on_same_port_fails() {
    let dir = tempfile::TempDir::new().unwrap();
    let mut first = start_server(dir.path(), ClientConfig::default());
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

#[test]
fn absent_and_wrong_type_keys() {
    let dir = tempfile::TempDir::new().unwrap();
    let mut server = start_server(dir.path(), ClientConfig::default());
    let mut store = connect(&server);

    assert!(store.get("missing").unwrap().is_none());
    assert!(store.get_all("missing").unwrap().values().unwrap().is_empty());

    store.set("single", &RecordValue::Int(1)).unwrap();
    assert!(matches!(
        store.get_all("single"),
        Err(StoreError::WrongKeyType { .. })
    ));
    let Some(Record::Value(value)) = store.get("single").unwrap() else {
        panic!("expected a single value");
    };
    assert_eq!(value, RecordValue::Int(1));

    server.stop().unwrap();
}
