#![allow(dead_code)]

use portidb_core::{
    db::{Connection, EventSource, EventType, Factory, RequestResult, Transaction},
    error::DomError,
    key::Key,
    proto::{StoreParameters, Write, WriteLog},
    rpc::MessageChannel,
    task::TokioSpawn,
    value::Value,
};
use portidb_host::{HostConfig, MemoryHost};
use std::{collections::BTreeMap, future::Future, rc::Rc};
use tokio::task::LocalSet;

///
/// Harness
///
/// An engine factory wired to an in-memory host over a message channel.
///

pub struct Harness {
    pub factory: Factory,
    pub host: MemoryHost,
}

/// Build a harness. Must run inside a `LocalSet`.
pub fn harness() -> Harness {
    harness_with(HostConfig::default())
}

pub fn harness_with(config: HostConfig) -> Harness {
    let (engine_port, host_port) = MessageChannel::new();
    let host = MemoryHost::new(config);
    tokio::task::spawn_local(host.serve(host_port));
    let factory = Factory::new(engine_port, Rc::new(TokioSpawn));

    Harness { factory, host }
}

pub async fn local<F: Future>(fut: F) -> F::Output {
    LocalSet::new().run_until(fut).await
}

/// Open `name` at `version`, running `upgrade` from the `upgradeneeded`
/// event when the stored version is lower.
pub async fn open_with(
    factory: &Factory,
    name: &str,
    version: u64,
    upgrade: impl Fn(&Connection, &Transaction) + 'static,
) -> Result<Connection, DomError> {
    let request = factory.open(name, Some(version))?;
    request.add_listener(EventType::UpgradeNeeded, move |event| {
        let request = event.request().unwrap();
        let connection = request
            .result()
            .and_then(RequestResult::into_connection)
            .unwrap();
        let tx = request.transaction().unwrap();
        upgrade(&connection, &tx);
    });

    Ok(request.await?.into_connection().unwrap())
}

/// Open `name` with a single out-of-line store called `nums`.
pub async fn numbers(factory: &Factory, name: &str) -> Connection {
    open_with(factory, name, 1, |c, _| {
        c.create_object_store("nums", StoreParameters::default())
            .unwrap();
    })
    .await
    .unwrap()
}

/// In-line keys at `id`, generated.
pub fn items() -> StoreParameters {
    StoreParameters {
        key_path: Some("id".into()),
        auto_increment: true,
    }
}

/// Write records straight into the host, bypassing the engine's cache.
pub fn seed(host: &MemoryHost, db: &str, store: &str, records: &[(i32, &str)]) {
    let writes = records
        .iter()
        .map(|(key, value)| Write::Put {
            value: Value::from(*value),
            key: Some(Key::from(*key)),
        })
        .collect();

    host.execute_transaction(WriteLog {
        db_name: db.to_string(),
        ops: BTreeMap::from([(store.to_string(), writes)]),
    })
    .unwrap();
}

pub fn strings(values: &[&str]) -> Vec<Value> {
    values.iter().map(|v| Value::from(*v)).collect()
}

pub fn keys(keys: &[i32]) -> Vec<Key> {
    keys.iter().map(|k| Key::from(*k)).collect()
}
