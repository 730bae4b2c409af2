//! Module: host
//! Responsibility: the privileged side of the protocol over the in-memory
//! model: one handler per method, wired into a `Router`.
//! Does not own: record semantics (see `model`).
//! Boundary: handlers run one at a time; a failing method leaves the
//! stored databases unchanged.

use crate::{
    config::HostConfig,
    error::HostError,
    model::{CursorStep, HostDb},
};
use portidb_core::{
    error::DomError,
    key::KeyRange,
    proto::{
        CloseDatabase, DatabaseInfo, DeleteDatabase, ExecuteRead, ExecuteTransaction, GetDbInfo,
        GetDbStores, NameParams, OpenDatabase, OpenParams, OpenedDatabase, ReadCall, ReadParams,
        RemoteError, SerializedQuery, StoreDescriptor, WriteLog,
    },
    rpc::{MessagePort, Router},
};
use serde::Serialize;
use std::{
    cell::RefCell,
    collections::{BTreeMap, BTreeSet},
    future::{Future, Ready, ready},
    rc::Rc,
};
use tracing::{debug, info, warn};

///
/// MemoryHost
///
/// Holds every database in memory. Cloning shares the same state, so a
/// test can keep a handle while the router serves another.
///

#[derive(Clone, Debug, Default)]
pub struct MemoryHost {
    inner: Rc<HostInner>,
}

#[derive(Debug, Default)]
struct HostInner {
    config: HostConfig,
    databases: RefCell<BTreeMap<String, HostDb>>,
    open: RefCell<BTreeSet<String>>,
}

impl MemoryHost {
    #[must_use]
    pub fn new(config: HostConfig) -> Self {
        Self {
            inner: Rc::new(HostInner {
                config,
                ..HostInner::default()
            }),
        }
    }

    #[must_use]
    pub fn config(&self) -> &HostConfig {
        &self.inner.config
    }

    /// A router answering every protocol method from this host.
    #[must_use]
    pub fn router(&self) -> Router {
        Router::new()
            .route::<GetDbInfo, _, _>(self.handler(|host, ()| Ok(host.database_infos())))
            .route::<GetDbStores, _, _>(self.handler(|host, p: NameParams| host.stores(&p.name)))
            .route::<OpenDatabase, _, _>(self.handler(|host, p: OpenParams| host.open_database(p)))
            .route::<CloseDatabase, _, _>(self.handler(|host, p: NameParams| {
                host.close_database(&p.name);
                Ok(())
            }))
            .route::<DeleteDatabase, _, _>(self.handler(|host, p: NameParams| {
                host.delete_database(&p.name);
                Ok(())
            }))
            .route::<ExecuteRead, _, _>(self.handler(|host, p: ReadParams| host.execute_read(p)))
            .route::<ExecuteTransaction, _, _>(
                self.handler(|host, log: WriteLog| host.execute_transaction(log)),
            )
    }

    /// Serve `port` until the engine closes it.
    pub fn serve(&self, port: MessagePort) -> impl Future<Output = ()> + use<> {
        self.router().serve(port)
    }

    fn handler<P, T>(
        &self,
        f: impl Fn(&Self, P) -> Result<T, HostError> + 'static,
    ) -> impl Fn(P) -> Ready<Result<T, RemoteError>> + 'static {
        let host = self.clone();

        move |params| ready(f(&host, params).map_err(RemoteError::from))
    }

    ///
    /// METHODS
    ///

    /// `getDbInfo`: every database in this host's namespace.
    #[must_use]
    pub fn database_infos(&self) -> Vec<DatabaseInfo> {
        let config = &self.inner.config;

        self.inner
            .databases
            .borrow()
            .iter()
            .filter_map(|(stored, db)| {
                config.unqualify(stored).map(|name| DatabaseInfo {
                    name: name.to_string(),
                    version: db.version,
                })
            })
            .collect()
    }

    /// `getIDBDBStores`
    pub fn stores(&self, name: &str) -> Result<Vec<StoreDescriptor>, HostError> {
        let databases = self.inner.databases.borrow();

        Ok(databases
            .get(&self.inner.config.qualify(name))
            .map(HostDb::descriptors)
            .unwrap_or_default())
    }

    /// `openDatabase`: create the database if needed and replay the upgrade
    /// actions on a copy, committed only if all of them apply.
    pub fn open_database(&self, params: OpenParams) -> Result<OpenedDatabase, HostError> {
        let stored = self.inner.config.qualify(&params.name);
        let mut databases = self.inner.databases.borrow_mut();
        let mut db = databases.get(&stored).cloned().unwrap_or_default();

        let current = db.version;
        let requested = params.version.unwrap_or_else(|| current.max(1));
        if requested < current {
            return Err(HostError::VersionTooLow { requested, current });
        }
        db.version = requested;

        let actions = params.do_on_upgrade.len();
        for action in params.do_on_upgrade {
            db.apply_upgrade(action)?;
        }

        let opened = OpenedDatabase {
            object_stores: db.descriptors(),
        };
        databases.insert(stored.clone(), db);
        self.inner.open.borrow_mut().insert(stored);
        info!(db = %params.name, version = requested, actions, "host opened database");

        Ok(opened)
    }

    /// `closeDatabase`
    pub fn close_database(&self, name: &str) {
        let stored = self.inner.config.qualify(name);
        if !self.inner.open.borrow_mut().remove(&stored) {
            debug!(db = name, "close of a database that was not open");
        }
    }

    /// `deleteDatabase`: deleting a missing database succeeds.
    pub fn delete_database(&self, name: &str) {
        let stored = self.inner.config.qualify(name);
        self.inner.open.borrow_mut().remove(&stored);
        if self.inner.databases.borrow_mut().remove(&stored).is_some() {
            info!(db = name, "host deleted database");
        }
    }

    /// `executeReadMethod`. Reads against a database or store that does not
    /// exist yet answer as if it were empty.
    pub fn execute_read(&self, params: ReadParams) -> Result<serde_json::Value, HostError> {
        let databases = self.inner.databases.borrow();
        let store = databases
            .get(&self.inner.config.qualify(&params.db_name))
            .and_then(|db| db.stores.get(&params.store));

        let Some(store) = store else {
            debug!(db = %params.db_name, store = %params.store, "read of a missing store");
            return Ok(empty_result(&params.call));
        };

        match params.call {
            ReadCall::Get { query } => {
                let record = store.records(&query.into(), Some(1)).pop();
                json(record.and_then(|r| r.value))
            }
            ReadCall::GetKey { query } => {
                let record = store.records(&query.into(), Some(1)).pop();
                json(record.map(|r| r.key))
            }
            ReadCall::GetAll { query, count } => {
                let records = store.records(&range(query), count);
                json(records.into_iter().filter_map(|r| r.value).collect::<Vec<_>>())
            }
            ReadCall::GetAllKeys { query, count } => {
                let records = store.records(&range(query), count);
                json(records.into_iter().map(|r| r.key).collect::<Vec<_>>())
            }
            ReadCall::Count { query } => json(store.records(&range(query), None).len()),
            ReadCall::GetAllRecords { query, count } => json(store.records(&range(query), count)),
            ReadCall::GetAllRecordsFromIndex {
                index_name,
                query,
                count,
            } => json(store.index_records(&index_name, &range(query), count)?),
            ReadCall::GetNextFromCursor {
                range: query,
                direction,
                index_name,
                prev_primary_key,
                curr_primary_key,
                just_keys,
            } => json(store.next_from_cursor(&CursorStep {
                range: range(query),
                direction,
                index_name,
                prev_primary_key,
                curr_primary_key,
                just_keys,
            })?),
        }
    }

    /// `executeTransaction`: every write of the log, or none of them.
    pub fn execute_transaction(&self, log: WriteLog) -> Result<(), HostError> {
        let stored = self.inner.config.qualify(&log.db_name);
        let mut databases = self.inner.databases.borrow_mut();
        let Some(current) = databases.get(&stored) else {
            warn!(db = %log.db_name, "write log for a missing database");
            return Err(HostError::Dom(DomError::not_found(format!(
                "database '{}' not found",
                log.db_name
            ))));
        };

        let mut db = current.clone();
        let mut writes = 0;
        for (store, ops) in log.ops {
            let target = db.store_mut(&store)?;
            for op in ops {
                target.apply_write(op)?;
                writes += 1;
            }
        }
        databases.insert(stored, db);
        debug!(db = %log.db_name, writes, "host applied write log");

        Ok(())
    }
}

fn range(query: Option<SerializedQuery>) -> KeyRange {
    query.map(KeyRange::from).unwrap_or_default()
}

fn json(value: impl Serialize) -> Result<serde_json::Value, HostError> {
    serde_json::to_value(value)
        .map_err(|err| HostError::Dom(DomError::unknown(err.to_string())))
}

fn empty_result(call: &ReadCall) -> serde_json::Value {
    match call {
        ReadCall::Get { .. } | ReadCall::GetKey { .. } | ReadCall::GetNextFromCursor { .. } => {
            serde_json::Value::Null
        }
        ReadCall::Count { .. } => serde_json::Value::from(0),
        ReadCall::GetAll { .. }
        | ReadCall::GetAllKeys { .. }
        | ReadCall::GetAllRecords { .. }
        | ReadCall::GetAllRecordsFromIndex { .. } => serde_json::Value::Array(Vec::new()),
    }
}

///
/// TESTS
///

#[cfg(test)]
mod tests {
    use super::*;
    use portidb_core::{
        key::Key,
        proto::{StoreParameters, UpgradeAction, Write},
        value::Value,
    };

    fn open_with_store(host: &MemoryHost, name: &str) {
        host.open_database(OpenParams {
            name: name.into(),
            version: Some(1),
            do_on_upgrade: vec![UpgradeAction::CreateObjectStore {
                name: "items".into(),
                options: StoreParameters::default(),
                do_on_upgrade: Vec::new(),
            }],
        })
        .unwrap();
    }

    fn put(key: i32, value: &str) -> Write {
        Write::Put {
            value: Value::from(value),
            key: Some(Key::from(key)),
        }
    }

    fn log(ops: Vec<Write>) -> WriteLog {
        WriteLog {
            db_name: "notes".into(),
            ops: BTreeMap::from([("items".to_string(), ops)]),
        }
    }

    fn keys(host: &MemoryHost) -> Vec<Key> {
        let value = host
            .execute_read(ReadParams {
                db_name: "notes".into(),
                store: "items".into(),
                call: ReadCall::GetAllKeys {
                    query: None,
                    count: None,
                },
            })
            .unwrap();

        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn database_infos_strip_the_namespace() {
        let host = MemoryHost::new(HostConfig::namespaced("docA"));
        open_with_store(&host, "notes");

        let infos = host.database_infos();
        assert_eq!(infos.len(), 1);
        assert_eq!(infos[0].name, "notes");
        assert_eq!(infos[0].version, 1);
    }

    #[test]
    fn lower_version_is_refused() {
        let host = MemoryHost::default();
        open_with_store(&host, "notes");
        host.open_database(OpenParams {
            name: "notes".into(),
            version: Some(3),
            do_on_upgrade: Vec::new(),
        })
        .unwrap();

        let err = host
            .open_database(OpenParams {
                name: "notes".into(),
                version: Some(2),
                do_on_upgrade: Vec::new(),
            })
            .unwrap_err();
        assert!(matches!(err, HostError::VersionTooLow { requested: 2, current: 3 }));
    }

    #[test]
    fn failed_upgrade_leaves_the_database_unchanged() {
        let host = MemoryHost::default();
        open_with_store(&host, "notes");

        let err = host
            .open_database(OpenParams {
                name: "notes".into(),
                version: Some(2),
                do_on_upgrade: vec![
                    UpgradeAction::DeleteObjectStore {
                        name: "items".into(),
                    },
                    UpgradeAction::DeleteObjectStore {
                        name: "missing".into(),
                    },
                ],
            })
            .unwrap_err();

        assert!(matches!(err, HostError::StoreNotFound(_)));
        assert_eq!(host.database_infos()[0].version, 1);
        assert_eq!(host.stores("notes").unwrap().len(), 1);
    }

    #[test]
    fn write_logs_apply_atomically() {
        let host = MemoryHost::default();
        open_with_store(&host, "notes");
        host.execute_transaction(log(vec![put(1, "a"), put(2, "b")]))
            .unwrap();

        let err = host
            .execute_transaction(log(vec![
                put(3, "c"),
                Write::Add {
                    value: Value::from("dup"),
                    key: Some(Key::from(1)),
                },
            ]))
            .unwrap_err();

        assert!(matches!(err, HostError::DuplicateKey(_)));
        assert_eq!(keys(&host), vec![Key::from(1), Key::from(2)]);
    }

    #[test]
    fn reads_of_a_missing_store_are_empty() {
        let host = MemoryHost::default();

        assert_eq!(keys(&host), Vec::<Key>::new());
    }

    #[test]
    fn errors_carry_dom_names() {
        let remote = RemoteError::from(HostError::StoreNotFound("x".into()));
        assert_eq!(remote.name, "NotFoundError");

        let remote = RemoteError::from(HostError::VersionTooLow {
            requested: 1,
            current: 2,
        });
        assert_eq!(remote.name, "VersionError");
    }
}
