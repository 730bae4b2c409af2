//! Module: db::factory
//! Responsibility: the entry point: opening (and upgrading) databases,
//! deleting them, listing them, and comparing keys.
//! Does not own: transaction execution or record access.
//! Boundary: open and delete requests run one at a time, in call order.

use crate::{
    config::Config,
    db::{
        Connection, Request, RequestResult, Transaction, TransactionMode, TransactionOutcome,
        database::Database,
        event::{Event, EventSource, EventType},
        names::NameList,
        registry::Registry,
        remote::Remote,
        undo::UndoOp,
    },
    error::DomError,
    key::value_to_key,
    proto::{DatabaseInfo, DeleteDatabase, GetDbInfo, GetDbStores, NameParams},
    rpc::{MessagePort, RpcClient},
    task::Spawner,
    value::Value,
};
use futures_channel::mpsc;
use futures_util::{FutureExt, StreamExt, future::LocalBoxFuture};
use std::{cmp::Ordering, fmt, future::Future, rc::Rc};
use tracing::{debug, info, warn};

///
/// Factory
///
/// Opens connections to databases held by the remote at the other end of
/// a message port.
///

#[derive(Clone)]
pub struct Factory {
    inner: Rc<FactoryInner>,
}

struct FactoryInner {
    client: RpcClient,
    spawner: Spawner,
    config: Rc<Config>,
    registry: Registry,
    jobs: mpsc::UnboundedSender<LocalBoxFuture<'static, ()>>,
}

impl Factory {
    #[must_use]
    pub fn new(port: MessagePort, spawner: Spawner) -> Self {
        Self::with_config(port, spawner, Config::default())
    }

    /// Build a factory over `port`, spawning its RPC listener and its
    /// open/delete worker on `spawner`.
    #[must_use]
    pub fn with_config(port: MessagePort, spawner: Spawner, config: Config) -> Self {
        let (client, listener) = RpcClient::new(port, config.first_request_id);
        spawner.spawn_local(listener.boxed_local());

        let (jobs, mut queue) = mpsc::unbounded::<LocalBoxFuture<'static, ()>>();
        spawner.spawn_local(
            async move {
                while let Some(job) = queue.next().await {
                    job.await;
                }
            }
            .boxed_local(),
        );

        Self {
            inner: Rc::new(FactoryInner {
                client,
                spawner,
                config: Rc::new(config),
                registry: Registry::default(),
                jobs,
            }),
        }
    }

    /// Compare two values as keys.
    pub fn cmp(a: &Value, b: &Value) -> Result<Ordering, DomError> {
        Ok(value_to_key(a)?.cmp(&value_to_key(b)?))
    }

    /// Every database the remote holds.
    pub fn databases(&self) -> impl Future<Output = Result<Vec<DatabaseInfo>, DomError>> + use<> {
        let reply = self.inner.client.call::<GetDbInfo>(());

        async move { Ok(reply.await?) }
    }

    ///
    /// OPEN
    ///

    /// Open `name`, upgrading it first when `version` is above the stored
    /// version. Without a version the stored one is used (1 for a new
    /// database).
    pub fn open(&self, name: &str, version: Option<u64>) -> Result<Request, DomError> {
        if let Some(version) = version
            && (version == 0 || version > self.inner.config.max_version)
        {
            return Err(DomError::data(format!("{version} is not a valid version")));
        }

        let request = Request::new(None, None);
        let (factory, name, req) = (self.clone(), name.to_string(), request.clone());
        self.submit(async move {
            let outcome = factory
                .open_database(&name, version, &req)
                .await
                .map(RequestResult::Connection);
            complete(&req, outcome, None);
        })?;

        Ok(request)
    }

    async fn open_database(
        &self,
        name: &str,
        version: Option<u64>,
        request: &Request,
    ) -> Result<Connection, DomError> {
        let db = self.database(name).await?;
        let current = db.version();
        let requested = version.unwrap_or_else(|| current.max(1));
        if requested < current {
            return Err(DomError::version());
        }

        let connection = Connection::new(&db);
        let opened = if requested > current {
            self.run_version_change(&db, &connection, requested, request)
                .await
        } else {
            db.remote()
                .open_database(None, Vec::new())
                .await
                .map(|_| ())
        };
        if let Err(err) = opened {
            if let Err(close) = connection.close() {
                warn!(db = name, error = %close, "closing a failed open");
            }
            return Err(err);
        }

        info!(db = name, version = connection.version(), "database opened");
        Ok(connection)
    }

    /// The local database for `name`, creating it (and loading the remote
    /// schema, if the remote has one) on first use.
    async fn database(&self, name: &str) -> Result<Rc<Database>, DomError> {
        let infos = self.inner.client.call::<GetDbInfo>(()).await?;
        if let Some(db) = self.inner.registry.get(name) {
            return Ok(db);
        }

        let remote = Remote::new(self.inner.client.clone(), name);
        let db = Rc::new(Database::new(
            name,
            remote,
            Rc::clone(&self.inner.spawner),
            Rc::clone(&self.inner.config),
        ));

        if let Some(info) = infos.iter().find(|info| info.name == name) {
            let stores = self
                .inner
                .client
                .call::<GetDbStores>(NameParams::new(name))
                .await?;
            db.sync_schema(&stores);
            db.set_version(info.version);
        }

        // A concurrent open may have registered it while we awaited.
        if let Some(existing) = self.inner.registry.get(name) {
            return Ok(existing);
        }
        self.inner.registry.insert(Rc::clone(&db));

        Ok(db)
    }

    async fn run_version_change(
        &self,
        db: &Rc<Database>,
        connection: &Connection,
        version: u64,
        request: &Request,
    ) -> Result<(), DomError> {
        let old = db.version();
        self.wait_for_others(db, Some(connection), old, Some(version), request)
            .await;

        db.set_version(version);
        connection.set_version(version);

        let tx = Transaction::new(db, connection, NameList::default(), TransactionMode::VersionChange);
        connection.set_upgrade(Some(tx.clone()));
        request.set_transaction(Some(tx.clone()));
        request.set_provisional(Some(RequestResult::Connection(connection.clone())));
        tx.push_undo(UndoOp::RestoreVersion {
            db: Rc::clone(db),
            connection: connection.clone(),
            old,
        });
        db.push_transaction(tx.clone());
        debug!(db = %db.name(), old, new = version, "upgrade needed");

        request.events().dispatch(
            &Event::versions(EventType::UpgradeNeeded, old, Some(version)).with_request(request),
        );
        db.process_transactions();

        let outcome = tx.done().await;
        request.set_transaction(None);
        connection.set_upgrade(None);

        match outcome {
            TransactionOutcome::Completed => Ok(()),
            TransactionOutcome::Aborted(err) => {
                warn!(db = %db.name(), error = %err, "upgrade aborted");
                Err(DomError::abort())
            }
        }
    }

    /// Ask every other open connection to close, report `blocked` while
    /// any stays open, then wait for all of them.
    async fn wait_for_others(
        &self,
        db: &Rc<Database>,
        except: Option<&Connection>,
        old: u64,
        new: Option<u64>,
        request: &Request,
    ) {
        let others = db.connections(except.map(Connection::inner));
        for other in others.iter().filter(|c| !c.is_close_pending()) {
            other.fire_version_change(old, new);
        }

        if others.iter().any(|c| !c.is_close_pending()) {
            debug!(db = %db.name(), "blocked by open connections");
            request
                .events()
                .dispatch(&Event::versions(EventType::Blocked, old, new).with_request(request));
        }

        for other in others {
            other.closed().await;
        }
    }

    ///
    /// DELETE
    ///

    /// Delete `name` once every connection to it has closed.
    pub fn delete_database(&self, name: &str) -> Result<Request, DomError> {
        let request = Request::new(None, None);
        let (factory, name, req) = (self.clone(), name.to_string(), request.clone());

        self.submit(async move {
            let outcome = factory.remove_database(&name, &req).await;
            let old = outcome.as_ref().ok().copied();
            complete(&req, outcome.map(|_| RequestResult::Undefined), old);
        })?;

        Ok(request)
    }

    async fn remove_database(&self, name: &str, request: &Request) -> Result<u64, DomError> {
        let infos = self.inner.client.call::<GetDbInfo>(()).await?;
        let old = infos
            .iter()
            .find(|info| info.name == name)
            .map_or(0, |info| info.version);

        if let Some(db) = self.inner.registry.get(name) {
            self.wait_for_others(&db, None, old, None, request).await;
        }

        self.inner
            .client
            .call::<DeleteDatabase>(NameParams::new(name))
            .await?;
        self.inner.registry.remove(name);
        info!(db = name, "database deleted");

        Ok(old)
    }

    fn submit(&self, job: impl Future<Output = ()> + 'static) -> Result<(), DomError> {
        self.inner
            .jobs
            .unbounded_send(job.boxed_local())
            .map_err(|_| DomError::invalid_state("the factory worker has stopped"))
    }
}

/// Settle a factory request and fire its success or error event.
fn complete(request: &Request, outcome: Result<RequestResult, DomError>, old_version: Option<u64>) {
    match outcome {
        Ok(result) => {
            request.finish(Ok(result));
            let event = match old_version {
                Some(old) => Event::versions(EventType::Success, old, None),
                None => Event::new(EventType::Success),
            };
            request.events().dispatch(&event.with_request(request));
        }
        Err(err) => {
            debug!(error = %err, "factory request failed");
            request.finish(Err(err.clone()));
            request
                .events()
                .dispatch(&Event::error_event(err).with_request(request));
        }
    }

    request.wake_waiters();
}

impl fmt::Debug for Factory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Factory")
            .field("config", &self.inner.config)
            .finish_non_exhaustive()
    }
}
