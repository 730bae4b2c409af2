//! Module: db::remote
//! Responsibility: typed wrappers over the reads and flushes the engine
//! sends to the privileged side.
//! Does not own: merging or masking (see `db::store`).
//! Boundary: every call is posted when the wrapper is invoked, before the
//! returned future is first polled.

use crate::{
    db::CursorDirection,
    error::DomError,
    key::{Key, KeyRange},
    proto::{
        CloseDatabase, CursorRecord, ExecuteRead, ExecuteTransaction, NameParams, OpenDatabase,
        OpenParams, OpenedDatabase, ReadCall, ReadParams, SerializedQuery, UpgradeAction, WriteLog,
    },
    rpc::RpcClient,
};
use serde::de::DeserializeOwned;
use std::{future::Future, rc::Rc};

///
/// CursorQuery
///
/// Arguments of one `getNextFromCursor` call.
///

#[derive(Clone, Debug)]
pub(crate) struct CursorQuery {
    pub range: KeyRange,
    pub direction: CursorDirection,
    pub index_name: Option<String>,
    pub prev_primary_key: Option<Key>,
    pub curr_primary_key: Option<Key>,
    pub just_keys: bool,
}

///
/// Remote
///
/// The RPC client bound to one database name.
///

#[derive(Clone)]
pub(crate) struct Remote {
    client: RpcClient,
    db_name: Rc<str>,
}

impl std::fmt::Debug for Remote {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Remote")
            .field("db_name", &self.db_name)
            .finish_non_exhaustive()
    }
}

fn query(range: &KeyRange) -> Option<SerializedQuery> {
    (!range.is_unbounded()).then(|| SerializedQuery::from(range))
}

impl Remote {
    pub(crate) fn new(client: RpcClient, db_name: &str) -> Self {
        Self {
            client,
            db_name: Rc::from(db_name),
        }
    }

    fn read<T: DeserializeOwned>(
        &self,
        store: &str,
        call: ReadCall,
    ) -> impl Future<Output = Result<T, DomError>> + use<T> {
        let reply = self.client.call::<ExecuteRead>(ReadParams {
            db_name: self.db_name.to_string(),
            store: store.to_string(),
            call,
        });

        async move {
            let value = reply.await?;
            serde_json::from_value(value)
                .map_err(|err| DomError::unknown(format!("malformed read result: {err}")))
        }
    }

    pub(crate) fn get_all_records(
        &self,
        store: &str,
        range: &KeyRange,
        count: Option<u32>,
    ) -> impl Future<Output = Result<Vec<CursorRecord>, DomError>> + use<> {
        self.read(
            store,
            ReadCall::GetAllRecords {
                query: query(range),
                count,
            },
        )
    }

    pub(crate) fn get_all_keys(
        &self,
        store: &str,
        range: &KeyRange,
        count: Option<u32>,
    ) -> impl Future<Output = Result<Vec<Key>, DomError>> + use<> {
        self.read(
            store,
            ReadCall::GetAllKeys {
                query: query(range),
                count,
            },
        )
    }

    pub(crate) fn count(
        &self,
        store: &str,
        range: &KeyRange,
    ) -> impl Future<Output = Result<u64, DomError>> + use<> {
        self.read(store, ReadCall::Count { query: query(range) })
    }

    pub(crate) fn get_all_records_from_index(
        &self,
        store: &str,
        index: &str,
        range: &KeyRange,
        count: Option<u32>,
    ) -> impl Future<Output = Result<Vec<CursorRecord>, DomError>> + use<> {
        self.read(
            store,
            ReadCall::GetAllRecordsFromIndex {
                index_name: index.to_string(),
                query: query(range),
                count,
            },
        )
    }

    pub(crate) fn next_from_cursor(
        &self,
        store: &str,
        q: CursorQuery,
    ) -> impl Future<Output = Result<Option<CursorRecord>, DomError>> + use<> {
        self.read(
            store,
            ReadCall::GetNextFromCursor {
                range: query(&q.range),
                direction: q.direction,
                index_name: q.index_name,
                prev_primary_key: q.prev_primary_key,
                curr_primary_key: q.curr_primary_key,
                just_keys: q.just_keys,
            },
        )
    }

    pub(crate) fn execute_transaction(
        &self,
        log: WriteLog,
    ) -> impl Future<Output = Result<(), DomError>> + use<> {
        let reply = self.client.call::<ExecuteTransaction>(log);

        async move { Ok(reply.await?) }
    }

    pub(crate) fn open_database(
        &self,
        version: Option<u64>,
        do_on_upgrade: Vec<UpgradeAction>,
    ) -> impl Future<Output = Result<OpenedDatabase, DomError>> + use<> {
        let reply = self.client.call::<OpenDatabase>(OpenParams {
            name: self.db_name.to_string(),
            version,
            do_on_upgrade,
        });

        async move { Ok(reply.await?) }
    }

    pub(crate) fn close_database(&self) -> impl Future<Output = Result<(), DomError>> + use<> {
        let reply = self
            .client
            .call::<CloseDatabase>(NameParams::new(self.db_name.to_string()));

        async move { Ok(reply.await?) }
    }
}
