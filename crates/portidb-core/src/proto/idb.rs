use crate::{
    db::CursorDirection,
    key::{Key, KeyPath, KeyRange},
    proto::Method,
    value::Value,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

///
/// SerializedQuery
///
/// A query on the wire: a bare key for equality, otherwise a range object.
///

#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(untagged)]
pub enum SerializedQuery {
    Key(Key),
    Range(KeyRange),
}

impl From<KeyRange> for SerializedQuery {
    fn from(range: KeyRange) -> Self {
        match range.as_only() {
            Some(key) => Self::Key(key.clone()),
            None => Self::Range(range),
        }
    }
}

impl From<&KeyRange> for SerializedQuery {
    fn from(range: &KeyRange) -> Self {
        Self::from(range.clone())
    }
}

impl From<SerializedQuery> for KeyRange {
    fn from(query: SerializedQuery) -> Self {
        match query {
            SerializedQuery::Key(key) => Self::only(key),
            SerializedQuery::Range(range) => range,
        }
    }
}

///
/// DESCRIPTORS
///

#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct DatabaseInfo {
    pub name: String,
    pub version: u64,
}

#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(default, rename_all = "camelCase")]
pub struct StoreParameters {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key_path: Option<KeyPath>,
    pub auto_increment: bool,
}

#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(default, rename_all = "camelCase")]
pub struct IndexParameters {
    pub multi_entry: bool,
    pub unique: bool,
}

#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexDescriptor {
    pub name: String,
    pub key_path: KeyPath,
    #[serde(default)]
    pub parameters: IndexParameters,
}

#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct StoreDescriptor {
    pub name: String,
    #[serde(default)]
    pub parameters: StoreParameters,
    #[serde(default)]
    pub indexes: Vec<IndexDescriptor>,
}

///
/// UPGRADE ACTIONS
///

///
/// UpgradeAction
///
/// Schema change recorded by a versionchange transaction and replayed by
/// the host inside `openDatabase`.
///

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(
    tag = "method",
    content = "params",
    rename_all = "camelCase",
    rename_all_fields = "camelCase"
)]
pub enum UpgradeAction {
    CreateObjectStore {
        name: String,
        options: StoreParameters,
        do_on_upgrade: Vec<StoreUpgradeEntry>,
    },
    DeleteObjectStore {
        name: String,
    },
    ModifyObjectStore {
        name: String,
        do_on_upgrade: Vec<StoreUpgradeEntry>,
    },
}

impl UpgradeAction {
    /// Name of the store the action targets.
    #[must_use]
    pub fn store_name(&self) -> &str {
        match self {
            Self::CreateObjectStore { name, .. }
            | Self::DeleteObjectStore { name }
            | Self::ModifyObjectStore { name, .. } => name,
        }
    }

    pub(crate) const fn entries_mut(&mut self) -> Option<&mut Vec<StoreUpgradeEntry>> {
        match self {
            Self::CreateObjectStore { do_on_upgrade, .. }
            | Self::ModifyObjectStore { do_on_upgrade, .. } => Some(do_on_upgrade),
            Self::DeleteObjectStore { .. } => None,
        }
    }
}

///
/// StoreUpgradeAction
///

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(
    tag = "method",
    content = "params",
    rename_all = "camelCase",
    rename_all_fields = "camelCase"
)]
pub enum StoreUpgradeAction {
    CreateIndex {
        name: String,
        key_path: KeyPath,
        #[serde(default)]
        options: IndexParameters,
    },
    RenameObjectStore {
        new_name: String,
    },
    DeleteIndex {
        name: String,
    },
    ModifyIndex {
        name: String,
        new_name: String,
    },
}

///
/// StoreUpgradeEntry
///
/// One step nested under a store's upgrade action: a schema change or a
/// data write made while the upgrade ran.
///

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(untagged)]
pub enum StoreUpgradeEntry {
    Schema(StoreUpgradeAction),
    Write(Write),
}

///
/// WRITES
///

///
/// Write
///
/// A data mutation replayed by the host when the transaction commits.
///

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(
    tag = "method",
    content = "params",
    rename_all = "camelCase",
    rename_all_fields = "camelCase"
)]
pub enum Write {
    Add {
        value: Value,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        key: Option<Key>,
    },
    Put {
        value: Value,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        key: Option<Key>,
    },
    Delete {
        query: SerializedQuery,
    },
    Clear,
    Replace {
        key: Key,
        index: String,
        value: Value,
    },
}

///
/// WriteLog
///

#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WriteLog {
    pub db_name: String,
    pub ops: BTreeMap<String, Vec<Write>>,
}

impl WriteLog {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ops.values().all(Vec::is_empty)
    }
}

///
/// READS
///

///
/// ReadCall
///
/// A read executed against one store of an open database.
///

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(
    tag = "method",
    content = "params",
    rename_all = "camelCase",
    rename_all_fields = "camelCase"
)]
pub enum ReadCall {
    Get {
        query: SerializedQuery,
    },
    GetAll {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        query: Option<SerializedQuery>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        count: Option<u32>,
    },
    GetKey {
        query: SerializedQuery,
    },
    GetAllKeys {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        query: Option<SerializedQuery>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        count: Option<u32>,
    },
    Count {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        query: Option<SerializedQuery>,
    },
    GetAllRecords {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        query: Option<SerializedQuery>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        count: Option<u32>,
    },
    GetAllRecordsFromIndex {
        index_name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        query: Option<SerializedQuery>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        count: Option<u32>,
    },
    GetNextFromCursor {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        range: Option<SerializedQuery>,
        direction: CursorDirection,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        index_name: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        prev_primary_key: Option<Key>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        curr_primary_key: Option<Key>,
        #[serde(default)]
        just_keys: bool,
    },
}

///
/// CursorRecord
///
/// One record as seen by a cursor or an index scan. For store sources
/// `primary_key` equals `key`.
///

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CursorRecord {
    pub key: Key,
    pub primary_key: Key,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
}

///
/// METHODS
///

#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct NameParams {
    pub name: String,
}

impl NameParams {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenParams {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<u64>,
    #[serde(default)]
    pub do_on_upgrade: Vec<UpgradeAction>,
}

#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenedDatabase {
    pub object_stores: Vec<StoreDescriptor>,
}

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadParams {
    pub db_name: String,
    pub store: String,
    pub call: ReadCall,
}

/// List every database the host knows, with its version.
pub struct GetDbInfo;

impl Method for GetDbInfo {
    const NAME: &'static str = "getDbInfo";

    type Params = ();
    type Output = Vec<DatabaseInfo>;
}

/// Describe the stores and indexes of one database.
pub struct GetDbStores;

impl Method for GetDbStores {
    const NAME: &'static str = "getIDBDBStores";

    type Params = NameParams;
    type Output = Vec<StoreDescriptor>;
}

/// Open (creating or upgrading) a database, replaying upgrade actions.
pub struct OpenDatabase;

impl Method for OpenDatabase {
    const NAME: &'static str = "openDatabase";

    type Params = OpenParams;
    type Output = OpenedDatabase;
}

pub struct CloseDatabase;

impl Method for CloseDatabase {
    const NAME: &'static str = "closeDatabase";

    type Params = NameParams;
    type Output = ();
}

pub struct DeleteDatabase;

impl Method for DeleteDatabase {
    const NAME: &'static str = "deleteDatabase";

    type Params = NameParams;
    type Output = ();
}

/// Run a read against a store; the result shape depends on the call.
pub struct ExecuteRead;

impl Method for ExecuteRead {
    const NAME: &'static str = "executeReadMethod";

    type Params = ReadParams;
    type Output = serde_json::Value;
}

/// Replay a committed transaction's write log.
pub struct ExecuteTransaction;

impl Method for ExecuteTransaction {
    const NAME: &'static str = "executeTransaction";

    type Params = WriteLog;
    type Output = ();
}
