use super::*;
use crate::{
    db::CursorDirection,
    key::{Key, KeyRange},
    value::Value,
};
use serde_json::json;

fn number(n: f64) -> serde_json::Value {
    json!({ "type": "number", "value": n })
}

#[test]
fn messages_are_told_apart_by_shape() {
    let request: Message =
        serde_json::from_value(json!({ "id": 4, "method": "getDbInfo" })).unwrap();
    let response: Message =
        serde_json::from_value(json!({ "id": "a", "result": [1, 2] })).unwrap();
    let failure: Message = serde_json::from_value(
        json!({ "id": 4, "error": { "name": "NotFoundError", "message": "gone" } }),
    )
    .unwrap();
    let notification: Message =
        serde_json::from_value(json!({ "method": "ping", "params": { "x": 1 } })).unwrap();

    assert_eq!(
        request,
        Message::Request {
            id: RequestId::Number(4),
            method: "getDbInfo".into(),
            params: serde_json::Value::Null,
        }
    );
    assert_eq!(
        response,
        Message::Response {
            id: RequestId::String("a".into()),
            outcome: Outcome::Result(json!([1, 2])),
        }
    );
    assert_eq!(
        failure,
        Message::Response {
            id: RequestId::Number(4),
            outcome: Outcome::Error(RemoteError::new("NotFoundError", "gone")),
        }
    );
    assert!(matches!(notification, Message::Notification { .. }));
}

#[test]
fn response_serializes_flat() {
    let message = Message::Response {
        id: RequestId::Number(-3),
        outcome: Outcome::Result(serde_json::Value::Null),
    };

    assert_eq!(
        serde_json::to_value(message).unwrap(),
        json!({ "id": -3, "result": null })
    );
}

#[test]
fn equality_queries_travel_as_bare_keys() {
    let only = SerializedQuery::from(KeyRange::only(Key::from(1)));
    let range = SerializedQuery::from(KeyRange::lower_bound(Key::from(1), true));

    assert_eq!(serde_json::to_value(&only).unwrap(), number(1.0));
    assert_eq!(
        serde_json::to_value(&range).unwrap(),
        json!({ "lower": number(1.0), "lowerOpen": true, "upperOpen": false })
    );

    let back: SerializedQuery = serde_json::from_value(json!({ "upper": number(2.0) })).unwrap();
    assert_eq!(
        KeyRange::from(back),
        KeyRange::upper_bound(Key::from(2), false)
    );
}

#[test]
fn read_calls_use_method_and_params() {
    let call = ReadCall::GetNextFromCursor {
        range: None,
        direction: CursorDirection::PrevUnique,
        index_name: Some("by_tag".into()),
        prev_primary_key: Some(Key::from("p")),
        curr_primary_key: None,
        just_keys: false,
    };

    assert_eq!(
        serde_json::to_value(&call).unwrap(),
        json!({
            "method": "getNextFromCursor",
            "params": {
                "direction": "prevunique",
                "indexName": "by_tag",
                "prevPrimaryKey": { "type": "string", "value": "p" },
                "justKeys": false,
            }
        })
    );
}

#[test]
fn upgrade_entries_mix_schema_changes_and_writes() {
    let action = UpgradeAction::CreateObjectStore {
        name: "items".into(),
        options: StoreParameters {
            key_path: Some("id".into()),
            auto_increment: true,
        },
        do_on_upgrade: vec![
            StoreUpgradeEntry::Schema(StoreUpgradeAction::CreateIndex {
                name: "by_text".into(),
                key_path: "text".into(),
                options: IndexParameters::default(),
            }),
            StoreUpgradeEntry::Write(Write::Add {
                value: Value::object([("id", Value::from(1))]),
                key: None,
            }),
            StoreUpgradeEntry::Write(Write::Clear),
        ],
    };

    let json = serde_json::to_value(&action).unwrap();
    assert_eq!(json["method"], "createObjectStore");
    assert_eq!(json["params"]["options"]["keyPath"], "id");
    assert_eq!(json["params"]["doOnUpgrade"][0]["method"], "createIndex");
    assert_eq!(json["params"]["doOnUpgrade"][2], json!({ "method": "clear" }));

    let back: UpgradeAction = serde_json::from_value(json).unwrap();
    assert_eq!(back, action);
}

#[test]
fn empty_write_log_reports_empty() {
    let mut log = WriteLog {
        db_name: "docs".into(),
        ops: [("a".to_string(), Vec::new())].into_iter().collect(),
    };
    assert!(log.is_empty());

    log.ops.entry("a".into()).or_default().push(Write::Clear);
    assert!(!log.is_empty());
}
