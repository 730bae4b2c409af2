mod common;

use common::{harness, harness_with, items, local, open_with};
use portidb_core::{
    db::{EventSource, EventType, Factory, TransactionMode},
    error::DomErrorKind,
    key::Key,
    proto::{DatabaseInfo, StoreParameters},
    rpc::MessageChannel,
    task::TokioSpawn,
    value::Value,
};
use portidb_host::HostConfig;
use std::{cell::RefCell, cmp::Ordering, rc::Rc};

#[tokio::test]
async fn notes_round_trip_with_generated_key() {
    local(async {
        let h = harness();
        let conn = open_with(&h.factory, "docA:notes", 1, |c, _| {
            c.create_object_store("items", items()).unwrap();
        })
        .await
        .unwrap();

        let tx = conn.transaction(["items"], TransactionMode::ReadWrite).unwrap();
        let note = Value::object([("id", Value::Undefined), ("text", Value::from("hello"))]);
        let key = tx
            .object_store("items")
            .unwrap()
            .add(note, None)
            .unwrap()
            .await
            .unwrap()
            .into_key();
        assert_eq!(key, Some(Key::from(1)));
        assert!(tx.done().await.is_completed());

        let tx = conn.transaction(["items"], TransactionMode::ReadOnly).unwrap();
        let stored = tx
            .object_store("items")
            .unwrap()
            .get(Key::from(1))
            .unwrap()
            .await
            .unwrap()
            .into_value();
        assert_eq!(
            stored,
            Some(Value::object([("id", Value::from(1)), ("text", Value::from("hello"))]))
        );
    })
    .await;
}

#[tokio::test]
async fn a_second_factory_sees_committed_data() {
    local(async {
        let h = harness();
        let conn = open_with(&h.factory, "notes", 1, |c, _| {
            c.create_object_store("items", items()).unwrap();
        })
        .await
        .unwrap();
        let tx = conn.transaction(["items"], TransactionMode::ReadWrite).unwrap();
        let store = tx.object_store("items").unwrap();
        store.add(Value::object([("text", Value::from("a"))]), None).unwrap();
        store.add(Value::object([("text", Value::from("b"))]), None).unwrap();
        assert!(tx.done().await.is_completed());

        // A fresh engine over the same host has an empty cache.
        let (engine_port, host_port) = MessageChannel::new();
        tokio::task::spawn_local(h.host.serve(host_port));
        let fresh = Factory::new(engine_port, Rc::new(TokioSpawn));
        let conn = fresh.open("notes", None).unwrap().await.unwrap().into_connection().unwrap();
        assert_eq!(conn.version(), 1);
        assert!(conn.object_store_names().contains("items"));

        let tx = conn.transaction(["items"], TransactionMode::ReadWrite).unwrap();
        let store = tx.object_store("items").unwrap();
        let count = store.count(None).unwrap().await.unwrap().as_count();
        assert_eq!(count, Some(2));

        // The generator is primed from the host, so no key is reissued.
        let key = store
            .add(Value::object([("text", Value::from("c"))]), None)
            .unwrap()
            .await
            .unwrap()
            .into_key();
        assert_eq!(key, Some(Key::from(3)));
    })
    .await;
}

#[tokio::test]
async fn databases_is_idempotent() {
    local(async {
        let h = harness();
        open_with(&h.factory, "docA:notes", 1, |c, _| {
            c.create_object_store("items", items()).unwrap();
        })
        .await
        .unwrap();

        let first = h.factory.databases().await.unwrap();
        let second = h.factory.databases().await.unwrap();

        assert_eq!(first, second);
        assert_eq!(
            first,
            vec![DatabaseInfo {
                name: "docA:notes".into(),
                version: 1,
            }]
        );
    })
    .await;
}

#[tokio::test]
async fn namespaced_host_reports_plain_names() {
    local(async {
        let h = harness_with(HostConfig::namespaced("docA"));
        open_with(&h.factory, "notes", 2, |c, _| {
            c.create_object_store("items", items()).unwrap();
        })
        .await
        .unwrap();

        let infos = h.factory.databases().await.unwrap();
        assert_eq!(infos[0].name, "notes");
        assert_eq!(infos[0].version, 2);
    })
    .await;
}

#[tokio::test]
async fn invalid_versions_are_rejected_synchronously() {
    local(async {
        let h = harness();

        let err = h.factory.open("notes", Some(0)).unwrap_err();
        assert_eq!(err.kind, DomErrorKind::Data);

        let err = h.factory.open("notes", Some(u64::MAX)).unwrap_err();
        assert_eq!(err.kind, DomErrorKind::Data);
    })
    .await;
}

#[tokio::test]
async fn lower_version_fails_with_version_error() {
    local(async {
        let h = harness();
        let conn = open_with(&h.factory, "notes", 3, |_, _| {}).await.unwrap();
        conn.close().unwrap();

        let err = h.factory.open("notes", Some(2)).unwrap().await.unwrap_err();
        assert_eq!(err.kind, DomErrorKind::Version);
    })
    .await;
}

#[tokio::test]
async fn aborted_upgrade_leaves_no_trace() {
    local(async {
        let h = harness();
        let err = open_with(&h.factory, "rollback", 1, |c, tx| {
            c.create_object_store("temp", StoreParameters::default()).unwrap();
            tx.abort().unwrap();
        })
        .await
        .unwrap_err();
        assert_eq!(err.kind, DomErrorKind::Abort);
        assert!(h.factory.databases().await.unwrap().is_empty());

        let seen = Rc::new(RefCell::new(None));
        let names = Rc::clone(&seen);
        let conn = open_with(&h.factory, "rollback", 1, move |c, _| {
            *names.borrow_mut() = Some(c.object_store_names().len());
        })
        .await
        .unwrap();

        assert_eq!(*seen.borrow(), Some(0));
        assert!(conn.object_store_names().is_empty());
        assert_eq!(conn.version(), 1);
    })
    .await;
}

#[tokio::test]
async fn upgrade_asks_open_connections_to_close() {
    local(async {
        let h = harness();
        let old = open_with(&h.factory, "shared", 1, |c, _| {
            c.create_object_store("items", items()).unwrap();
        })
        .await
        .unwrap();

        let changes = Rc::new(RefCell::new(Vec::new()));
        let (seen, closing) = (Rc::clone(&changes), old.clone());
        old.add_listener(EventType::VersionChange, move |event| {
            seen.borrow_mut().push((event.old_version(), event.new_version()));
            closing.close().unwrap();
        });

        let request = h.factory.open("shared", Some(2)).unwrap();
        let blocked = Rc::new(RefCell::new(false));
        let flag = Rc::clone(&blocked);
        request.add_listener(EventType::Blocked, move |_| *flag.borrow_mut() = true);
        request.add_listener(EventType::UpgradeNeeded, |event| {
            let conn = event.request().unwrap().result().unwrap().into_connection().unwrap();
            conn.create_object_store("more", StoreParameters::default()).unwrap();
        });
        let conn = request.await.unwrap().into_connection().unwrap();

        assert_eq!(*changes.borrow(), vec![(Some(1), Some(2))]);
        assert!(!*blocked.borrow());
        assert_eq!(conn.version(), 2);
        assert_eq!(
            conn.object_store_names().to_vec(),
            vec!["items".to_string(), "more".to_string()]
        );

        let err = old.transaction(["items"], TransactionMode::ReadOnly).unwrap_err();
        assert_eq!(err.kind, DomErrorKind::InvalidState);
    })
    .await;
}

#[tokio::test]
async fn upgrade_reports_blocked_until_others_close() {
    local(async {
        let h = harness();
        let old = open_with(&h.factory, "shared", 1, |_, _| {}).await.unwrap();

        let request = h.factory.open("shared", Some(2)).unwrap();
        let closing = old.clone();
        request.add_listener(EventType::Blocked, move |event| {
            assert_eq!(event.new_version(), Some(2));
            closing.close().unwrap();
        });

        let conn = request.await.unwrap().into_connection().unwrap();
        assert_eq!(conn.version(), 2);
    })
    .await;
}

#[tokio::test]
async fn delete_waits_for_connections_then_removes_the_database() {
    local(async {
        let h = harness();
        let conn = open_with(&h.factory, "gone", 1, |c, _| {
            c.create_object_store("items", items()).unwrap();
        })
        .await
        .unwrap();

        let closing = conn.clone();
        conn.add_listener(EventType::VersionChange, move |event| {
            assert_eq!(event.new_version(), None);
            closing.close().unwrap();
        });

        let request = h.factory.delete_database("gone").unwrap();
        let old_version = Rc::new(RefCell::new(None));
        let seen = Rc::clone(&old_version);
        request.add_listener(EventType::Success, move |event| {
            *seen.borrow_mut() = event.old_version();
        });
        request.await.unwrap();

        assert_eq!(*old_version.borrow(), Some(1));
        assert!(h.factory.databases().await.unwrap().is_empty());

        // Reopening starts from scratch.
        let conn = h.factory.open("gone", None).unwrap().await.unwrap().into_connection().unwrap();
        assert_eq!(conn.version(), 1);
        assert!(conn.object_store_names().is_empty());
    })
    .await;
}

#[tokio::test]
async fn close_during_upgrade_aborts_it() {
    local(async {
        let h = harness();
        let err = open_with(&h.factory, "closing", 1, |c, _| {
            c.create_object_store("items", items()).unwrap();
            let err = c.close().unwrap_err();
            assert_eq!(err.kind, DomErrorKind::Abort);
        })
        .await
        .unwrap_err();

        assert_eq!(err.kind, DomErrorKind::Abort);
        assert!(h.factory.databases().await.unwrap().is_empty());
    })
    .await;
}

#[test]
fn cmp_orders_values_as_keys() {
    let cmp = |a: Value, b: Value| Factory::cmp(&a, &b).unwrap();

    assert_eq!(cmp(Value::from(1), Value::from("a")), Ordering::Less);
    assert_eq!(cmp(Value::from("b"), Value::from("a")), Ordering::Greater);
    assert_eq!(
        cmp(Value::from(vec![Value::from(1)]), Value::from(vec![Value::from(1)])),
        Ordering::Equal
    );

    let err = Factory::cmp(&Value::Null, &Value::from(1)).unwrap_err();
    assert_eq!(err.kind, DomErrorKind::Data);
}
