mod common;

use common::{harness, keys, local, numbers, seed, strings};
use portidb_core::{
    db::{EventSource, EventType, TransactionMode},
    error::DomErrorKind,
    key::{Key, KeyRange},
    proto::{ReadCall, ReadParams},
    value::Value,
};
use std::{cell::RefCell, rc::Rc};

#[tokio::test]
async fn get_all_merges_cache_and_remote_in_key_order() {
    local(async {
        let h = harness();
        let conn = numbers(&h.factory, "merge").await;
        seed(&h.host, "merge", "nums", &[(1, "one"), (3, "three"), (5, "five")]);

        let tx = conn.transaction(["nums"], TransactionMode::ReadWrite).unwrap();
        let store = tx.object_store("nums").unwrap();
        for (key, value) in [(2, "two"), (4, "four"), (6, "six")] {
            store.put(Value::from(value), Some(Key::from(key))).unwrap();
        }

        let values = store.get_all(None, Some(4)).unwrap().await.unwrap().into_values();
        assert_eq!(values, strings(&["one", "two", "three", "four"]));

        let all = store.get_all_keys(None, None).unwrap().await.unwrap().into_keys();
        assert_eq!(all, keys(&[1, 2, 3, 4, 5, 6]));
        assert!(tx.done().await.is_completed());

        let tx = conn.transaction(["nums"], TransactionMode::ReadOnly).unwrap();
        let count = tx
            .object_store("nums")
            .unwrap()
            .count(Some(KeyRange::bound(2.into(), 5.into(), false, true).unwrap()))
            .unwrap()
            .await
            .unwrap()
            .as_count();
        assert_eq!(count, Some(3));
    })
    .await;
}

#[tokio::test]
async fn local_deletes_mask_stale_remote_records() {
    local(async {
        let h = harness();
        let conn = numbers(&h.factory, "mask").await;
        seed(&h.host, "mask", "nums", &[(1, "one"), (3, "three"), (5, "five")]);

        let tx = conn.transaction(["nums"], TransactionMode::ReadWrite).unwrap();
        let store = tx.object_store("nums").unwrap();
        store.delete(Key::from(3)).unwrap();

        let values = store.get_all(None, None).unwrap().await.unwrap().into_values();
        assert_eq!(values, strings(&["one", "five"]));
        let missing = store.get(Key::from(3)).unwrap().await.unwrap().into_value();
        assert_eq!(missing, None);
        assert!(tx.done().await.is_completed());

        let remote: Vec<Key> = serde_json::from_value(
            h.host
                .execute_read(ReadParams {
                    db_name: "mask".into(),
                    store: "nums".into(),
                    call: ReadCall::GetAllKeys {
                        query: None,
                        count: None,
                    },
                })
                .unwrap(),
        )
        .unwrap();
        assert_eq!(remote, keys(&[1, 5]));
    })
    .await;
}

#[tokio::test]
async fn deleted_ranges_and_clears_mask_everything_inside() {
    local(async {
        let h = harness();
        let conn = numbers(&h.factory, "ranges").await;
        seed(&h.host, "ranges", "nums", &[(1, "a"), (2, "b"), (3, "c"), (4, "d")]);

        let tx = conn.transaction(["nums"], TransactionMode::ReadWrite).unwrap();
        let store = tx.object_store("nums").unwrap();
        store
            .delete(KeyRange::bound(2.into(), 3.into(), false, false).unwrap())
            .unwrap();
        let left = store.get_all_keys(None, None).unwrap().await.unwrap().into_keys();
        assert_eq!(left, keys(&[1, 4]));

        store.clear().unwrap();
        store.put(Value::from("z"), Some(Key::from(9))).unwrap();
        let left = store.get_all_keys(None, None).unwrap().await.unwrap().into_keys();
        assert_eq!(left, keys(&[9]));
        assert!(tx.done().await.is_completed());
    })
    .await;
}

#[tokio::test]
async fn requests_run_in_the_order_they_were_made() {
    local(async {
        let h = harness();
        let conn = numbers(&h.factory, "order").await;

        let tx = conn.transaction(["nums"], TransactionMode::ReadWrite).unwrap();
        let store = tx.object_store("nums").unwrap();
        let order = Rc::new(RefCell::new(Vec::new()));

        let put = store.put(Value::from("a"), Some(Key::from(1))).unwrap();
        let get = store.get(Key::from(1)).unwrap();
        for (label, request) in [("put", &put), ("get", &get)] {
            let order = Rc::clone(&order);
            request.add_listener(EventType::Success, move |_| order.borrow_mut().push(label));
        }

        let value = get.await.unwrap().into_value();
        assert_eq!(value, Some(Value::from("a")));
        assert_eq!(*order.borrow(), vec!["put", "get"]);
    })
    .await;
}

#[tokio::test]
async fn follow_up_requests_after_await_join_the_transaction() {
    local(async {
        let h = harness();
        let conn = numbers(&h.factory, "chain").await;

        let tx = conn.transaction(["nums"], TransactionMode::ReadWrite).unwrap();
        let store = tx.object_store("nums").unwrap();
        store.put(Value::from("a"), Some(Key::from(1))).unwrap().await.unwrap();
        store.put(Value::from("b"), Some(Key::from(2))).unwrap().await.unwrap();
        assert!(tx.done().await.is_completed());

        let err = store.put(Value::from("c"), Some(Key::from(3))).unwrap_err();
        assert_eq!(err.kind, DomErrorKind::TransactionInactive);
    })
    .await;
}

#[tokio::test]
async fn add_of_a_remote_key_fails_and_aborts() {
    local(async {
        let h = harness();
        let conn = numbers(&h.factory, "dupes").await;
        seed(&h.host, "dupes", "nums", &[(1, "one")]);

        let tx = conn.transaction(["nums"], TransactionMode::ReadWrite).unwrap();
        let store = tx.object_store("nums").unwrap();
        store.put(Value::from("two"), Some(Key::from(2))).unwrap();
        let err = store
            .add(Value::from("uno"), Some(Key::from(1)))
            .unwrap()
            .await
            .unwrap_err();
        assert_eq!(err.kind, DomErrorKind::Constraint);
        assert!(!tx.done().await.is_completed());

        // The put before the failure was rolled back with the rest.
        let tx = conn.transaction(["nums"], TransactionMode::ReadOnly).unwrap();
        let all = tx
            .object_store("nums")
            .unwrap()
            .get_all_keys(None, None)
            .unwrap()
            .await
            .unwrap()
            .into_keys();
        assert_eq!(all, keys(&[1]));
    })
    .await;
}

#[tokio::test]
async fn prevented_errors_do_not_abort() {
    local(async {
        let h = harness();
        let conn = numbers(&h.factory, "prevented").await;

        let tx = conn.transaction(["nums"], TransactionMode::ReadWrite).unwrap();
        let store = tx.object_store("nums").unwrap();
        store.put(Value::from("a"), Some(Key::from(1))).unwrap();
        let dup = store.add(Value::from("b"), Some(Key::from(1))).unwrap();
        dup.add_listener(EventType::Error, |event| event.prevent_default());
        store.put(Value::from("c"), Some(Key::from(2))).unwrap();

        assert_eq!(dup.await.unwrap_err().kind, DomErrorKind::Constraint);
        assert!(tx.done().await.is_completed());
    })
    .await;
}

#[tokio::test]
async fn read_only_transactions_reject_writes() {
    local(async {
        let h = harness();
        let conn = numbers(&h.factory, "readonly").await;

        let tx = conn.transaction(["nums"], TransactionMode::ReadOnly).unwrap();
        let err = tx
            .object_store("nums")
            .unwrap()
            .put(Value::from("a"), Some(Key::from(1)))
            .unwrap_err();
        assert_eq!(err.kind, DomErrorKind::ReadOnly);

        let err = conn.transaction(Vec::<String>::new(), TransactionMode::ReadOnly).unwrap_err();
        assert_eq!(err.kind, DomErrorKind::InvalidAccess);
        let err = conn.transaction(["missing"], TransactionMode::ReadOnly).unwrap_err();
        assert_eq!(err.kind, DomErrorKind::NotFound);
    })
    .await;
}

#[tokio::test]
async fn failed_flush_rolls_back_and_aborts() {
    local(async {
        let h = harness();
        let conn = numbers(&h.factory, "flaky").await;

        let tx = conn.transaction(["nums"], TransactionMode::ReadWrite).unwrap();
        let aborted = Rc::new(RefCell::new(false));
        let flag = Rc::clone(&aborted);
        tx.add_listener(EventType::Abort, move |_| *flag.borrow_mut() = true);

        let store = tx.object_store("nums").unwrap();
        store.put(Value::from("a"), Some(Key::from(1))).unwrap().await.unwrap();
        // The host loses the database before the commit reaches it.
        h.host.delete_database("flaky");

        let outcome = tx.done().await;
        assert!(!outcome.is_completed());
        assert!(*aborted.borrow());
        assert_eq!(tx.error().map(|e| e.kind), Some(DomErrorKind::NotFound));

        let tx = conn.transaction(["nums"], TransactionMode::ReadOnly).unwrap();
        let value = tx
            .object_store("nums")
            .unwrap()
            .get(Key::from(1))
            .unwrap()
            .await
            .unwrap()
            .into_value();
        assert_eq!(value, None);
    })
    .await;
}
