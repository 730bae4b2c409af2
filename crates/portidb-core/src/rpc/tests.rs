use super::*;
use crate::proto::{
    CloseDatabase, DatabaseInfo, GetDbInfo, Message, Method, NameParams, Outcome, RemoteError,
    RequestId,
};
use serde::{Deserialize, Serialize};
use std::{cell::RefCell, rc::Rc};
use tokio::task::LocalSet;

struct Upload;

impl Method for Upload {
    const NAME: &'static str = "upload";

    type Params = NameParams;
    type Output = usize;
}

#[derive(Debug, Deserialize, PartialEq, Serialize)]
struct Ping {
    seq: u32,
}

struct PingNotice;

impl Method for PingNotice {
    const NAME: &'static str = "ping";

    type Params = Ping;
    type Output = ();
}

fn info(name: &str, version: u64) -> DatabaseInfo {
    DatabaseInfo {
        name: name.into(),
        version,
    }
}

/// Serve `router` on one end of a fresh channel and return a client on the other.
fn connect(local: &LocalSet, router: Router) -> RpcClient {
    let (client_port, server_port) = MessageChannel::new();
    let (client, listener) = RpcClient::new(client_port, 1);
    local.spawn_local(listener);
    local.spawn_local(router.serve(server_port));

    client
}

#[tokio::test]
async fn call_resolves_with_typed_result() {
    let local = LocalSet::new();
    let router = Router::new().route::<GetDbInfo, _, _>(|()| async { Ok(vec![info("notes", 2)]) });
    let client = connect(&local, router);

    let dbs = local
        .run_until(client.call::<GetDbInfo>(()))
        .await
        .unwrap();

    assert_eq!(dbs, vec![info("notes", 2)]);
}

#[tokio::test]
async fn handler_errors_come_back_as_remote_errors() {
    let local = LocalSet::new();
    let router = Router::new().route::<CloseDatabase, _, _>(|params: NameParams| async move {
        Err(RemoteError::new("NotFoundError", params.name))
    });
    let client = connect(&local, router);

    let err = local
        .run_until(client.call::<CloseDatabase>(NameParams::new("gone")))
        .await
        .unwrap_err();

    match err {
        RpcError::Remote(remote) => assert_eq!(remote, RemoteError::new("NotFoundError", "gone")),
        other => panic!("unexpected error {other:?}"),
    }
}

#[tokio::test]
async fn unknown_methods_answer_unknown_error() {
    let local = LocalSet::new();
    let client = connect(&local, Router::new());

    let err = local
        .run_until(client.call::<GetDbInfo>(()))
        .await
        .unwrap_err();

    let dom = crate::error::DomError::from(err);
    assert_eq!(dom.name(), "UnknownError");
    assert!(dom.message.contains("getDbInfo"));
}

#[tokio::test]
async fn transferred_buffers_reach_the_handler() {
    let local = LocalSet::new();
    let router = Router::new().route_with_transfer::<Upload, _, _>(|_params, transfer| async move {
        Ok(transfer.iter().map(Vec::len).sum())
    });
    let client = connect(&local, router);

    let total = local
        .run_until(client.call_with_transfer::<Upload>(
            NameParams::new("blob"),
            vec![vec![0; 3], vec![1; 4]],
        ))
        .await
        .unwrap();

    assert_eq!(total, 7);
}

#[tokio::test]
async fn calls_are_correlated_by_id() {
    let local = LocalSet::new();
    let (client_port, server_port) = MessageChannel::new();
    let (client, listener) = RpcClient::new(client_port, 10);
    local.spawn_local(listener);

    let (sender, mut receiver) = server_port.split();
    let first = client.call::<GetDbInfo>(());
    let second = client.call::<GetDbInfo>(());

    let replies = local
        .run_until(async move {
            let a = receiver.recv().await.unwrap();
            let b = receiver.recv().await.unwrap();
            let (Message::Request { id: id_a, .. }, Message::Request { id: id_b, .. }) =
                (a.message, b.message)
            else {
                panic!("expected two requests");
            };
            assert_eq!(id_a, RequestId::Number(10));
            assert_eq!(id_b, RequestId::Number(11));

            // answer out of order
            for (id, name) in [(id_b, "second"), (id_a, "first")] {
                let result = serde_json::to_value(vec![info(name, 1)]).unwrap();
                sender
                    .post(Envelope::new(Message::Response {
                        id,
                        outcome: Outcome::Result(result),
                    }))
                    .unwrap();
            }

            (first.await.unwrap(), second.await.unwrap())
        })
        .await;

    assert_eq!(replies.0, vec![info("first", 1)]);
    assert_eq!(replies.1, vec![info("second", 1)]);
}

#[tokio::test]
async fn closing_the_peer_fails_pending_calls() {
    let local = LocalSet::new();
    let (client_port, server_port) = MessageChannel::new();
    let (client, listener) = RpcClient::new(client_port, 1);
    local.spawn_local(listener);

    let pending = client.call::<GetDbInfo>(());
    drop(server_port);

    let err = local.run_until(pending).await.unwrap_err();
    assert!(matches!(err, RpcError::Closed));
    assert!(client.is_closed());

    let err = local
        .run_until(client.call::<GetDbInfo>(()))
        .await
        .unwrap_err();
    assert!(matches!(err, RpcError::Closed));
}

#[tokio::test]
async fn notifications_reach_their_handler() {
    let local = LocalSet::new();
    let seen = Rc::new(RefCell::new(Vec::new()));
    let sink = seen.clone();
    let router = Router::new()
        .on_notification::<PingNotice, _>(move |ping| sink.borrow_mut().push(ping.seq))
        .route::<GetDbInfo, _, _>(|()| async { Ok(Vec::new()) });
    let client = connect(&local, router);

    client.notify::<PingNotice>(Ping { seq: 1 }).unwrap();
    client.notify::<PingNotice>(Ping { seq: 2 }).unwrap();
    // requests are served in order, so the notifications land first
    local
        .run_until(client.call::<GetDbInfo>(()))
        .await
        .unwrap();

    assert_eq!(*seen.borrow(), vec![1, 2]);
}

#[test]
fn codec_round_trips_text_frames() {
    let message = Message::Request {
        id: RequestId::String("r1".into()),
        method: "getDbInfo".into(),
        params: serde_json::Value::Null,
    };

    let text = codec::encode(&message).unwrap();
    assert_eq!(codec::decode(&text).unwrap(), message);
    assert!(codec::decode_slice(b"{\"nope\": 1}").is_err());
}
