use crate::{
    config::MAX_SAFE_INTEGER,
    obs::{MetricsEvent, sink},
    proto::{Message, Method, Outcome, RequestId},
    rpc::{Envelope, MessagePort, PortReceiver, PortSender, RpcError},
};
use futures_channel::oneshot;
use std::{
    cell::{Cell, RefCell},
    collections::HashMap,
    future::Future,
    rc::Rc,
};

type PendingReply = oneshot::Sender<Result<serde_json::Value, RpcError>>;

///
/// RpcClient
///
/// Calling side of a message port. Each call is posted immediately and
/// resolved when the listener sees a response with the same correlation id.
///

#[derive(Clone)]
pub struct RpcClient {
    inner: Rc<ClientInner>,
}

struct ClientInner {
    sender: PortSender,
    pending: RefCell<HashMap<RequestId, PendingReply>>,
    first_id: i64,
    next_id: Cell<i64>,
    closed: Cell<bool>,
}

impl RpcClient {
    /// Build a client over `port`. The returned listener future must be
    /// spawned; it routes responses until the port closes.
    pub fn new(
        port: MessagePort,
        first_request_id: i64,
    ) -> (Self, impl Future<Output = ()> + use<>) {
        let (sender, receiver) = port.split();
        let client = Self {
            inner: Rc::new(ClientInner {
                sender,
                pending: RefCell::new(HashMap::new()),
                first_id: first_request_id,
                next_id: Cell::new(first_request_id),
                closed: Cell::new(false),
            }),
        };
        let listener = client.clone().listen(receiver);

        (client, listener)
    }

    /// Post a request and return a future for its typed result.
    pub fn call<M: Method>(
        &self,
        params: M::Params,
    ) -> impl Future<Output = Result<M::Output, RpcError>> + use<M> {
        self.call_with_transfer::<M>(params, Vec::new())
    }

    /// Like `call`, moving `transfer` buffers along with the message.
    pub fn call_with_transfer<M: Method>(
        &self,
        params: M::Params,
        transfer: Vec<Vec<u8>>,
    ) -> impl Future<Output = Result<M::Output, RpcError>> + use<M> {
        let sent = self.post_request(M::NAME, &params, transfer);

        async move {
            let reply = sent?.await.map_err(|_| RpcError::Closed)??;

            Ok(serde_json::from_value(reply)?)
        }
    }

    /// Fire-and-forget notification.
    pub fn notify<M: Method>(&self, params: M::Params) -> Result<(), RpcError> {
        let params = serde_json::to_value(params)?;
        tracing::trace!(method = M::NAME, "rpc notify");

        self.inner.sender.post(Envelope::new(Message::Notification {
            method: M::NAME.to_string(),
            params,
        }))
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.closed.get()
    }

    fn post_request(
        &self,
        method: &'static str,
        params: &impl serde::Serialize,
        transfer: Vec<Vec<u8>>,
    ) -> Result<oneshot::Receiver<Result<serde_json::Value, RpcError>>, RpcError> {
        if self.inner.closed.get() {
            return Err(RpcError::Closed);
        }

        let params = serde_json::to_value(params)?;
        let id = self.next_request_id();
        let (tx, rx) = oneshot::channel();
        self.inner.pending.borrow_mut().insert(id.clone(), tx);

        sink::record(MetricsEvent::RemoteCall { method });
        tracing::debug!(method, %id, "rpc call");

        let envelope = Envelope {
            message: Message::Request {
                id: id.clone(),
                method: method.to_string(),
                params,
            },
            transfer,
        };
        if let Err(err) = self.inner.sender.post(envelope) {
            self.inner.pending.borrow_mut().remove(&id);
            return Err(err);
        }

        Ok(rx)
    }

    fn next_request_id(&self) -> RequestId {
        let id = self.inner.next_id.get();
        let next = if id >= MAX_SAFE_INTEGER {
            tracing::warn!(first = self.inner.first_id, "rpc request ids wrapped");
            self.inner.first_id
        } else {
            id + 1
        };
        self.inner.next_id.set(next);

        RequestId::Number(id)
    }

    async fn listen(self, mut receiver: PortReceiver) {
        while let Some(envelope) = receiver.recv().await {
            match envelope.message {
                Message::Response { id, outcome } => {
                    let waiter = self.inner.pending.borrow_mut().remove(&id);
                    let Some(waiter) = waiter else {
                        tracing::warn!(%id, "response for unknown request id");
                        continue;
                    };

                    tracing::trace!(%id, "rpc response");
                    let reply = match outcome {
                        Outcome::Result(value) => Ok(value),
                        Outcome::Error(err) => Err(RpcError::Remote(err)),
                    };
                    if waiter.send(reply).is_err() {
                        tracing::debug!(%id, "caller dropped before response arrived");
                    }
                }
                Message::Request { method, .. } | Message::Notification { method, .. } => {
                    tracing::warn!(method, "client port received an inbound call; ignored");
                }
            }
        }

        tracing::debug!("rpc port closed; failing pending calls");
        self.inner.closed.set(true);
        self.inner.pending.borrow_mut().clear();
    }
}
