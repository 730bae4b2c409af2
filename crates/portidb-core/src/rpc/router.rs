use crate::{
    proto::{Message, Method, Outcome, RemoteError},
    rpc::{Envelope, MessagePort, RpcError},
};
use futures_util::{FutureExt, future::LocalBoxFuture};
use std::{collections::HashMap, future::Future};

type Transfer = Vec<Vec<u8>>;
type RequestHandler =
    Box<dyn Fn(serde_json::Value, Transfer) -> LocalBoxFuture<'static, Result<serde_json::Value, RpcError>>>;
type NotificationHandler = Box<dyn Fn(serde_json::Value) -> Result<(), RpcError>>;

///
/// Router
///
/// Serving side of a message port. Requests are handled one at a time in
/// arrival order; a request for a method without a handler is answered with
/// an `UnknownError`.
///

#[derive(Default)]
pub struct Router {
    requests: HashMap<&'static str, RequestHandler>,
    notifications: HashMap<&'static str, NotificationHandler>,
}

impl Router {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the handler for method `M`.
    #[must_use]
    pub fn route<M, F, Fut>(self, handler: F) -> Self
    where
        M: Method,
        F: Fn(M::Params) -> Fut + 'static,
        Fut: Future<Output = Result<M::Output, RemoteError>> + 'static,
    {
        self.route_with_transfer::<M, _, _>(move |params, _transfer| handler(params))
    }

    /// Register a handler that also receives the buffers moved with the call.
    #[must_use]
    pub fn route_with_transfer<M, F, Fut>(mut self, handler: F) -> Self
    where
        M: Method,
        F: Fn(M::Params, Transfer) -> Fut + 'static,
        Fut: Future<Output = Result<M::Output, RemoteError>> + 'static,
    {
        let handler: RequestHandler = Box::new(move |params, transfer| {
            match serde_json::from_value::<M::Params>(params) {
                Ok(params) => handler(params, transfer)
                    .map(|result| -> Result<serde_json::Value, RpcError> {
                        let output = result.map_err(RpcError::Remote)?;
                        Ok(serde_json::to_value(output)?)
                    })
                    .boxed_local(),
                Err(err) => futures_util::future::ready(Err(RpcError::Codec(err))).boxed_local(),
            }
        });
        self.requests.insert(M::NAME, handler);

        self
    }

    #[must_use]
    pub fn on_notification<M, F>(mut self, handler: F) -> Self
    where
        M: Method,
        F: Fn(M::Params) + 'static,
    {
        self.notifications.insert(
            M::NAME,
            Box::new(move |params| -> Result<(), RpcError> {
                handler(serde_json::from_value(params)?);
                Ok(())
            }),
        );

        self
    }

    /// Serve `port` until the peer closes it.
    pub async fn serve(self, port: MessagePort) {
        let (sender, mut receiver) = port.split();

        while let Some(envelope) = receiver.recv().await {
            match envelope.message {
                Message::Request { id, method, params } => {
                    tracing::trace!(%id, method, "rpc request");
                    let outcome = match self.dispatch(&method, params, envelope.transfer).await {
                        Ok(result) => Outcome::Result(result),
                        Err(err) => {
                            tracing::debug!(%id, method, error = %err, "rpc request failed");
                            Outcome::Error(err.into_remote())
                        }
                    };

                    if sender.post(Envelope::new(Message::Response { id, outcome })).is_err() {
                        tracing::debug!("rpc peer gone; stop serving");
                        break;
                    }
                }
                Message::Notification { method, params } => {
                    match self.notifications.get(method.as_str()) {
                        Some(handler) => {
                            if let Err(err) = handler(params) {
                                tracing::warn!(method, error = %err, "bad notification");
                            }
                        }
                        None => tracing::warn!(method, "notification without handler"),
                    }
                }
                Message::Response { id, .. } => {
                    tracing::warn!(%id, "router port received a response; ignored");
                }
            }
        }
    }

    async fn dispatch(
        &self,
        method: &str,
        params: serde_json::Value,
        transfer: Transfer,
    ) -> Result<serde_json::Value, RpcError> {
        let handler = self
            .requests
            .get(method)
            .ok_or_else(|| RpcError::UnknownMethod(method.to_string()))?;

        handler(params, transfer).await
    }
}
