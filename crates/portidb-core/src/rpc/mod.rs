//! Module: rpc
//! Responsibility: request/response and notification exchange over a
//! bidirectional message port.
//! Does not own: method semantics (see `proto` and the engine).
//! Boundary: the client posts eagerly; the router answers sequentially.

mod channel;
mod client;
pub mod codec;
mod error;
mod router;

#[cfg(test)]
mod tests;

pub use channel::{Envelope, MessageChannel, MessagePort, PortReceiver, PortSender};
pub use client::RpcClient;
pub use error::RpcError;
pub use router::Router;
