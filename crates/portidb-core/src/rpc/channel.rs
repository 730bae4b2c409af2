use crate::{proto::Message, rpc::RpcError};
use futures_channel::mpsc::{self, UnboundedReceiver, UnboundedSender};
use futures_util::StreamExt;

///
/// Envelope
///
/// A message plus the byte buffers transferred with it. Buffers are moved
/// to the receiving side, never copied into the message body.
///

#[derive(Clone, Debug, PartialEq)]
pub struct Envelope {
    pub message: Message,
    pub transfer: Vec<Vec<u8>>,
}

impl Envelope {
    #[must_use]
    pub const fn new(message: Message) -> Self {
        Self {
            message,
            transfer: Vec::new(),
        }
    }
}

///
/// MessageChannel
///
/// Two linked in-memory ports; whatever one side posts the other receives.
///

pub struct MessageChannel;

impl MessageChannel {
    #[must_use]
    #[allow(clippy::new_ret_no_self)]
    pub fn new() -> (MessagePort, MessagePort) {
        let (a_tx, a_rx) = mpsc::unbounded();
        let (b_tx, b_rx) = mpsc::unbounded();

        (
            MessagePort::new(PortSender(a_tx), PortReceiver(b_rx)),
            MessagePort::new(PortSender(b_tx), PortReceiver(a_rx)),
        )
    }
}

///
/// MessagePort
///

pub struct MessagePort {
    sender: PortSender,
    receiver: PortReceiver,
}

impl MessagePort {
    #[must_use]
    pub const fn new(sender: PortSender, receiver: PortReceiver) -> Self {
        Self { sender, receiver }
    }

    #[must_use]
    pub fn split(self) -> (PortSender, PortReceiver) {
        (self.sender, self.receiver)
    }
}

///
/// PortSender
///

#[derive(Clone, Debug)]
pub struct PortSender(UnboundedSender<Envelope>);

impl PortSender {
    pub fn post(&self, envelope: Envelope) -> Result<(), RpcError> {
        self.0
            .unbounded_send(envelope)
            .map_err(|_| RpcError::Closed)
    }

    /// Close this direction of the channel; the peer's receiver ends.
    pub fn close(&self) {
        self.0.close_channel();
    }
}

///
/// PortReceiver
///

#[derive(Debug)]
pub struct PortReceiver(UnboundedReceiver<Envelope>);

impl PortReceiver {
    /// Next envelope, or `None` once the peer has closed or gone away.
    pub async fn recv(&mut self) -> Option<Envelope> {
        self.0.next().await
    }
}
