//! Transport traits implemented by communication backends
//!
//! A client transport talks to one service; a service transport accepts any
//! number of clients. Inbound traffic and connection lifecycle changes reach
//! the application through a single [`MessageHandler`] per instance.

use async_trait::async_trait;
use bytes::Bytes;
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;

/// What an inbound event is about.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// Application payload
    #[default]
    Message,
    /// A peer connected
    Connect,
    /// A peer disconnected
    Disconnect,
    /// A peer subscribed to a topic
    Subscribe,
    /// A peer unsubscribed from a topic
    Unsubscribe,
    /// A peer published on a topic
    Publish,
    /// A peer checked that the connection is alive
    PingReq,
    /// The service acknowledged a request; `MessageContext::ack` names which
    Ack,
    /// Transport error; the payload carries the description
    Error,
    /// The transport shut down
    Close,
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EventKind::Message => "message",
            EventKind::Connect => "connect",
            EventKind::Disconnect => "disconnect",
            EventKind::Subscribe => "subscribe",
            EventKind::Unsubscribe => "unsubscribe",
            EventKind::Publish => "publish",
            EventKind::PingReq => "pingreq",
            EventKind::Ack => "ack",
            EventKind::Error => "error",
            EventKind::Close => "close",
        };
        f.write_str(s)
    }
}

/// Instruction a service gives a transport about one of its clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientAction {
    /// Close the connection to the client
    EndStream,
}

/// Side information travelling with a message or event.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessageContext {
    pub event: EventKind,
    /// Pub/sub topic, if the transport has topics
    pub topic: Option<String>,
    /// Acknowledgement requested from the transport (`connack`, `suback`, ...)
    pub ack: Option<String>,
    pub action: Option<ClientAction>,
}

impl MessageContext {
    pub fn event(event: EventKind) -> Self {
        Self {
            event,
            ..Default::default()
        }
    }

    pub fn message() -> Self {
        Self::default()
    }

    pub fn with_topic(mut self, topic: impl Into<String>) -> Self {
        self.topic = Some(topic.into());
        self
    }

    pub fn with_ack(mut self, ack: impl Into<String>) -> Self {
        self.ack = Some(ack.into());
        self
    }

    pub fn with_action(mut self, action: ClientAction) -> Self {
        self.action = Some(action);
        self
    }
}

/// Identifies the remote end of an inbound event.
///
/// Service transports hand these out per connection; a handler passes one
/// back to `send_to` or `manage_client` to address that peer.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PeerHandle {
    pub id: u64,
    pub addr: Option<SocketAddr>,
}

impl PeerHandle {
    pub fn new(id: u64, addr: Option<SocketAddr>) -> Self {
        Self { id, addr }
    }
}

impl fmt::Display for PeerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.addr {
            Some(addr) => write!(f, "peer#{}@{}", self.id, addr),
            None => write!(f, "peer#{}", self.id),
        }
    }
}

/// Receives inbound messages and events: `(source, message, context)`.
pub type MessageHandler = Arc<dyn Fn(PeerHandle, Bytes, MessageContext) + Send + Sync>;

/// Client side of a communication backend.
///
/// Operations a backend does not support succeed without effect.
#[async_trait]
pub trait ClientTransport: Send + Sync {
    /// Sends a message to the service.
    async fn send(&self, message: Bytes, context: MessageContext) -> anyhow::Result<()>;

    /// Subscribes to a topic.
    async fn subscribe(&self, _topic: &str) -> anyhow::Result<()> {
        Ok(())
    }

    /// Unsubscribes from a topic.
    async fn unsubscribe(&self, _topic: &str) -> anyhow::Result<()> {
        Ok(())
    }

    /// Installs the handler for inbound messages, replacing any previous one.
    fn set_received_message_handler(&self, handler: MessageHandler);

    /// Closes the connection. Idempotent.
    async fn done(&self);
}

/// Service side of a communication backend.
///
/// Operations a backend does not support succeed without effect.
#[async_trait]
pub trait ServiceTransport: Send + Sync {
    /// Sends a message to one connected client.
    async fn send_to(
        &self,
        recipient: &PeerHandle,
        message: Bytes,
        context: MessageContext,
    ) -> anyhow::Result<()>;

    /// Sends a message to every interested client.
    async fn publish(&self, _message: Bytes, _context: MessageContext) -> anyhow::Result<()> {
        Ok(())
    }

    /// Applies `context.action` to a client.
    async fn manage_client(
        &self,
        _client: &PeerHandle,
        _context: MessageContext,
    ) -> anyhow::Result<()> {
        Ok(())
    }

    /// Installs the handler for inbound messages, replacing any previous one.
    fn set_received_message_handler(&self, handler: MessageHandler);

    /// Address the service is reachable at, once bound.
    fn local_addr(&self) -> Option<SocketAddr> {
        None
    }

    /// Stops accepting clients and closes every connection. Idempotent.
    async fn done(&self);
}
