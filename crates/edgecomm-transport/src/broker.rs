//! Broker-style transport over TCP
//!
//! Clients open with a `Connect` handshake carrying their client id, then
//! publish and subscribe like `tcp-pubsub`. The service reports every step
//! to its handler (`connect`, `publish`, `subscribe`, `pingreq`,
//! `disconnect`) and answers with acknowledgements: the handler calls
//! `send_to` with `MessageContext::ack` set to `connack`, `suback` or
//! `pingresp`. With the `autoAck` type parameter the service acknowledges
//! by itself.
//!
//! Type parameters:
//!
//! | key | role | meaning |
//! |-----|------|---------|
//! | `clientId` | client | id sent in the handshake; generated when absent |
//! | `autoAck` | service | acknowledge without the application |

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use bytes::Bytes;
use edgecomm_core::ServiceSpec;
use edgecomm_plugin_api::{
    ClientAction, ClientTransport, EventKind, MessageContext, MessageHandler, PeerHandle,
    ServiceTransport, TransportFactory,
};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

use crate::codec::{AckKind, Frame};
use crate::conn::{Acceptor, AcceptorMode};
use crate::pubsub::PubSubClient;

/// Transport id used in plugin role files.
pub const BROKER_TRANSPORT: &str = "tcp-broker";

static NEXT_CLIENT: AtomicU64 = AtomicU64::new(1);

fn client_id(spec: &ServiceSpec) -> String {
    match spec.type_param("clientId").and_then(|v| v.as_str()) {
        Some(id) => id.to_string(),
        None => format!(
            "edgecomm-{}-{}",
            std::process::id(),
            NEXT_CLIENT.fetch_add(1, Ordering::Relaxed)
        ),
    }
}

pub struct BrokerClient {
    inner: PubSubClient,
    client_id: String,
}

impl BrokerClient {
    /// Connects and sends the handshake. The service's `connack` arrives as
    /// an `Ack` event.
    pub async fn connect(spec: &ServiceSpec) -> Result<Self> {
        let inner = PubSubClient::connect(spec).await?;
        let client_id = client_id(spec);
        inner
            .connection()
            .send_frame(Frame::Connect(client_id.clone()))
            .await?;
        debug!(client_id = %client_id, "Sent broker handshake");
        Ok(Self { inner, client_id })
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn subscriptions(&self) -> Vec<String> {
        self.inner.subscriptions()
    }

    /// Asks the service for a `pingresp`.
    pub async fn ping(&self) -> Result<()> {
        self.inner.connection().send_frame(Frame::PingReq).await
    }
}

#[async_trait]
impl ClientTransport for BrokerClient {
    /// Publishes on `context.topic`. A `PingReq` context sends a ping
    /// instead.
    async fn send(&self, message: Bytes, context: MessageContext) -> Result<()> {
        if context.event == EventKind::PingReq {
            return self.ping().await;
        }
        self.inner.send(message, context).await
    }

    async fn subscribe(&self, topic: &str) -> Result<()> {
        self.inner.subscribe(topic).await
    }

    async fn unsubscribe(&self, topic: &str) -> Result<()> {
        self.inner.unsubscribe(topic).await
    }

    fn set_received_message_handler(&self, handler: MessageHandler) {
        self.inner.set_received_message_handler(handler);
    }

    async fn done(&self) {
        self.inner.done().await;
    }
}

pub struct BrokerService {
    acceptor: Acceptor,
    auto_ack: bool,
}

impl BrokerService {
    pub async fn bind(spec: &ServiceSpec) -> Result<Self> {
        let auto_ack = spec
            .type_param("autoAck")
            .and_then(|v| v.as_bool())
            .unwrap_or(false);
        info!(auto_ack = auto_ack, "Starting broker service");
        Ok(Self {
            acceptor: Acceptor::bind(spec, AcceptorMode::broker(auto_ack)).await?,
            auto_ack,
        })
    }

    pub fn auto_ack(&self) -> bool {
        self.auto_ack
    }
}

#[async_trait]
impl ServiceTransport for BrokerService {
    /// Sends the acknowledgement named by `context.ack`, or a message on
    /// `context.topic` when no ack is named. A `suback` echoes the topic.
    async fn send_to(
        &self,
        recipient: &PeerHandle,
        message: Bytes,
        context: MessageContext,
    ) -> Result<()> {
        let frame = match context.ack.as_deref() {
            Some(name) => {
                let kind = AckKind::from_name(name)
                    .ok_or_else(|| anyhow!("Unknown acknowledgement '{}'", name))?;
                let topic = match kind {
                    AckKind::SubAck => context.topic,
                    AckKind::ConnAck | AckKind::PingResp => None,
                };
                Frame::Ack { kind, topic }
            }
            None => Frame::message(context.topic, message),
        };
        self.acceptor.send_to(recipient, frame)
    }

    async fn publish(&self, message: Bytes, context: MessageContext) -> Result<()> {
        let topic = context.topic.unwrap_or_default();
        self.acceptor.publish(&topic, message);
        Ok(())
    }

    async fn manage_client(&self, client: &PeerHandle, context: MessageContext) -> Result<()> {
        match context.action {
            Some(ClientAction::EndStream) => self.acceptor.end_stream(client),
            None => Ok(()),
        }
    }

    fn set_received_message_handler(&self, handler: MessageHandler) {
        self.acceptor.set_handler(handler);
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        Some(self.acceptor.local_addr())
    }

    async fn done(&self) {
        self.acceptor.close();
    }
}

/// Builds broker clients and services.
#[derive(Debug, Default)]
pub struct BrokerFactory;

#[async_trait]
impl TransportFactory for BrokerFactory {
    fn id(&self) -> &str {
        BROKER_TRANSPORT
    }

    async fn connect(&self, spec: &ServiceSpec) -> Result<Arc<dyn ClientTransport>> {
        Ok(Arc::new(BrokerClient::connect(spec).await?))
    }

    async fn bind(&self, spec: &ServiceSpec) -> Result<Arc<dyn ServiceTransport>> {
        Ok(Arc::new(BrokerService::bind(spec).await?))
    }
}
