//! Publish/subscribe transport over TCP
//!
//! Clients subscribe to topic prefixes; `publish` on the service delivers a
//! message to every client with a matching subscription. A client `send`
//! reaches the service as a `Publish` event, which the service may
//! republish.

use anyhow::Result;
use async_trait::async_trait;
use bytes::Bytes;
use edgecomm_core::ServiceSpec;
use edgecomm_plugin_api::{
    ClientAction, ClientTransport, EventKind, MessageContext, MessageHandler, PeerHandle,
    ServiceTransport, TransportFactory,
};
use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::debug;

use crate::codec::Frame;
use crate::conn::{Acceptor, AcceptorMode, Connection};

/// Transport id used in plugin role files.
pub const PUBSUB_TRANSPORT: &str = "tcp-pubsub";

pub struct PubSubClient {
    conn: Arc<Connection>,
    subscriptions: Mutex<BTreeSet<String>>,
}

impl PubSubClient {
    pub async fn connect(spec: &ServiceSpec) -> Result<Self> {
        Ok(Self {
            conn: Connection::connect(spec).await?,
            subscriptions: Mutex::new(BTreeSet::new()),
        })
    }

    /// Current subscriptions, sorted.
    pub fn subscriptions(&self) -> Vec<String> {
        self.subscriptions.lock().iter().cloned().collect()
    }

    pub(crate) fn connection(&self) -> &Arc<Connection> {
        &self.conn
    }
}

#[async_trait]
impl ClientTransport for PubSubClient {
    async fn send(&self, message: Bytes, context: MessageContext) -> Result<()> {
        self.conn
            .send_frame(Frame::message(context.topic, message))
            .await
    }

    /// Records the subscription only once the service has been told.
    async fn subscribe(&self, topic: &str) -> Result<()> {
        if self.subscriptions.lock().contains(topic) {
            debug!(topic = topic, "Already subscribed");
            return Ok(());
        }
        self.conn
            .send_frame(Frame::Subscribe(topic.to_string()))
            .await?;
        self.subscriptions.lock().insert(topic.to_string());
        Ok(())
    }

    async fn unsubscribe(&self, topic: &str) -> Result<()> {
        if !self.subscriptions.lock().contains(topic) {
            return Ok(());
        }
        self.conn
            .send_frame(Frame::Unsubscribe(topic.to_string()))
            .await?;
        self.subscriptions.lock().remove(topic);
        Ok(())
    }

    fn set_received_message_handler(&self, handler: MessageHandler) {
        self.conn.set_handler(handler);
    }

    async fn done(&self) {
        self.conn.close().await;
    }
}

pub struct PubSubService {
    acceptor: Acceptor,
}

impl PubSubService {
    pub async fn bind(spec: &ServiceSpec) -> Result<Self> {
        Ok(Self {
            acceptor: Acceptor::bind(spec, AcceptorMode::new(EventKind::Publish)).await?,
        })
    }
}

#[async_trait]
impl ServiceTransport for PubSubService {
    async fn send_to(
        &self,
        recipient: &PeerHandle,
        message: Bytes,
        context: MessageContext,
    ) -> Result<()> {
        self.acceptor
            .send_to(recipient, Frame::message(context.topic, message))
    }

    /// Publishes on `context.topic`; no topic publishes on the empty topic,
    /// which only catch-all subscribers receive.
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

/// Builds pub/sub clients and services.
#[derive(Debug, Default)]
pub struct PubSubFactory;

#[async_trait]
impl TransportFactory for PubSubFactory {
    fn id(&self) -> &str {
        PUBSUB_TRANSPORT
    }

    async fn connect(&self, spec: &ServiceSpec) -> Result<Arc<dyn ClientTransport>> {
        Ok(Arc::new(PubSubClient::connect(spec).await?))
    }

    async fn bind(&self, spec: &ServiceSpec) -> Result<Arc<dyn ServiceTransport>> {
        Ok(Arc::new(PubSubService::bind(spec).await?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use edgecomm_core::ServiceType;
    use std::time::Duration;
    use tokio::sync::mpsc;

    fn free_port() -> u16 {
        std::net::TcpListener::bind("127.0.0.1:0")
            .and_then(|l| l.local_addr())
            .map(|a| a.port())
            .unwrap()
    }

    fn spec(port: u16) -> ServiceSpec {
        ServiceSpec::builder(ServiceType::new("pubsub", "tcp"))
            .name("broker")
            .address("127.0.0.1")
            .port(port)
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn test_subscribe_and_publish() {
        let port = free_port();
        let service = PubSubService::bind(&spec(port)).await.unwrap();
        let (event_tx, mut events) = mpsc::unbounded_channel();
        service.set_received_message_handler(Arc::new(
            move |_peer: PeerHandle, _msg: Bytes, ctx: MessageContext| {
                let _ = event_tx.send((ctx.event, ctx.topic));
            },
        ));

        let client = PubSubClient::connect(&spec(port)).await.unwrap();
        let (msg_tx, mut messages) = mpsc::unbounded_channel();
        client.set_received_message_handler(Arc::new(
            move |_peer: PeerHandle, msg: Bytes, ctx: MessageContext| {
                if ctx.event == EventKind::Message {
                    let _ = msg_tx.send((ctx.topic, msg));
                }
            },
        ));

        assert_eq!(events.recv().await.unwrap().0, EventKind::Connect);

        client.subscribe("sensors/").await.unwrap();
        client.subscribe("sensors/").await.unwrap();
        assert_eq!(client.subscriptions(), vec!["sensors/"]);
        assert_eq!(
            events.recv().await.unwrap(),
            (EventKind::Subscribe, Some("sensors/".to_string()))
        );

        service
            .publish(Bytes::from("fire"), MessageContext::message().with_topic("alarms/1"))
            .await
            .unwrap();
        service
            .publish(Bytes::from("21.5"), MessageContext::message().with_topic("sensors/temp"))
            .await
            .unwrap();

        let (topic, msg) = tokio::time::timeout(Duration::from_secs(2), messages.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(topic.as_deref(), Some("sensors/temp"));
        assert_eq!(msg, Bytes::from("21.5"));

        client.unsubscribe("sensors/").await.unwrap();
        assert!(client.subscriptions().is_empty());
        assert_eq!(events.recv().await.unwrap().0, EventKind::Unsubscribe);

        client.done().await;
        service.done().await;
    }

    #[tokio::test]
    async fn test_client_send_is_reported_as_publish() {
        let port = free_port();
        let service = PubSubService::bind(&spec(port)).await.unwrap();
        let (event_tx, mut events) = mpsc::unbounded_channel();
        service.set_received_message_handler(Arc::new(
            move |_peer: PeerHandle, msg: Bytes, ctx: MessageContext| {
                if ctx.event == EventKind::Publish {
                    let _ = event_tx.send((ctx.topic, msg));
                }
            },
        ));

        let client = PubSubClient::connect(&spec(port)).await.unwrap();
        client
            .send(Bytes::from("on"), MessageContext::message().with_topic("lights/hall"))
            .await
            .unwrap();

        let (topic, msg) = tokio::time::timeout(Duration::from_secs(2), events.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(topic.as_deref(), Some("lights/hall"));
        assert_eq!(msg, Bytes::from("on"));
    }

    #[tokio::test]
    async fn test_failed_subscribe_is_not_recorded() {
        let port = free_port();
        let service = PubSubService::bind(&spec(port)).await.unwrap();
        let client = PubSubClient::connect(&spec(port)).await.unwrap();

        client.subscribe("sensors/").await.unwrap();
        client.done().await;

        assert!(client.subscribe("alarms/").await.is_err());
        assert!(client.unsubscribe("sensors/").await.is_err());
        assert_eq!(client.subscriptions(), vec!["sensors/"]);

        service.done().await;
    }
}
