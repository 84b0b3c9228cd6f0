//! Request/reply transport over TCP
//!
//! Clients send requests to the service; the service answers individual
//! clients with `send_to`. There are no topics, so `subscribe` and
//! `publish` do nothing.

use anyhow::Result;
use async_trait::async_trait;
use bytes::Bytes;
use edgecomm_core::ServiceSpec;
use edgecomm_plugin_api::{
    ClientAction, ClientTransport, EventKind, MessageContext, MessageHandler, PeerHandle,
    ServiceTransport, TransportFactory,
};
use std::net::SocketAddr;
use std::sync::Arc;

use crate::codec::Frame;
use crate::conn::{Acceptor, AcceptorMode, Connection};

/// Transport id used in plugin role files.
pub const REQREP_TRANSPORT: &str = "tcp-reqrep";

pub struct ReqRepClient {
    conn: Arc<Connection>,
}

impl ReqRepClient {
    pub async fn connect(spec: &ServiceSpec) -> Result<Self> {
        Ok(Self {
            conn: Connection::connect(spec).await?,
        })
    }
}

#[async_trait]
impl ClientTransport for ReqRepClient {
    async fn send(&self, message: Bytes, context: MessageContext) -> Result<()> {
        self.conn
            .send_frame(Frame::message(context.topic, message))
            .await
    }

    fn set_received_message_handler(&self, handler: MessageHandler) {
        self.conn.set_handler(handler);
    }

    async fn done(&self) {
        self.conn.close().await;
    }
}

pub struct ReqRepService {
    acceptor: Acceptor,
}

impl ReqRepService {
    pub async fn bind(spec: &ServiceSpec) -> Result<Self> {
        Ok(Self {
            acceptor: Acceptor::bind(spec, AcceptorMode::new(EventKind::Message)).await?,
        })
    }
}

#[async_trait]
impl ServiceTransport for ReqRepService {
    async fn send_to(
        &self,
        recipient: &PeerHandle,
        message: Bytes,
        context: MessageContext,
    ) -> Result<()> {
        self.acceptor
            .send_to(recipient, Frame::message(context.topic, message))
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

/// Builds request/reply clients and services.
#[derive(Debug, Default)]
pub struct ReqRepFactory;

#[async_trait]
impl TransportFactory for ReqRepFactory {
    fn id(&self) -> &str {
        REQREP_TRANSPORT
    }

    async fn connect(&self, spec: &ServiceSpec) -> Result<Arc<dyn ClientTransport>> {
        Ok(Arc::new(ReqRepClient::connect(spec).await?))
    }

    async fn bind(&self, spec: &ServiceSpec) -> Result<Arc<dyn ServiceTransport>> {
        Ok(Arc::new(ReqRepService::bind(spec).await?))
    }
}
