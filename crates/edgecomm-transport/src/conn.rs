//! Connection handling shared by the TCP transports
//!
//! [`Connection`] is the client end of one TCP stream; [`Acceptor`] runs the
//! listening side and keeps one peer entry per connected client. Both push
//! inbound traffic into an [`Inbox`] so the application handler sees events
//! one at a time.

use anyhow::{anyhow, Context, Result};
use bytes::Bytes;
use dashmap::DashMap;
use edgecomm_core::ServiceSpec;
use edgecomm_plugin_api::{EventKind, Inbox, MessageContext, MessageHandler, PeerHandle};
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::{AbortHandle, JoinHandle};
use tokio::time::timeout;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_util::codec::Framed;
use tracing::{debug, info, instrument, warn};

use crate::codec::{topic_matches, AckKind, Frame, FrameCodec};

/// Connection timeout for clients
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

type FrameSink = SplitSink<Framed<TcpStream, FrameCodec>, Frame>;

fn event(kind: EventKind, topic: Option<String>) -> MessageContext {
    MessageContext {
        event: kind,
        topic,
        ..Default::default()
    }
}

/// Client end of a transport connection.
pub struct Connection {
    peer: PeerHandle,
    writer: tokio::sync::Mutex<Option<FrameSink>>,
    inbox: Arc<Inbox>,
    reader: Mutex<Option<JoinHandle<()>>>,
    closed: AtomicBool,
}

impl Connection {
    /// Connects to `spec.address:spec.port`.
    #[instrument(skip(spec), fields(name = ?spec.name(), address = ?spec.address(), port = spec.port()))]
    pub async fn connect(spec: &ServiceSpec) -> Result<Arc<Self>> {
        let address = spec
            .address()
            .ok_or_else(|| anyhow!("Service spec has no address to connect to"))?;

        info!("Connecting to {}:{}", address, spec.port());

        let stream = timeout(CONNECT_TIMEOUT, TcpStream::connect((address, spec.port())))
            .await
            .context("Connection timeout")?
            .context("Failed to connect")?;
        stream
            .set_nodelay(true)
            .context("Failed to set TCP_NODELAY")?;
        let remote = stream.peer_addr().ok();

        let (sink, mut frames) = Framed::new(stream, FrameCodec::new()).split();
        let peer = PeerHandle::new(0, remote);
        let inbox = Arc::new(Inbox::new());

        let reader_inbox = inbox.clone();
        let reader_peer = peer.clone();
        let reader = tokio::spawn(async move {
            loop {
                match frames.next().await {
                    Some(Ok(Frame::Message { topic, payload })) => {
                        reader_inbox.deliver(
                            reader_peer.clone(),
                            payload,
                            event(EventKind::Message, topic),
                        );
                    }
                    Some(Ok(Frame::Ack { kind, topic })) => {
                        let mut ctx = event(EventKind::Ack, topic);
                        ctx.ack = Some(kind.as_str().to_string());
                        reader_inbox.deliver(reader_peer.clone(), Bytes::new(), ctx);
                    }
                    Some(Ok(Frame::Close)) | None => break,
                    Some(Ok(other)) => debug!(frame = ?other, "Ignoring frame from service"),
                    Some(Err(e)) => {
                        warn!(error = %e, "Read error");
                        reader_inbox.deliver(
                            reader_peer.clone(),
                            Bytes::from(e.to_string()),
                            event(EventKind::Error, None),
                        );
                        break;
                    }
                }
            }
            debug!("Connection closed by service");
            reader_inbox.deliver(reader_peer, Bytes::new(), event(EventKind::Close, None));
        });

        info!("Successfully connected to {}:{}", address, spec.port());

        Ok(Arc::new(Self {
            peer,
            writer: tokio::sync::Mutex::new(Some(sink)),
            inbox,
            reader: Mutex::new(Some(reader)),
            closed: AtomicBool::new(false),
        }))
    }

    pub fn peer(&self) -> &PeerHandle {
        &self.peer
    }

    pub async fn send_frame(&self, frame: Frame) -> Result<()> {
        let mut writer = self.writer.lock().await;
        let sink = writer
            .as_mut()
            .ok_or_else(|| anyhow!("Connection is closed"))?;
        sink.send(frame).await.context("Failed to send frame")
    }

    pub fn set_handler(&self, handler: MessageHandler) {
        self.inbox.set_handler(handler);
    }

    /// Closes the connection. Idempotent.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        if let Some(mut sink) = self.writer.lock().await.take() {
            let _ = sink.send(Frame::Close).await;
            let _ = sink.close().await;
        }
        if let Some(reader) = self.reader.lock().take() {
            reader.abort();
        }
        self.inbox.close();
        debug!(peer = %self.peer, "Connection closed");
    }
}

/// A connected client as seen by the service.
struct Peer {
    handle: PeerHandle,
    tx: mpsc::UnboundedSender<Frame>,
    subscriptions: HashSet<String>,
    reader: Option<AbortHandle>,
}

/// How an [`Acceptor`] reports and answers client traffic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AcceptorMode {
    /// Event kind for payload frames
    pub inbound: EventKind,
    /// Report `Connect` when the socket is accepted; otherwise when the
    /// client sends its `Connect` frame
    pub connect_on_accept: bool,
    /// Answer connect, subscribe and ping frames without the application
    pub auto_ack: bool,
}

impl AcceptorMode {
    pub fn new(inbound: EventKind) -> Self {
        Self {
            inbound,
            connect_on_accept: true,
            auto_ack: false,
        }
    }

    /// Handshake-driven mode used by the broker transport.
    pub fn broker(auto_ack: bool) -> Self {
        Self {
            inbound: EventKind::Publish,
            connect_on_accept: false,
            auto_ack,
        }
    }
}

/// Listening side of a transport.
pub struct Acceptor {
    local_addr: SocketAddr,
    inbox: Arc<Inbox>,
    peers: Arc<DashMap<u64, Peer>>,
    accept_task: Mutex<Option<JoinHandle<()>>>,
    closed: AtomicBool,
}

impl Acceptor {
    /// Listens on `spec.port`, on the spec's address when it is a literal
    /// IPv4 address and on every interface otherwise.
    #[instrument(skip(spec), fields(name = ?spec.name(), port = spec.port()))]
    pub async fn bind(spec: &ServiceSpec, mode: AcceptorMode) -> Result<Self> {
        let ip = spec
            .address()
            .and_then(|a| a.parse::<Ipv4Addr>().ok())
            .unwrap_or(Ipv4Addr::UNSPECIFIED);

        let listener = TcpListener::bind((ip, spec.port()))
            .await
            .with_context(|| format!("Failed to bind {}:{}", ip, spec.port()))?;
        let local_addr = listener.local_addr().context("Failed to read local address")?;

        info!(addr = %local_addr, "Listening for clients");

        let inbox = Arc::new(Inbox::new());
        let peers: Arc<DashMap<u64, Peer>> = Arc::new(DashMap::new());

        let accept_task = tokio::spawn(accept_loop(listener, peers.clone(), inbox.clone(), mode));

        Ok(Self {
            local_addr,
            inbox,
            peers,
            accept_task: Mutex::new(Some(accept_task)),
            closed: AtomicBool::new(false),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn set_handler(&self, handler: MessageHandler) {
        self.inbox.set_handler(handler);
    }

    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }

    /// Queues a frame for one client.
    pub fn send_to(&self, peer: &PeerHandle, frame: Frame) -> Result<()> {
        let entry = self
            .peers
            .get(&peer.id)
            .ok_or_else(|| anyhow!("Unknown or disconnected client {}", peer))?;
        entry
            .tx
            .send(frame)
            .map_err(|_| anyhow!("Client {} is disconnecting", peer))
    }

    /// Queues a message for every client subscribed to a prefix of `topic`.
    /// Returns the number of recipients.
    pub fn publish(&self, topic: &str, payload: Bytes) -> usize {
        let mut recipients = 0;
        for peer in self.peers.iter() {
            if !peer.subscriptions.iter().any(|s| topic_matches(s, topic)) {
                continue;
            }
            let frame = Frame::message(Some(topic.to_string()), payload.clone());
            if peer.tx.send(frame).is_ok() {
                recipients += 1;
            }
        }
        debug!(topic = topic, recipients = recipients, "Published message");
        recipients
    }

    /// Disconnects one client. Frames already queued for it are still
    /// flushed.
    pub fn end_stream(&self, peer: &PeerHandle) -> Result<()> {
        let (_, removed) = self
            .peers
            .remove(&peer.id)
            .ok_or_else(|| anyhow!("Unknown or disconnected client {}", peer))?;

        info!(peer = %removed.handle, "Ending client stream");
        if let Some(reader) = &removed.reader {
            reader.abort();
        }
        let _ = removed.tx.send(Frame::Close);
        self.inbox.deliver(
            removed.handle.clone(),
            Bytes::new(),
            event(EventKind::Disconnect, None),
        );
        Ok(())
    }

    /// Stops accepting and disconnects everyone. Idempotent.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        if let Some(task) = self.accept_task.lock().take() {
            task.abort();
        }

        let ids: Vec<u64> = self.peers.iter().map(|p| *p.key()).collect();
        for id in ids {
            if let Some((_, peer)) = self.peers.remove(&id) {
                if let Some(reader) = &peer.reader {
                    reader.abort();
                }
                let _ = peer.tx.send(Frame::Close);
            }
        }

        self.inbox.close();
        info!(addr = %self.local_addr, "Stopped listening");
    }
}

impl Drop for Acceptor {
    fn drop(&mut self) {
        self.close();
    }
}

async fn accept_loop(
    listener: TcpListener,
    peers: Arc<DashMap<u64, Peer>>,
    inbox: Arc<Inbox>,
    mode: AcceptorMode,
) {
    let next_id = AtomicU64::new(1);

    loop {
        let (stream, addr) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                warn!(error = %e, "Failed to accept connection");
                continue;
            }
        };
        if let Err(e) = stream.set_nodelay(true) {
            debug!(error = %e, "Failed to set TCP_NODELAY");
        }

        let id = next_id.fetch_add(1, Ordering::SeqCst);
        let handle = PeerHandle::new(id, Some(addr));
        debug!(peer = %handle, "Client connected");

        let (mut sink, frames) = Framed::new(stream, FrameCodec::new()).split();
        let (tx, rx) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            let mut outgoing = UnboundedReceiverStream::new(rx).map(Ok::<Frame, std::io::Error>);
            if let Err(e) = sink.send_all(&mut outgoing).await {
                debug!(error = %e, "Write error");
            }
            let _ = sink.close().await;
        });

        peers.insert(
            id,
            Peer {
                handle: handle.clone(),
                tx,
                subscriptions: HashSet::new(),
                reader: None,
            },
        );
        if mode.connect_on_accept {
            inbox.deliver(handle.clone(), Bytes::new(), event(EventKind::Connect, None));
        }

        let reader = tokio::spawn(read_peer(frames, handle, peers.clone(), inbox.clone(), mode));
        if let Some(mut peer) = peers.get_mut(&id) {
            peer.reader = Some(reader.abort_handle());
        }
    }
}

async fn read_peer(
    mut frames: futures::stream::SplitStream<Framed<TcpStream, FrameCodec>>,
    handle: PeerHandle,
    peers: Arc<DashMap<u64, Peer>>,
    inbox: Arc<Inbox>,
    mode: AcceptorMode,
) {
    let acknowledge = |kind: AckKind, topic: Option<String>| {
        if !mode.auto_ack {
            return;
        }
        if let Some(peer) = peers.get(&handle.id) {
            let _ = peer.tx.send(Frame::Ack { kind, topic });
        }
    };

    loop {
        match frames.next().await {
            Some(Ok(Frame::Message { topic, payload })) => {
                inbox.deliver(handle.clone(), payload, event(mode.inbound, topic));
            }
            Some(Ok(Frame::Connect(client_id))) => {
                if mode.connect_on_accept {
                    debug!(peer = %handle, "Ignoring handshake, already connected");
                    continue;
                }
                debug!(peer = %handle, client_id = %client_id, "Client handshake");
                inbox.deliver(
                    handle.clone(),
                    Bytes::from(client_id),
                    event(EventKind::Connect, None),
                );
                acknowledge(AckKind::ConnAck, None);
            }
            Some(Ok(Frame::Subscribe(topic))) => {
                if let Some(mut peer) = peers.get_mut(&handle.id) {
                    peer.subscriptions.insert(topic.clone());
                }
                debug!(peer = %handle, topic = %topic, "Client subscribed");
                inbox.deliver(
                    handle.clone(),
                    Bytes::new(),
                    event(EventKind::Subscribe, Some(topic.clone())),
                );
                acknowledge(AckKind::SubAck, Some(topic));
            }
            Some(Ok(Frame::PingReq)) => {
                inbox.deliver(handle.clone(), Bytes::new(), event(EventKind::PingReq, None));
                acknowledge(AckKind::PingResp, None);
            }
            Some(Ok(Frame::Ack { kind, .. })) => {
                debug!(peer = %handle, ack = kind.as_str(), "Ignoring acknowledgement from client");
            }
            Some(Ok(Frame::Unsubscribe(topic))) => {
                if let Some(mut peer) = peers.get_mut(&handle.id) {
                    peer.subscriptions.remove(&topic);
                }
                debug!(peer = %handle, topic = %topic, "Client unsubscribed");
                inbox.deliver(
                    handle.clone(),
                    Bytes::new(),
                    event(EventKind::Unsubscribe, Some(topic)),
                );
            }
            Some(Ok(Frame::Close)) | None => break,
            Some(Err(e)) => {
                warn!(peer = %handle, error = %e, "Read error");
                inbox.deliver(
                    handle.clone(),
                    Bytes::from(e.to_string()),
                    event(EventKind::Error, None),
                );
                break;
            }
        }
    }

    // end_stream may have removed the peer already and reported it
    if peers.remove(&handle.id).is_some() {
        debug!(peer = %handle, "Client disconnected");
        inbox.deliver(handle, Bytes::new(), event(EventKind::Disconnect, None));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use edgecomm_core::ServiceType;

    fn free_port() -> u16 {
        std::net::TcpListener::bind("127.0.0.1:0")
            .and_then(|l| l.local_addr())
            .map(|a| a.port())
            .unwrap()
    }

    fn spec(port: u16) -> ServiceSpec {
        ServiceSpec::builder(ServiceType::new("echo", "tcp"))
            .name("svc1")
            .address("127.0.0.1")
            .port(port)
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn test_connect_without_address_fails() {
        let spec = ServiceSpec::builder(ServiceType::new("echo", "tcp"))
            .name("svc1")
            .port(9999)
            .build()
            .unwrap();
        let err = Connection::connect(&spec).await.err().unwrap();
        assert!(err.to_string().contains("no address"));
    }

    #[tokio::test]
    async fn test_connect_and_disconnect_events() {
        let port = free_port();
        let acceptor = Acceptor::bind(&spec(port), AcceptorMode::new(EventKind::Message)).await.unwrap();
        assert_eq!(acceptor.local_addr().port(), port);

        let (tx, mut rx) = mpsc::unbounded_channel();
        acceptor.set_handler(Arc::new(move |_peer: PeerHandle, _msg: Bytes, ctx: MessageContext| {
            let _ = tx.send(ctx.event);
        }));

        let conn = Connection::connect(&spec(port)).await.unwrap();
        assert_eq!(rx.recv().await, Some(EventKind::Connect));

        conn.close().await;
        conn.close().await;
        assert_eq!(rx.recv().await, Some(EventKind::Disconnect));
        assert_eq!(acceptor.peer_count(), 0);
    }

    #[tokio::test]
    async fn test_publish_respects_subscriptions() {
        let port = free_port();
        let acceptor = Acceptor::bind(&spec(port), AcceptorMode::new(EventKind::Publish)).await.unwrap();

        let (tx, mut rx) = mpsc::unbounded_channel();
        acceptor.set_handler(Arc::new(move |_peer: PeerHandle, _msg: Bytes, ctx: MessageContext| {
            let _ = tx.send(ctx.event);
        }));

        let conn = Connection::connect(&spec(port)).await.unwrap();
        assert_eq!(rx.recv().await, Some(EventKind::Connect));

        conn.send_frame(Frame::Subscribe("sensors/".into())).await.unwrap();
        assert_eq!(rx.recv().await, Some(EventKind::Subscribe));

        assert_eq!(acceptor.publish("alarms/fire", Bytes::from("x")), 0);
        assert_eq!(acceptor.publish("sensors/temp", Bytes::from("21")), 1);
    }

    #[tokio::test]
    async fn test_handshake_mode_reports_connect_on_handshake() {
        let port = free_port();
        let acceptor = Acceptor::bind(&spec(port), AcceptorMode::broker(true)).await.unwrap();

        let (tx, mut rx) = mpsc::unbounded_channel();
        acceptor.set_handler(Arc::new(move |_peer: PeerHandle, msg: Bytes, ctx: MessageContext| {
            let _ = tx.send((ctx.event, msg));
        }));

        let conn = Connection::connect(&spec(port)).await.unwrap();
        let (ack_tx, mut acks) = mpsc::unbounded_channel();
        conn.set_handler(Arc::new(move |_peer: PeerHandle, _msg: Bytes, ctx: MessageContext| {
            if ctx.event == EventKind::Ack {
                let _ = ack_tx.send((ctx.ack, ctx.topic));
            }
        }));

        conn.send_frame(Frame::Connect("lamp".into())).await.unwrap();
        assert_eq!(rx.recv().await, Some((EventKind::Connect, Bytes::from("lamp"))));
        assert_eq!(acks.recv().await, Some((Some("connack".to_string()), None)));

        conn.send_frame(Frame::PingReq).await.unwrap();
        assert_eq!(rx.recv().await, Some((EventKind::PingReq, Bytes::new())));
        assert_eq!(acks.recv().await, Some((Some("pingresp".to_string()), None)));

        conn.close().await;
        assert_eq!(rx.recv().await.map(|(kind, _)| kind), Some(EventKind::Disconnect));
    }
}
