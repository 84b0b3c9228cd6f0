//! Serial delivery of inbound events to a message handler
//!
//! Transports push events from any number of connection tasks; one dispatch
//! task per transport instance drains them in order. Events received before
//! a handler is installed are kept until it is.

use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

use crate::transport::{MessageContext, MessageHandler, PeerHandle};

type Event = (PeerHandle, Bytes, MessageContext);

/// Per-instance event queue feeding one handler.
pub struct Inbox {
    tx: mpsc::UnboundedSender<Event>,
    rx: Mutex<Option<mpsc::UnboundedReceiver<Event>>>,
    handler: Arc<RwLock<Option<MessageHandler>>>,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
}

impl Default for Inbox {
    fn default() -> Self {
        Self::new()
    }
}

impl Inbox {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx,
            rx: Mutex::new(Some(rx)),
            handler: Arc::new(RwLock::new(None)),
            dispatcher: Mutex::new(None),
        }
    }

    /// Queues an event. Dropped silently once the inbox is closed.
    pub fn deliver(&self, source: PeerHandle, message: Bytes, context: MessageContext) {
        if self.tx.send((source, message, context)).is_err() {
            trace!("Inbox closed, dropping event");
        }
    }

    /// Installs `handler`; the first call starts dispatching. Must be called
    /// from within a tokio runtime.
    pub fn set_handler(&self, handler: MessageHandler) {
        *self.handler.write() = Some(handler);

        let Some(mut rx) = self.rx.lock().take() else {
            return;
        };
        let handler = self.handler.clone();
        let task = tokio::spawn(async move {
            while let Some((source, message, context)) = rx.recv().await {
                let current = handler.read().clone();
                if let Some(current) = current {
                    current(source, message, context);
                }
            }
            debug!("Inbox dispatcher stopped");
        });
        *self.dispatcher.lock() = Some(task);
    }

    pub fn has_handler(&self) -> bool {
        self.handler.read().is_some()
    }

    /// Stops dispatching. Queued events are discarded.
    pub fn close(&self) {
        if let Some(task) = self.dispatcher.lock().take() {
            task.abort();
        }
        self.rx.lock().take();
    }
}

impl Drop for Inbox {
    fn drop(&mut self) {
        self.close();
    }
}
