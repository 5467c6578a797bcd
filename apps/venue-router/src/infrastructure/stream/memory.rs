//! In-Memory Transport
//!
//! A [`Connector`] backed by channels. Each accepted connect hands the test
//! side a [`ServerSession`] through [`MemoryServer::accept`]; the connector
//! can also be told to refuse or hang connect attempts.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::application::ports::{Connector, TransportError, TransportFrame, TransportLink};
use crate::domain::wire::{CodecError, WireMessage};

const CHANNEL_CAPACITY: usize = 256;

/// How the next connect attempts behave.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectBehavior {
    /// Open a session.
    #[default]
    Accept,
    /// Fail immediately.
    Refuse,
    /// Never complete.
    Hang,
}

#[derive(Debug)]
struct Shared {
    behavior: Mutex<ConnectBehavior>,
    attempts: AtomicU32,
    sessions: mpsc::UnboundedSender<ServerSession>,
}

/// Connector half, given to the connection manager.
#[derive(Debug, Clone)]
pub struct MemoryConnector {
    shared: Arc<Shared>,
}

/// Server half, kept by the test.
#[derive(Debug)]
pub struct MemoryServer {
    shared: Arc<Shared>,
    sessions: mpsc::UnboundedReceiver<ServerSession>,
}

/// Create a connected connector/server pair.
#[must_use]
pub fn memory_transport() -> (MemoryConnector, MemoryServer) {
    let (tx, rx) = mpsc::unbounded_channel();
    let shared = Arc::new(Shared {
        behavior: Mutex::new(ConnectBehavior::Accept),
        attempts: AtomicU32::new(0),
        sessions: tx,
    });
    (
        MemoryConnector {
            shared: Arc::clone(&shared),
        },
        MemoryServer {
            shared,
            sessions: rx,
        },
    )
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn connect(&self) -> Result<TransportLink, TransportError> {
        self.shared.attempts.fetch_add(1, Ordering::SeqCst);
        let behavior = *self.shared.behavior.lock();
        match behavior {
            ConnectBehavior::Accept => {}
            ConnectBehavior::Refuse => {
                return Err(TransportError("connection refused".to_string()));
            }
            ConnectBehavior::Hang => std::future::pending::<()>().await,
        }

        let (client_tx, server_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (server_tx, client_rx) = mpsc::channel(CHANNEL_CAPACITY);
        self.shared
            .sessions
            .send(ServerSession {
                from_client: server_rx,
                to_client: server_tx,
            })
            .map_err(|_| TransportError("server dropped".to_string()))?;
        Ok(TransportLink {
            outbound: client_tx,
            inbound: client_rx,
        })
    }
}

impl MemoryServer {
    /// Change how later connect attempts behave.
    pub fn set_behavior(&self, behavior: ConnectBehavior) {
        *self.shared.behavior.lock() = behavior;
    }

    /// Connect attempts seen so far.
    #[must_use]
    pub fn connect_attempts(&self) -> u32 {
        self.shared.attempts.load(Ordering::SeqCst)
    }

    /// Wait for the next accepted session.
    pub async fn accept(&mut self) -> Option<ServerSession> {
        self.sessions.recv().await
    }

    /// Take an already accepted session without waiting.
    pub fn try_accept(&mut self) -> Option<ServerSession> {
        self.sessions.try_recv().ok()
    }
}

/// Server side of one accepted connection.
#[derive(Debug)]
pub struct ServerSession {
    from_client: mpsc::Receiver<String>,
    to_client: mpsc::Sender<TransportFrame>,
}

impl ServerSession {
    /// Next raw text frame from the client. `None` once the client closed.
    pub async fn recv_text(&mut self) -> Option<String> {
        self.from_client.recv().await
    }

    /// Next frame from the client, decoded.
    pub async fn recv(&mut self) -> Option<Result<WireMessage, CodecError>> {
        self.recv_text().await.map(|text| WireMessage::decode(&text))
    }

    /// Next decoded frame whose type is not `skip`.
    pub async fn recv_skipping(&mut self, skip: &str) -> Option<WireMessage> {
        loop {
            match self.recv().await? {
                Ok(message) if message.kind == skip => {}
                Ok(message) => return Some(message),
                Err(_) => {}
            }
        }
    }

    /// Frame the client sent, if one is already waiting.
    pub fn try_recv_text(&mut self) -> Option<String> {
        self.from_client.try_recv().ok()
    }

    /// Send a raw text frame.
    pub async fn send_text(&self, text: impl Into<String>) -> bool {
        self.to_client
            .send(TransportFrame::Text(text.into()))
            .await
            .is_ok()
    }

    /// Send an envelope.
    pub async fn send(&self, message: &WireMessage) -> bool {
        match message.encode() {
            Ok(text) => self.send_text(text).await,
            Err(_) => false,
        }
    }

    /// Close the connection with a code.
    pub async fn close(self, code: Option<u16>, reason: &str) {
        let _ = self
            .to_client
            .send(TransportFrame::Closed {
                code,
                reason: reason.to_string(),
            })
            .await;
    }

    /// Whether the client dropped its end.
    #[must_use]
    pub fn is_client_closed(&self) -> bool {
        self.to_client.is_closed()
    }
}
