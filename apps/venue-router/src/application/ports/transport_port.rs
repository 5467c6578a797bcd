//! Transport Port (Driven Port)
//!
//! A connector opens one text-frame transport to a provider. The link is a
//! pair of channels so the connection actor never touches socket types.
//! Dropping `outbound` closes the transport.

use async_trait::async_trait;
use tokio::sync::mpsc;

/// A frame read from the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportFrame {
    /// Text frame.
    Text(String),
    /// The transport closed.
    Closed {
        /// Close code, if the peer sent one.
        code: Option<u16>,
        /// Close reason.
        reason: String,
    },
}

/// Channels for one open transport.
#[derive(Debug)]
pub struct TransportLink {
    /// Text frames to write.
    pub outbound: mpsc::Sender<String>,
    /// Frames read.
    pub inbound: mpsc::Receiver<TransportFrame>,
}

/// Failure to open a transport.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct TransportError(pub String);

/// Port for opening provider transports.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Open a transport.
    async fn connect(&self) -> Result<TransportLink, TransportError>;
}
