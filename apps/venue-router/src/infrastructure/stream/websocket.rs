//! WebSocket Transport
//!
//! Opens a provider stream with `tokio-tungstenite` and pumps frames between
//! the socket and the [`TransportLink`] channels: a writer task drains the
//! outbound channel and sends a close frame when it is dropped, a reader task
//! forwards text frames and reports the close code.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;

use crate::application::ports::{Connector, TransportError, TransportFrame, TransportLink};
use crate::domain::connection::NORMAL_CLOSE_CODE;

const CHANNEL_CAPACITY: usize = 1024;

/// Connector for one provider WebSocket endpoint.
#[derive(Debug, Clone)]
pub struct WebSocketConnector {
    url: String,
}

impl WebSocketConnector {
    /// Create a connector for `url`.
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }

    /// Endpoint URL.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl Connector for WebSocketConnector {
    async fn connect(&self) -> Result<TransportLink, TransportError> {
        tracing::debug!(url = %self.url, "Opening WebSocket");
        let (stream, _response) = tokio_tungstenite::connect_async(self.url.as_str())
            .await
            .map_err(|e| TransportError(e.to_string()))?;
        let (mut write, mut read) = stream.split();

        let (outbound_tx, mut outbound_rx) = mpsc::channel::<String>(CHANNEL_CAPACITY);
        let (inbound_tx, inbound_rx) = mpsc::channel::<TransportFrame>(CHANNEL_CAPACITY);

        tokio::spawn(async move {
            while let Some(text) = outbound_rx.recv().await {
                if let Err(e) = write.send(Message::Text(text.into())).await {
                    tracing::debug!(error = %e, "WebSocket write failed");
                    return;
                }
            }
            let close = CloseFrame {
                code: CloseCode::from(NORMAL_CLOSE_CODE),
                reason: "client closed".into(),
            };
            let _ = write.send(Message::Close(Some(close))).await;
        });

        tokio::spawn(async move {
            let frame = loop {
                match read.next().await {
                    Some(Ok(Message::Text(text))) => {
                        if inbound_tx
                            .send(TransportFrame::Text(text.as_str().to_owned()))
                            .await
                            .is_err()
                        {
                            return;
                        }
                    }
                    Some(Ok(Message::Close(frame))) => {
                        break TransportFrame::Closed {
                            code: frame.as_ref().map(|f| u16::from(f.code)),
                            reason: frame.map(|f| f.reason.as_str().to_owned()).unwrap_or_default(),
                        };
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        break TransportFrame::Closed {
                            code: None,
                            reason: e.to_string(),
                        };
                    }
                    None => {
                        break TransportFrame::Closed {
                            code: None,
                            reason: "stream ended".to_string(),
                        };
                    }
                }
            };
            let _ = inbound_tx.send(frame).await;
        });

        Ok(TransportLink {
            outbound: outbound_tx,
            inbound: inbound_rx,
        })
    }
}
