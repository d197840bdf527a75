//! WebSocket transport backed by `tokio-tungstenite`.
//!
//! The socket is split into a sink and a stream and driven by one pump task.
//! Outbound text arrives over an unbounded channel; dropping the sender closes
//! the socket with code 1000. Inbound frames are forwarded as
//! [`TransportEvent`]s until the socket closes or fails.

use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;

use crate::application::ports::{
    CloseInfo, StreamConnector, StreamTransport, TransportError, TransportEvent,
};

const INBOUND_CAPACITY: usize = 1024;

/// Opens WebSocket connections.
#[derive(Debug, Clone)]
pub struct TungsteniteConnector {
    connect_timeout: Duration,
}

impl Default for TungsteniteConnector {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
        }
    }
}

impl TungsteniteConnector {
    /// Create a connector with the given handshake timeout.
    #[must_use]
    pub const fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }
}

#[async_trait]
impl StreamConnector for TungsteniteConnector {
    async fn open(&self, url: &str) -> Result<StreamTransport, TransportError> {
        tracing::info!(url = %url, "Connecting to market stream");

        let (ws_stream, _response) =
            tokio::time::timeout(self.connect_timeout, tokio_tungstenite::connect_async(url))
                .await
                .map_err(|_| TransportError::Connect {
                    message: format!("timed out after {:?}", self.connect_timeout),
                })?
                .map_err(|e| TransportError::Connect {
                    message: e.to_string(),
                })?;

        let (mut write, mut read) = ws_stream.split();
        let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<String>();
        let (inbound_tx, inbound_rx) = mpsc::channel::<TransportEvent>(INBOUND_CAPACITY);

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    outbound = outbound_rx.recv() => {
                        if let Some(text) = outbound {
                            if let Err(e) = write.send(Message::Text(text.into())).await {
                                let _ = inbound_tx
                                    .send(TransportEvent::Error(TransportError::Io {
                                        message: e.to_string(),
                                    }))
                                    .await;
                                break;
                            }
                        } else {
                            let frame = CloseFrame {
                                code: CloseCode::Normal,
                                reason: "normal closure".into(),
                            };
                            if let Err(e) = write.send(Message::Close(Some(frame))).await {
                                tracing::debug!(error = %e, "Close frame not sent");
                            }
                            break;
                        }
                    }
                    msg = read.next() => {
                        let event = match msg {
                            Some(Ok(Message::Text(text))) => {
                                TransportEvent::Text(text.as_str().to_owned())
                            }
                            Some(Ok(Message::Binary(data))) => {
                                match String::from_utf8(data.to_vec()) {
                                    Ok(text) => TransportEvent::Text(text),
                                    Err(_) => {
                                        tracing::debug!(
                                            len = data.len(),
                                            "Ignoring non-UTF-8 binary frame"
                                        );
                                        continue;
                                    }
                                }
                            }
                            Some(Ok(Message::Ping(data))) => {
                                if let Err(e) = write.send(Message::Pong(data)).await {
                                    tracing::debug!(error = %e, "Pong not sent");
                                }
                                continue;
                            }
                            Some(Ok(Message::Pong(_) | Message::Frame(_))) => continue,
                            Some(Ok(Message::Close(frame))) => {
                                let info = frame.map_or_else(CloseInfo::default, |f| CloseInfo {
                                    code: Some(u16::from(f.code)),
                                    reason: f.reason.as_str().to_owned(),
                                });
                                let _ = inbound_tx.send(TransportEvent::Closed(info)).await;
                                break;
                            }
                            Some(Err(e)) => {
                                let _ = inbound_tx
                                    .send(TransportEvent::Error(TransportError::Io {
                                        message: e.to_string(),
                                    }))
                                    .await;
                                break;
                            }
                            None => {
                                let _ = inbound_tx
                                    .send(TransportEvent::Closed(CloseInfo::default()))
                                    .await;
                                break;
                            }
                        };
                        if inbound_tx.send(event).await.is_err() {
                            break;
                        }
                    }
                }
            }
            tracing::debug!("WebSocket pump stopped");
        });

        Ok(StreamTransport {
            outbound: outbound_tx,
            inbound: inbound_rx,
        })
    }
}
