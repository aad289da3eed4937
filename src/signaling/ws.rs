//! WebSocket transport for the relay connection
//!
//! One reader task and one writer task per connection, joined to the rest
//! of the agent through unbounded channels. Both tasks end when the socket
//! does; the bus then reports closed and the agent's reconnect loop takes
//! over.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

use crate::errors::AgentError;
use crate::signaling::client::MessageBus;

pub struct WsBus {
    outbound: mpsc::UnboundedSender<Message>,
    inbound: Mutex<mpsc::UnboundedReceiver<String>>,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

impl WsBus {
    /// Dial the relay and spin up the socket tasks.
    pub async fn connect(url: &str) -> Result<Self, AgentError> {
        let (stream, _) = connect_async(url)
            .await
            .map_err(|e| AgentError::Signaling(format!("relay connect {}: {}", url, e)))?;
        log::info!("Signaling socket connected to {}", url);

        let (mut sink, mut source) = stream.split();
        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Message>();
        let (in_tx, in_rx) = mpsc::unbounded_channel::<String>();

        let writer = tokio::spawn(async move {
            while let Some(message) = out_rx.recv().await {
                if let Err(e) = sink.send(message).await {
                    log::warn!("Signaling socket write failed: {}", e);
                    break;
                }
            }
        });

        let pong_tx = out_tx.clone();
        let reader = tokio::spawn(async move {
            while let Some(frame) = source.next().await {
                match frame {
                    Ok(Message::Text(text)) => {
                        if in_tx.send(text).is_err() {
                            break;
                        }
                    }
                    Ok(Message::Ping(payload)) => {
                        let _ = pong_tx.send(Message::Pong(payload));
                    }
                    Ok(Message::Close(_)) => {
                        log::info!("Relay closed the signaling socket");
                        break;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        log::warn!("Signaling socket read failed: {}", e);
                        break;
                    }
                }
            }
            // in_tx drops here; recv_text starts returning None.
        });

        Ok(Self {
            outbound: out_tx,
            inbound: Mutex::new(in_rx),
            reader,
            writer,
        })
    }
}

#[async_trait]
impl MessageBus for WsBus {
    async fn send_text(&self, text: String) -> Result<(), AgentError> {
        self.outbound
            .send(Message::Text(text))
            .map_err(|_| AgentError::RelayDisconnected("signaling socket closed".to_string()))
    }

    async fn recv_text(&self) -> Option<String> {
        self.inbound.lock().await.recv().await
    }
}

impl Drop for WsBus {
    fn drop(&mut self) {
        self.reader.abort();
        self.writer.abort();
    }
}
