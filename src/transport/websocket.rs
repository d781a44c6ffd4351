use std::sync::Arc;

use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Notify};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};

use super::messages::{RealtimeInputMessage, ServerMessage, SetupMessage};
use super::{SessionSetup, Transport, TransportEvent, TransportEventSink, TransportSession};
use crate::audio::codec::EncodedChunk;
use crate::config::EngineConfig;
use crate::error::{CallError, Result};

type RawWs = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<RawWs, Message>;
type WsStream = SplitStream<RawWs>;

/// Direct WebSocket connection to the engine
pub struct WebSocketTransport {
    url: String,
    api_key_env: Option<String>,
    outbound_queue: usize,
}

impl WebSocketTransport {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            api_key_env: None,
            outbound_queue: 32,
        }
    }

    pub fn from_config(engine: &EngineConfig) -> Self {
        Self {
            url: engine.url.clone(),
            api_key_env: engine.api_key_env.clone(),
            outbound_queue: engine.outbound_queue.max(1),
        }
    }

    /// URL to dial, with the API key appended when one is configured
    fn endpoint(&self) -> String {
        let key = self
            .api_key_env
            .as_deref()
            .and_then(|name| std::env::var(name).ok())
            .filter(|key| !key.is_empty());

        match key {
            Some(key) => {
                let separator = if self.url.contains('?') { '&' } else { '?' };
                format!("{}{}key={}", self.url, separator, key)
            }
            None => self.url.clone(),
        }
    }
}

#[async_trait::async_trait]
impl Transport for WebSocketTransport {
    async fn open(
        &self,
        setup: &SessionSetup,
        events: TransportEventSink,
    ) -> Result<TransportSession> {
        info!("Connecting to engine at {} ({})", self.url, setup.session_id);

        let (ws, _response) = connect_async(self.endpoint())
            .await
            .map_err(|e| CallError::transport(format!("Failed to connect to engine: {}", e)))?;

        let (mut sink, stream) = ws.split();

        let setup_json = serde_json::to_string(&SetupMessage::new(setup))
            .map_err(|e| CallError::transport(format!("Failed to encode setup: {}", e)))?;
        sink.send(Message::Text(setup_json))
            .await
            .map_err(|e| CallError::transport(format!("Failed to send setup: {}", e)))?;

        info!("Connected to engine, waiting for setup acknowledgement");

        let (outbound_tx, outbound_rx) = mpsc::channel(self.outbound_queue);
        let shutdown = Arc::new(Notify::new());

        let writer = tokio::spawn(write_pump(
            sink,
            outbound_rx,
            Arc::clone(&shutdown),
            events.clone(),
        ));
        let reader = tokio::spawn(read_pump(stream, events));

        Ok(TransportSession::new(
            outbound_tx,
            shutdown,
            Some(reader),
            Some(writer),
        ))
    }

    fn name(&self) -> &str {
        "websocket"
    }
}

async fn write_pump(
    mut sink: WsSink,
    mut outbound: mpsc::Receiver<EncodedChunk>,
    shutdown: Arc<Notify>,
    events: TransportEventSink,
) {
    loop {
        tokio::select! {
            _ = shutdown.notified() => break,
            chunk = outbound.recv() => {
                let Some(chunk) = chunk else { break };
                let text = match serde_json::to_string(&RealtimeInputMessage::from_chunk(&chunk)) {
                    Ok(text) => text,
                    Err(e) => {
                        warn!("Failed to encode audio chunk: {}", e);
                        continue;
                    }
                };
                if let Err(e) = sink.send(Message::Text(text)).await {
                    error!("Failed to send audio chunk: {}", e);
                    let _ = events.send(TransportEvent::Error(format!("send failed: {}", e)));
                    return;
                }
            }
        }
    }

    if let Err(e) = sink.send(Message::Close(None)).await {
        debug!("Close frame not sent: {}", e);
    }
    let _ = sink.close().await;
    debug!("WebSocket writer stopped");
}

async fn read_pump(mut stream: WsStream, events: TransportEventSink) {
    while let Some(message) = stream.next().await {
        let delivered = match message {
            Ok(Message::Text(text)) => dispatch(text.as_bytes(), &events),
            Ok(Message::Binary(data)) => dispatch(&data, &events),
            Ok(Message::Close(frame)) => {
                info!("Engine closed the connection: {:?}", frame);
                let _ = events.send(TransportEvent::Closed);
                return;
            }
            Ok(_) => true,
            Err(e) => {
                error!("Error reading from engine: {}", e);
                let _ = events.send(TransportEvent::Error(e.to_string()));
                return;
            }
        };
        if !delivered {
            debug!("Event receiver dropped, stopping reader");
            return;
        }
    }

    info!("Engine stream ended");
    let _ = events.send(TransportEvent::Closed);
}

/// Parse one engine frame and forward its events. Returns false once nobody listens.
fn dispatch(bytes: &[u8], events: &TransportEventSink) -> bool {
    match ServerMessage::parse(bytes) {
        Ok(message) => message
            .into_events()
            .into_iter()
            .all(|event| events.send(event).is_ok()),
        Err(e) => {
            warn!("{}", e);
            true
        }
    }
}
