use std::sync::Arc;

use anyhow::Context;
use async_nats::Client;
use futures::stream::StreamExt;
use tokio::sync::{mpsc, Notify};
use tracing::{debug, error, info, warn};

use super::messages::{AudioFrameMessage, ServerMessage, SetupMessage};
use super::{SessionSetup, Transport, TransportEvent, TransportEventSink, TransportSession};
use crate::audio::codec::EncodedChunk;
use crate::error::{CallError, Result};

/// Subjects used for one call session
#[derive(Debug, Clone)]
pub struct CallSubjects {
    pub setup: String,
    pub audio: String,
    pub events: String,
}

impl CallSubjects {
    pub fn new(session_id: &str) -> Self {
        Self {
            setup: format!("voice.{}.setup", session_id),
            audio: format!("voice.{}.audio", session_id),
            events: format!("voice.{}.events", session_id),
        }
    }
}

/// Engine reached through a NATS bridge
///
/// The bridge receives the setup and audio frames on per-session subjects and publishes
/// engine messages, in the same JSON format the WebSocket transport reads, on
/// `voice.<session>.events`.
pub struct NatsTransport {
    url: String,
    outbound_queue: usize,
}

impl NatsTransport {
    pub fn new(url: impl Into<String>, outbound_queue: usize) -> Self {
        Self {
            url: url.into(),
            outbound_queue: outbound_queue.max(1),
        }
    }

    async fn connect(&self) -> anyhow::Result<Client> {
        info!("Connecting to NATS at {}", self.url);

        let client = async_nats::connect(self.url.as_str())
            .await
            .context("Failed to connect to NATS")?;

        info!("Connected to NATS successfully");
        Ok(client)
    }
}

#[async_trait::async_trait]
impl Transport for NatsTransport {
    async fn open(
        &self,
        setup: &SessionSetup,
        events: TransportEventSink,
    ) -> Result<TransportSession> {
        let client = self
            .connect()
            .await
            .map_err(|e| CallError::transport(format!("{:#}", e)))?;
        let subjects = CallSubjects::new(&setup.session_id);

        // Subscribe before sending setup so the acknowledgement cannot be missed
        let subscriber = client
            .subscribe(subjects.events.clone())
            .await
            .map_err(|e| CallError::transport(format!("Failed to subscribe to events: {}", e)))?;
        info!("Subscribed to {}", subjects.events);

        let setup_json = serde_json::to_vec(&SetupMessage::new(setup))
            .map_err(|e| CallError::transport(format!("Failed to encode setup: {}", e)))?;
        client
            .publish(subjects.setup.clone(), setup_json.into())
            .await
            .map_err(|e| CallError::transport(format!("Failed to publish setup: {}", e)))?;

        let (outbound_tx, outbound_rx) = mpsc::channel(self.outbound_queue);
        let shutdown = Arc::new(Notify::new());

        let writer = tokio::spawn(publish_pump(
            client,
            subjects,
            setup.session_id.clone(),
            setup.input_sample_rate,
            outbound_rx,
            Arc::clone(&shutdown),
            events.clone(),
        ));
        let reader = tokio::spawn(subscribe_pump(subscriber, events));

        Ok(TransportSession::new(
            outbound_tx,
            shutdown,
            Some(reader),
            Some(writer),
        ))
    }

    fn name(&self) -> &str {
        "nats"
    }
}

async fn publish_pump(
    client: Client,
    subjects: CallSubjects,
    session_id: String,
    sample_rate: u32,
    mut outbound: mpsc::Receiver<EncodedChunk>,
    shutdown: Arc<Notify>,
    events: TransportEventSink,
) {
    let mut sequence: u32 = 0;

    loop {
        tokio::select! {
            _ = shutdown.notified() => break,
            chunk = outbound.recv() => {
                let Some(chunk) = chunk else { break };
                let message = AudioFrameMessage::from_chunk(&session_id, sequence, &chunk);
                let payload = match serde_json::to_vec(&message) {
                    Ok(payload) => payload,
                    Err(e) => {
                        warn!("Failed to encode audio frame: {}", e);
                        continue;
                    }
                };
                if let Err(e) = client.publish(subjects.audio.clone(), payload.into()).await {
                    error!("Failed to publish audio frame: {}", e);
                    let _ = events.send(TransportEvent::Error(format!("publish failed: {}", e)));
                    return;
                }
                sequence = sequence.wrapping_add(1);
            }
        }
    }

    // Send final frame
    let marker = AudioFrameMessage::final_marker(&session_id, sequence, sample_rate);
    match serde_json::to_vec(&marker) {
        Ok(payload) => {
            if let Err(e) = client.publish(subjects.audio.clone(), payload.into()).await {
                debug!("Final frame not sent: {}", e);
            }
        }
        Err(e) => debug!("Failed to encode final frame: {}", e),
    }
    if let Err(e) = client.flush().await {
        debug!("NATS flush on close failed: {}", e);
    }
    info!("NATS publisher stopped after {} frames", sequence);
}

async fn subscribe_pump(mut subscriber: async_nats::Subscriber, events: TransportEventSink) {
    while let Some(msg) = subscriber.next().await {
        match ServerMessage::parse(&msg.payload) {
            Ok(message) => {
                for event in message.into_events() {
                    if events.send(event).is_err() {
                        debug!("Event receiver dropped, stopping subscriber");
                        return;
                    }
                }
            }
            Err(e) => warn!("Failed to parse engine message: {}", e),
        }
    }

    info!("NATS event subscription ended");
    let _ = events.send(TransportEvent::Closed);
}
