//! WebSocket relay client
//!
//! Every client first registers its own group with `init`. A supplier then
//! joins a leader's group and sends one frame per tracked capture. A leader
//! keeps its group and tracks from the merged frames of its suppliers.

use std::time::{Duration, Instant};

use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use super::codec::{FrameCodec, RelayFrame};
use super::protocol::{data_messages, init_messages, make_supplier_messages, MessageType, WireMessage};
use super::supplier::SupplierAggregator;
use crate::config::RelayConfig;
use crate::error::{MarionetteError, TrackingError};
use crate::pipeline::LandmarkDetector;
use crate::tracking::{LandmarkFrame, LandmarkObservation, LandmarkSchema};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

fn relay_error(context: &str, e: impl std::fmt::Display) -> MarionetteError {
    TrackingError::Receiver(format!("{}: {}", context, e)).into()
}

fn to_message(message: WireMessage) -> Message {
    match message {
        WireMessage::Text(text) => Message::Text(text),
        WireMessage::Binary(bytes) => Message::Binary(bytes),
    }
}

/// A connection to the relay that has registered its own group
pub struct RelayClient {
    socket: Socket,
    codec: FrameCodec,
}

impl RelayClient {
    /// Connect and register a group for `client_id`.
    pub async fn connect(
        url: &str,
        client_id: &str,
        schema: LandmarkSchema,
    ) -> Result<Self, MarionetteError> {
        let codec = FrameCodec::new(client_id, schema)?;
        let init = init_messages(client_id, schema)?;

        let (socket, _) = connect_async(url)
            .await
            .map_err(|e| relay_error(&format!("Failed to connect to {}", url), e))?;

        let mut client = Self { socket, codec };
        client.send(init).await?;

        tracing::info!("Joined relay {} as {} ({} schema)", url, client_id, schema);
        Ok(client)
    }

    pub fn client_id(&self) -> &str {
        self.codec.client_id()
    }

    async fn send(&mut self, messages: [WireMessage; 2]) -> Result<(), MarionetteError> {
        for message in messages {
            self.socket
                .feed(to_message(message))
                .await
                .map_err(|e| relay_error("Relay send failed", e))?;
        }
        self.socket
            .flush()
            .await
            .map_err(|e| relay_error("Relay send failed", e))
    }

    /// Join `leader`'s group. The relay closes the connection if the leader
    /// is unknown or uses another schema.
    pub async fn make_supplier(&mut self, leader: &str) -> Result<(), MarionetteError> {
        self.send(make_supplier_messages(leader)).await?;
        tracing::info!("{} supplying {}", self.client_id(), leader);
        Ok(())
    }

    /// Send one frame. Depth is not carried.
    pub async fn supply(&mut self, observations: &[LandmarkObservation]) -> Result<(), MarionetteError> {
        let frame = self.codec.encode(observations)?;
        self.send(data_messages(frame)).await
    }

    /// Stay leader and read supplier frames as a landmark source.
    pub fn into_leader(self, config: &RelayConfig, poll_timeout: Duration) -> RelayLandmarkDetector {
        RelayLandmarkDetector {
            socket: self.socket,
            codec: self.codec,
            aggregator: SupplierAggregator::from_config(config),
            poll_timeout,
            started: Instant::now(),
            expecting: MessageType::None,
            closed: false,
        }
    }
}

/// Forwards every frame of an inner detector to the relay.
///
/// Once the relay connection fails, tracking carries on locally.
pub struct SupplyingDetector<D> {
    inner: D,
    client: Option<RelayClient>,
}

impl<D: LandmarkDetector> SupplyingDetector<D> {
    pub fn new(inner: D, client: RelayClient) -> Self {
        Self {
            inner,
            client: Some(client),
        }
    }

    pub fn is_supplying(&self) -> bool {
        self.client.is_some()
    }
}

impl<D: LandmarkDetector> LandmarkDetector for SupplyingDetector<D> {
    async fn estimate(&mut self) -> Result<Option<LandmarkFrame>, MarionetteError> {
        let frame = self.inner.estimate().await?;

        if let (Some(frame), Some(client)) = (&frame, &mut self.client) {
            if let Err(e) = client.supply(&frame.observations).await {
                tracing::warn!("Relay connection lost, tracking locally only: {}", e);
                self.client = None;
            }
        }

        Ok(frame)
    }
}

/// Landmark source fed by the suppliers of a leader's group
pub struct RelayLandmarkDetector {
    socket: Socket,
    codec: FrameCodec,
    aggregator: SupplierAggregator,
    poll_timeout: Duration,
    started: Instant,
    expecting: MessageType,
    closed: bool,
}

impl RelayLandmarkDetector {
    pub fn suppliers(&self) -> &SupplierAggregator {
        &self.aggregator
    }

    /// Read until a supplier frame decodes.
    async fn next_frame(&mut self) -> Result<RelayFrame, MarionetteError> {
        loop {
            let message = match self.socket.next().await {
                Some(Ok(message)) => message,
                Some(Err(e)) => return Err(relay_error("Relay receive failed", e)),
                None => {
                    return Err(TrackingError::Receiver("Relay connection closed".to_string()).into())
                }
            };

            let expecting = std::mem::take(&mut self.expecting);
            match (expecting, message) {
                (MessageType::None, Message::Text(token)) => match token.parse::<MessageType>() {
                    Ok(ty) => self.expecting = ty,
                    Err(e) => tracing::warn!("Relay: {}", e),
                },
                (MessageType::Data, Message::Binary(bytes)) => match self.codec.decode(&bytes) {
                    Ok(frame) => return Ok(frame),
                    Err(e) => tracing::warn!("Dropping relayed frame: {}", e),
                },
                (_, Message::Close(frame)) => {
                    let reason = frame.map(|f| f.reason.into_owned()).unwrap_or_default();
                    return Err(relay_error("Relay closed the connection", reason));
                }
                (_, Message::Ping(_) | Message::Pong(_) | Message::Frame(_)) => {
                    self.expecting = expecting;
                }
                (expecting, _) => {
                    tracing::warn!("Unexpected relay message while expecting {:?}", expecting);
                }
            }
        }
    }
}

impl LandmarkDetector for RelayLandmarkDetector {
    async fn estimate(&mut self) -> Result<Option<LandmarkFrame>, MarionetteError> {
        if self.closed {
            tokio::time::sleep(self.poll_timeout).await;
            return Ok(None);
        }

        let received = tokio::time::timeout(self.poll_timeout, self.next_frame()).await;
        let now = Instant::now();

        let fresh = match received {
            Ok(Ok(frame)) => {
                self.aggregator.ingest(frame, now);
                true
            }
            Ok(Err(e)) => {
                self.closed = true;
                return Err(e);
            }
            // No frame this poll
            Err(_) => false,
        };

        self.aggregator.prune(now);
        if !fresh || self.aggregator.is_empty() {
            return Ok(None);
        }

        let timestamp_ms = self.started.elapsed().as_secs_f64() * 1000.0;
        Ok(Some(LandmarkFrame::new(timestamp_ms, self.aggregator.merged())))
    }
}
