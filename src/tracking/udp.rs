//! JSON-over-UDP landmark receiver
//!
//! Receives one packet per captured frame from an external detector process
//! (a MediaPipe / MoveNet helper script, for example):
//!
//! ```json
//! { "timestamp_ms": 1234.5,
//!   "landmarks": [ { "name": "left_shoulder", "x": 312.0, "y": 188.5, "score": 0.97 } ] }
//! ```

use serde::Deserialize;
use std::time::{Duration, Instant};
use tokio::net::UdpSocket;

use super::frame::{LandmarkFrame, LandmarkObservation};
use super::landmarks::{Landmark, LandmarkSchema};
use crate::config::TrackingConfig;
use crate::error::{MarionetteError, TrackingError};
use crate::pipeline::LandmarkDetector;

/// A single JSON packet from the detector process
#[derive(Debug, Clone, Deserialize)]
pub struct LandmarkPacket {
    /// Capture time; the receive time is used when absent
    #[serde(default)]
    pub timestamp_ms: Option<f64>,
    #[serde(default)]
    pub landmarks: Vec<PacketLandmark>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PacketLandmark {
    pub name: String,
    pub x: f64,
    pub y: f64,
    #[serde(default)]
    pub z: Option<f64>,
    #[serde(default, alias = "confidence")]
    pub score: Option<f64>,
}

/// Parse a packet into a frame, keeping only landmarks the schema knows.
pub fn parse_packet(
    bytes: &[u8],
    schema: LandmarkSchema,
    received_ms: f64,
) -> Result<LandmarkFrame, TrackingError> {
    let packet: LandmarkPacket = serde_json::from_slice(bytes)
        .map_err(|e| TrackingError::Parse(format!("JSON parse error: {}", e)))?;

    let observations = packet
        .landmarks
        .iter()
        .filter_map(|raw| {
            let landmark = match raw.name.parse::<Landmark>() {
                Ok(landmark) if schema.contains(landmark) => landmark,
                _ => {
                    tracing::trace!("Skipping landmark {:?} not in {}", raw.name, schema);
                    return None;
                }
            };
            Some(LandmarkObservation {
                landmark,
                x: raw.x,
                y: raw.y,
                z: raw.z,
                confidence: raw.score,
            })
        })
        .collect();

    Ok(LandmarkFrame::new(
        packet.timestamp_ms.unwrap_or(received_ms),
        observations,
    ))
}

/// Landmark detector fed by UDP packets
pub struct UdpLandmarkDetector {
    config: TrackingConfig,
    socket: Option<UdpSocket>,
    started: Instant,
    buf: Vec<u8>,
}

impl UdpLandmarkDetector {
    /// Create a new detector (does not bind yet)
    pub fn new(config: &TrackingConfig) -> Self {
        Self {
            config: config.clone(),
            socket: None,
            started: Instant::now(),
            buf: vec![0u8; 65536],
        }
    }

    /// Bind the UDP socket and start receiving
    pub async fn start(&mut self) -> Result<(), MarionetteError> {
        let addr = format!("{}:{}", self.config.listen_address, self.config.port);

        let socket = UdpSocket::bind(&addr).await.map_err(|e| {
            TrackingError::Receiver(format!("Failed to bind to {}: {}", addr, e))
        })?;

        tracing::info!(
            "Landmark receiver listening on {} ({} schema)",
            addr,
            self.config.schema
        );
        self.socket = Some(socket);

        Ok(())
    }

    pub fn local_addr(&self) -> Option<std::net::SocketAddr> {
        self.socket.as_ref().and_then(|s| s.local_addr().ok())
    }

    /// Stop the receiver
    pub fn stop(&mut self) {
        self.socket = None;
        tracing::info!("Landmark receiver stopped");
    }
}

impl LandmarkDetector for UdpLandmarkDetector {
    async fn estimate(&mut self) -> Result<Option<LandmarkFrame>, MarionetteError> {
        let socket = match &self.socket {
            Some(s) => s,
            None => return Ok(None),
        };

        let timeout = Duration::from_millis(self.config.poll_timeout_ms);
        let size = match tokio::time::timeout(timeout, socket.recv(&mut self.buf)).await {
            Ok(Ok(size)) => size,
            Ok(Err(e)) => {
                return Err(TrackingError::Receiver(format!("Receive error: {}", e)).into());
            }
            // No packet this poll
            Err(_) => return Ok(None),
        };

        let received_ms = self.started.elapsed().as_secs_f64() * 1000.0;
        let frame = parse_packet(&self.buf[..size], self.config.schema, received_ms)?;
        Ok(Some(frame))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_json() -> String {
        serde_json::json!({
            "timestamp_ms": 1500.0,
            "landmarks": [
                { "name": "left_shoulder", "x": 320.0, "y": 200.0, "score": 0.95 },
                { "name": "left_elbow", "x": 360.0, "y": 260.0, "z": -0.1 },
                { "name": "mouth_left", "x": 300.0, "y": 120.0, "score": 0.8 },
                { "name": "tail", "x": 0.0, "y": 0.0 }
            ]
        })
        .to_string()
    }

    #[test]
    fn test_parse_packet() {
        let frame = parse_packet(sample_json().as_bytes(), LandmarkSchema::BlazePose, 0.0).unwrap();
        assert_eq!(frame.timestamp_ms, 1500.0);
        assert_eq!(frame.observations.len(), 3);

        let shoulder = frame.get(Landmark::LeftShoulder).unwrap();
        assert_eq!(shoulder.confidence, Some(0.95));
        assert_eq!(shoulder.z, None);

        let elbow = frame.get(Landmark::LeftElbow).unwrap();
        assert_eq!(elbow.z, Some(-0.1));
        assert_eq!(elbow.confidence, None);
    }

    #[test]
    fn test_parse_packet_filters_by_schema() {
        let frame = parse_packet(sample_json().as_bytes(), LandmarkSchema::Coco, 0.0).unwrap();
        assert_eq!(frame.observations.len(), 2);
        assert!(frame.get(Landmark::MouthLeft).is_none());
    }

    #[test]
    fn test_parse_packet_without_timestamp() {
        let json = r#"{"landmarks":[{"name":"nose","x":1.0,"y":2.0}]}"#;
        let frame = parse_packet(json.as_bytes(), LandmarkSchema::Coco, 42.0).unwrap();
        assert_eq!(frame.timestamp_ms, 42.0);
        assert_eq!(frame.observations.len(), 1);
    }

    #[test]
    fn test_parse_invalid_json() {
        let result = parse_packet(b"not json", LandmarkSchema::Coco, 0.0);
        assert!(matches!(result, Err(TrackingError::Parse(_))));
    }

    #[tokio::test]
    async fn test_unstarted_detector_yields_nothing() {
        let mut detector = UdpLandmarkDetector::new(&TrackingConfig::default());
        assert!(detector.estimate().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_receive_packet_over_udp() {
        let config = TrackingConfig {
            port: 0,
            poll_timeout_ms: 1000,
            ..TrackingConfig::default()
        };
        let mut detector = UdpLandmarkDetector::new(&config);
        detector.start().await.unwrap();
        let addr = detector.local_addr().unwrap();

        let sender = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        sender.send_to(sample_json().as_bytes(), addr).await.unwrap();

        let frame = detector.estimate().await.unwrap().unwrap();
        assert_eq!(frame.observations.len(), 3);

        detector.stop();
        assert!(detector.local_addr().is_none());
    }
}
