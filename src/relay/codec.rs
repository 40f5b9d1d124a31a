//! Binary landmark frame codec
//!
//! Little-endian, sections laid out back to back:
//!
//! ```text
//! [L: u8][client id: L bytes, UTF-8]
//! [N x i8 landmark id]
//! [N x (f64 x, f64 y)]
//! [N x f64 confidence]      NaN = absent
//! ```
//!
//! N is implied by the remaining length, 25 bytes per landmark. Landmark ids
//! are indices into the sender's schema.

use crate::error::ProtocolError;
use crate::tracking::{LandmarkObservation, LandmarkSchema};

use super::protocol::check_client_id;

pub const BYTES_PER_LANDMARK: usize = 1 + 3 * std::mem::size_of::<f64>();

/// Header of an encoded frame, read without decoding the landmarks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader<'a> {
    pub client_id: &'a str,
    pub landmark_count: usize,
}

/// Check that `bytes` is a well-formed frame and read its header.
pub fn inspect(bytes: &[u8]) -> Result<FrameHeader<'_>, ProtocolError> {
    let (&id_len, rest) = bytes
        .split_first()
        .ok_or_else(|| ProtocolError::MalformedFrame("empty frame".to_string()))?;
    let id_len = usize::from(id_len);

    if rest.len() < id_len {
        return Err(ProtocolError::MalformedFrame(format!(
            "client id needs {} bytes, {} remain",
            id_len,
            rest.len()
        )));
    }
    let (id_bytes, body) = rest.split_at(id_len);
    let client_id = std::str::from_utf8(id_bytes)
        .map_err(|e| ProtocolError::MalformedFrame(format!("client id is not UTF-8: {}", e)))?;

    if body.len() % BYTES_PER_LANDMARK != 0 {
        return Err(ProtocolError::MalformedFrame(format!(
            "{} landmark bytes is not a multiple of {}",
            body.len(),
            BYTES_PER_LANDMARK
        )));
    }

    Ok(FrameHeader {
        client_id,
        landmark_count: body.len() / BYTES_PER_LANDMARK,
    })
}

/// A decoded frame
#[derive(Debug, Clone, PartialEq)]
pub struct RelayFrame {
    pub client_id: String,
    pub observations: Vec<LandmarkObservation>,
}

/// Encoder/decoder bound to one client id and landmark schema
#[derive(Debug, Clone)]
pub struct FrameCodec {
    client_id: String,
    schema: LandmarkSchema,
}

impl FrameCodec {
    pub fn new(client_id: impl Into<String>, schema: LandmarkSchema) -> Result<Self, ProtocolError> {
        let client_id = client_id.into();
        check_client_id(&client_id)?;
        Ok(Self { client_id, schema })
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn schema(&self) -> LandmarkSchema {
        self.schema
    }

    /// Encode observations; depth is not carried.
    pub fn encode(&self, observations: &[LandmarkObservation]) -> Result<Vec<u8>, ProtocolError> {
        let ids = observations
            .iter()
            .map(|obs| {
                self.schema.id_of(obs.landmark).ok_or_else(|| {
                    ProtocolError::UnmappedLandmark(
                        obs.landmark.to_string(),
                        self.schema.to_string(),
                    )
                })
            })
            .collect::<Result<Vec<i8>, _>>()?;

        let id = self.client_id.as_bytes();
        let mut buf =
            Vec::with_capacity(1 + id.len() + observations.len() * BYTES_PER_LANDMARK);

        // Length checked in `new`
        buf.push(id.len() as u8);
        buf.extend_from_slice(id);
        buf.extend(ids.iter().map(|id| id.to_le_bytes()[0]));
        for obs in observations {
            buf.extend_from_slice(&obs.x.to_le_bytes());
            buf.extend_from_slice(&obs.y.to_le_bytes());
        }
        for obs in observations {
            let confidence = obs.confidence.unwrap_or(f64::NAN);
            buf.extend_from_slice(&confidence.to_le_bytes());
        }

        Ok(buf)
    }

    /// Decode a frame from any client using this codec's schema.
    pub fn decode(&self, bytes: &[u8]) -> Result<RelayFrame, ProtocolError> {
        let header = inspect(bytes)?;
        let n = header.landmark_count;

        let ids_start = 1 + header.client_id.len();
        let positions_start = ids_start + n;
        let confidences_start = positions_start + 16 * n;

        let mut observations = Vec::with_capacity(n);
        for i in 0..n {
            let raw_id = i8::from_le_bytes([bytes[ids_start + i]]);
            let landmark = self.schema.landmark(raw_id).ok_or_else(|| {
                ProtocolError::MalformedFrame(format!(
                    "landmark id {} is not in {}",
                    raw_id, self.schema
                ))
            })?;

            let x = read_f64(bytes, positions_start + 16 * i);
            let y = read_f64(bytes, positions_start + 16 * i + 8);
            let confidence = read_f64(bytes, confidences_start + 8 * i);

            observations.push(LandmarkObservation {
                landmark,
                x,
                y,
                z: None,
                confidence: (!confidence.is_nan()).then_some(confidence),
            });
        }

        Ok(RelayFrame {
            client_id: header.client_id.to_string(),
            observations,
        })
    }
}

/// Caller guarantees `offset + 8 <= bytes.len()`.
fn read_f64(bytes: &[u8], offset: usize) -> f64 {
    let mut raw = [0u8; 8];
    raw.copy_from_slice(&bytes[offset..offset + 8]);
    f64::from_le_bytes(raw)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracking::Landmark;

    fn observations() -> Vec<LandmarkObservation> {
        vec![
            LandmarkObservation::new(Landmark::LeftWrist, 101.5, -3.25).with_confidence(0.9),
            LandmarkObservation::new(Landmark::Nose, 0.0, 7.0),
        ]
    }

    #[test]
    fn test_encode_layout() {
        let codec = FrameCodec::new("cam", LandmarkSchema::Coco).unwrap();
        let bytes = codec.encode(&observations()).unwrap();

        assert_eq!(bytes.len(), 1 + 3 + 2 * BYTES_PER_LANDMARK);
        assert_eq!(bytes[0], 3);
        assert_eq!(&bytes[1..4], b"cam");
        // COCO ids: left_wrist = 9, nose = 0
        assert_eq!(&bytes[4..6], &[9, 0]);
        assert_eq!(read_f64(&bytes, 6), 101.5);
        assert_eq!(read_f64(&bytes, 14), -3.25);
        assert_eq!(read_f64(&bytes, 30), 7.0);
        assert_eq!(read_f64(&bytes, 38), 0.9);
        assert!(read_f64(&bytes, 46).is_nan());
    }

    #[test]
    fn test_decode_restores_observations() {
        let codec = FrameCodec::new("cam", LandmarkSchema::BlazePose).unwrap();
        let frame = codec.decode(&codec.encode(&observations()).unwrap()).unwrap();

        assert_eq!(frame.client_id, "cam");
        assert_eq!(frame.observations, observations());
    }

    #[test]
    fn test_encode_rejects_landmark_outside_schema() {
        let codec = FrameCodec::new("cam", LandmarkSchema::Coco).unwrap();
        let obs = [LandmarkObservation::new(Landmark::MouthLeft, 0.0, 0.0)];
        assert!(matches!(
            codec.encode(&obs),
            Err(ProtocolError::UnmappedLandmark(..))
        ));
    }

    #[test]
    fn test_encode_drops_depth() {
        let codec = FrameCodec::new("", LandmarkSchema::Coco).unwrap();
        let obs = [LandmarkObservation::new(Landmark::Nose, 1.0, 2.0).with_z(-0.4)];
        let frame = codec.decode(&codec.encode(&obs).unwrap()).unwrap();
        assert_eq!(frame.observations[0].z, None);
        assert_eq!(frame.client_id, "");
    }

    #[test]
    fn test_inspect_rejects_truncated_frames() {
        assert!(inspect(&[]).is_err());
        assert!(inspect(&[5, b'a', b'b']).is_err());
        assert!(inspect(&[0, 1, 2, 3]).is_err());
        assert!(inspect(&[2, 0xff, 0xfe]).is_err());

        let header = inspect(&[1, b'a']).unwrap();
        assert_eq!(header.client_id, "a");
        assert_eq!(header.landmark_count, 0);
    }

    #[test]
    fn test_decode_rejects_unknown_landmark_id() {
        let mut bytes = vec![0u8, 100];
        bytes.extend_from_slice(&[0u8; 24]);
        let codec = FrameCodec::new("x", LandmarkSchema::Coco).unwrap();
        assert!(matches!(
            codec.decode(&bytes),
            Err(ProtocolError::MalformedFrame(_))
        ));
    }

    #[test]
    fn test_client_id_too_long() {
        assert_eq!(
            FrameCodec::new("y".repeat(300), LandmarkSchema::Coco).unwrap_err(),
            ProtocolError::ClientIdTooLong(300)
        );
    }
}
