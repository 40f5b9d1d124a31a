//! Per-frame landmark observations and frame-rate tracking.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

use super::landmarks::Landmark;

/// Number of frame intervals averaged by [`FrameRate`].
pub const FRAME_RATE_WINDOW: usize = 10;

/// One detected landmark in one frame.
///
/// `x`/`y` are in the detector's image or normalized space. `z` is only
/// present when the detector estimates depth itself.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LandmarkObservation {
    #[serde(rename = "name")]
    pub landmark: Landmark,
    pub x: f64,
    pub y: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub z: Option<f64>,
    /// Detector confidence in [0, 1]
    #[serde(default, alias = "score", skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
}

impl LandmarkObservation {
    pub fn new(landmark: Landmark, x: f64, y: f64) -> Self {
        Self {
            landmark,
            x,
            y,
            z: None,
            confidence: None,
        }
    }

    pub fn with_z(mut self, z: f64) -> Self {
        self.z = Some(z);
        self
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = Some(confidence);
        self
    }
}

/// All landmarks detected in one captured frame.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LandmarkFrame {
    /// Capture time in milliseconds, on the detector's clock
    pub timestamp_ms: f64,
    pub observations: Vec<LandmarkObservation>,
}

impl LandmarkFrame {
    pub fn new(timestamp_ms: f64, observations: Vec<LandmarkObservation>) -> Self {
        Self {
            timestamp_ms,
            observations,
        }
    }

    pub fn get(&self, landmark: Landmark) -> Option<&LandmarkObservation> {
        self.observations.iter().find(|o| o.landmark == landmark)
    }

    pub fn is_empty(&self) -> bool {
        self.observations.is_empty()
    }
}

/// Rolling frame rate over the last [`FRAME_RATE_WINDOW`] frame intervals.
#[derive(Debug, Clone, Default)]
pub struct FrameRate {
    last_timestamp_ms: Option<f64>,
    intervals_ms: VecDeque<f64>,
}

impl FrameRate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a frame timestamp. Timestamps that do not advance are ignored.
    pub fn record(&mut self, timestamp_ms: f64) {
        if let Some(last) = self.last_timestamp_ms {
            let interval = timestamp_ms - last;
            if !(interval > 0.0) {
                return;
            }
            if self.intervals_ms.len() == FRAME_RATE_WINDOW {
                self.intervals_ms.pop_front();
            }
            self.intervals_ms.push_back(interval);
        }
        self.last_timestamp_ms = Some(timestamp_ms);
    }

    pub fn mean_interval_ms(&self) -> Option<f64> {
        if self.intervals_ms.is_empty() {
            return None;
        }
        Some(self.intervals_ms.iter().sum::<f64>() / self.intervals_ms.len() as f64)
    }

    /// Frames per second, once at least one interval has been seen.
    pub fn fps(&self) -> Option<f64> {
        self.mean_interval_ms().map(|interval| 1000.0 / interval)
    }

    pub fn reset(&mut self) {
        self.last_timestamp_ms = None;
        self.intervals_ms.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_observation_json_accepts_score_alias() {
        let json = r#"{"name":"left_elbow","x":0.5,"y":-0.25,"score":0.9}"#;
        let obs: LandmarkObservation = serde_json::from_str(json).unwrap();
        assert_eq!(obs.landmark, Landmark::LeftElbow);
        assert_eq!(obs.confidence, Some(0.9));
        assert_eq!(obs.z, None);
    }

    #[test]
    fn test_frame_get() {
        let frame = LandmarkFrame::new(
            12.0,
            vec![
                LandmarkObservation::new(Landmark::Nose, 1.0, 2.0),
                LandmarkObservation::new(Landmark::LeftEar, 3.0, 4.0).with_confidence(0.4),
            ],
        );
        assert_eq!(frame.get(Landmark::LeftEar).unwrap().x, 3.0);
        assert!(frame.get(Landmark::RightEar).is_none());
    }

    #[test]
    fn test_frame_rate_needs_two_frames() {
        let mut rate = FrameRate::new();
        assert!(rate.fps().is_none());
        rate.record(100.0);
        assert!(rate.fps().is_none());
        rate.record(133.0);
        assert!((rate.mean_interval_ms().unwrap() - 33.0).abs() < 1e-9);
    }

    #[test]
    fn test_frame_rate_window() {
        let mut rate = FrameRate::new();
        // 5 slow intervals then 10 fast ones; only the fast ones remain
        let mut t = 0.0;
        rate.record(t);
        for _ in 0..5 {
            t += 100.0;
            rate.record(t);
        }
        for _ in 0..FRAME_RATE_WINDOW {
            t += 20.0;
            rate.record(t);
        }
        assert!((rate.fps().unwrap() - 50.0).abs() < 1e-9);
    }

    #[test]
    fn test_frame_rate_ignores_stale_timestamps() {
        let mut rate = FrameRate::new();
        rate.record(50.0);
        rate.record(50.0);
        rate.record(40.0);
        assert!(rate.fps().is_none());
    }
}
