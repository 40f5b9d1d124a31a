//! Temporal smoothing of unprojected landmark positions.
//!
//! Each landmark keeps one running estimate. New measurements pull the
//! estimate toward them by at most `confidence * step_scale` per frame, so a
//! confident detection catches up quickly while a shaky one barely moves it.
//! The step is capped at the remaining distance, so the estimate never
//! overshoots a stationary target.

use glam::DVec3;
use std::collections::hash_map::Entry;
use std::collections::HashMap;

use super::landmarks::Landmark;
use super::unproject::UnprojectedFrame;
use crate::config::SmoothingConfig;

/// Running best-estimate 3D position per landmark.
#[derive(Debug, Clone)]
pub struct TemporalSmoother {
    estimates: HashMap<Landmark, DVec3>,
    acceptance_threshold: f64,
    step_scale: f64,
}

impl Default for TemporalSmoother {
    fn default() -> Self {
        Self::new(&SmoothingConfig::default())
    }
}

impl TemporalSmoother {
    pub fn new(config: &SmoothingConfig) -> Self {
        Self {
            estimates: HashMap::new(),
            acceptance_threshold: config.acceptance_threshold,
            step_scale: config.step_scale,
        }
    }

    /// Fold one unprojected frame into the estimates.
    pub fn update(&mut self, frame: &UnprojectedFrame) {
        for (&landmark, point) in frame {
            if !point.position.is_finite() {
                tracing::debug!("Ignoring non-finite position for {}", landmark);
                continue;
            }

            let confidence = point.confidence_or_certain().clamp(0.0, 1.0);

            match self.estimates.entry(landmark) {
                Entry::Occupied(mut entry) => {
                    let current = entry.get_mut();
                    let diff = point.position - *current;
                    let distance = diff.length();
                    if distance > 0.0 {
                        let step = (confidence * self.step_scale).min(distance);
                        *current += diff / distance * step;
                    }
                }
                Entry::Vacant(entry) => {
                    if confidence >= self.acceptance_threshold {
                        entry.insert(point.position);
                    }
                }
            }
        }
    }

    pub fn estimates(&self) -> &HashMap<Landmark, DVec3> {
        &self.estimates
    }

    pub fn get(&self, landmark: Landmark) -> Option<DVec3> {
        self.estimates.get(&landmark).copied()
    }

    pub fn len(&self) -> usize {
        self.estimates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.estimates.is_empty()
    }

    pub fn clear(&mut self) {
        self.estimates.clear();
    }
}
