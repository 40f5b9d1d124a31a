//! Leader-side bookkeeping of supplier frames

use std::collections::{BTreeMap, HashMap};
use std::time::{Duration, Instant};

use super::codec::RelayFrame;
use crate::config::RelayConfig;
use crate::tracking::{Landmark, LandmarkObservation};

#[derive(Debug, Clone)]
struct SupplierEntry {
    observations: Vec<LandmarkObservation>,
    last_update: Instant,
}

/// Latest frame per supplier, forgetting suppliers that go quiet.
#[derive(Debug, Clone)]
pub struct SupplierAggregator {
    ttl: Duration,
    suppliers: HashMap<String, SupplierEntry>,
}

impl SupplierAggregator {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            suppliers: HashMap::new(),
        }
    }

    pub fn from_config(config: &RelayConfig) -> Self {
        Self::new(Duration::from_millis(config.supplier_ttl_ms))
    }

    /// Record a supplier's frame, replacing its previous one.
    pub fn ingest(&mut self, frame: RelayFrame, now: Instant) {
        if !self.suppliers.contains_key(&frame.client_id) {
            tracing::info!("Supplier {} joined", frame.client_id);
        }
        self.suppliers.insert(
            frame.client_id,
            SupplierEntry {
                observations: frame.observations,
                last_update: now,
            },
        );
    }

    /// Drop suppliers with `now - last_update > ttl`. Returns how many went.
    pub fn prune(&mut self, now: Instant) -> usize {
        let ttl = self.ttl;
        let before = self.suppliers.len();
        self.suppliers.retain(|id, entry| {
            let alive = now.saturating_duration_since(entry.last_update) <= ttl;
            if !alive {
                tracing::info!("Supplier {} timed out", id);
            }
            alive
        });
        before - self.suppliers.len()
    }

    pub fn get(&self, client_id: &str) -> Option<&[LandmarkObservation]> {
        self.suppliers
            .get(client_id)
            .map(|entry| entry.observations.as_slice())
    }

    /// Every live supplier's latest observations, by client id.
    pub fn frames(&self) -> impl Iterator<Item = (&str, &[LandmarkObservation])> {
        self.suppliers
            .iter()
            .map(|(id, entry)| (id.as_str(), entry.observations.as_slice()))
    }

    /// One observation per landmark across all live suppliers, keeping the
    /// most confident. Absent confidence counts as certain; ties go to the
    /// lowest client id.
    pub fn merged(&self) -> Vec<LandmarkObservation> {
        let mut ids: Vec<&String> = self.suppliers.keys().collect();
        ids.sort();

        let mut best: BTreeMap<Landmark, LandmarkObservation> = BTreeMap::new();
        for id in ids {
            for obs in &self.suppliers[id].observations {
                let confidence = obs.confidence.unwrap_or(1.0);
                match best.get(&obs.landmark) {
                    Some(kept) if kept.confidence.unwrap_or(1.0) >= confidence => {}
                    _ => {
                        best.insert(obs.landmark, *obs);
                    }
                }
            }
        }
        best.into_values().collect()
    }

    pub fn len(&self) -> usize {
        self.suppliers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.suppliers.is_empty()
    }
}
