// src/database/memory.rs
use std::collections::BTreeMap;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::{debug, info};

use super::{latest_by_spot, warn_unreachable, SpotStore};
use crate::{
    errors::TrackerError,
    models::{LabeledSpot, Lot, Spot, SpotObservation},
};

#[derive(Debug, Default)]
struct State {
    spots: BTreeMap<i32, Spot>,
    lots: BTreeMap<String, Lot>,
}

/// Spot store kept in process memory.
///
/// Every write holds the state lock for its full duration and stages its
/// changes before touching the state, so readers never see a partial write.
/// Primary and foreign keys are enforced like the PostgreSQL schema does.
#[derive(Debug, Default)]
pub struct MemorySpotStore {
    state: RwLock<State>,
}

impl MemorySpotStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SpotStore for MemorySpotStore {
    async fn apply_observations(
        &self,
        observations: &[SpotObservation],
    ) -> Result<u64, TrackerError> {
        let latest = latest_by_spot(observations);
        let mut state = self.state.write().await;

        let mut updated = 0;
        for (id, status) in latest {
            if let Some(spot) = state.spots.get_mut(&id) {
                spot.status = status;
                updated += 1;
            }
        }

        debug!(updated, "Applied spot observations");
        Ok(updated)
    }

    async fn replace_all_spots(&self, spots: &[LabeledSpot]) -> Result<usize, TrackerError> {
        warn_unreachable(spots);
        let mut state = self.state.write().await;

        let mut replacement = BTreeMap::new();
        for spot in spots.iter().map(LabeledSpot::to_spot) {
            if !state.lots.contains_key(&spot.parking_lot_name) {
                return Err(TrackerError::reconciliation(
                    "replace_all_spots",
                    format!("parking lot {} does not exist", spot.parking_lot_name),
                ));
            }
            let id = spot.id;
            if replacement.insert(id, spot).is_some() {
                return Err(TrackerError::reconciliation(
                    "replace_all_spots",
                    format!("duplicate spot id {id}"),
                ));
            }
        }

        let count = replacement.len();
        state.spots = replacement;

        info!(count, "Replaced all spots");
        Ok(count)
    }

    async fn list_spots(&self) -> Result<Vec<Spot>, TrackerError> {
        Ok(self.state.read().await.spots.values().cloned().collect())
    }

    async fn create_lot(&self, lot: &Lot) -> Result<(), TrackerError> {
        let mut state = self.state.write().await;
        if state.lots.contains_key(&lot.parking_lot_name) {
            return Err(TrackerError::LotExists(lot.parking_lot_name.clone()));
        }
        state
            .lots
            .insert(lot.parking_lot_name.clone(), lot.clone());

        info!(lot = %lot.parking_lot_name, "Created parking lot");
        Ok(())
    }

    async fn list_lots(&self) -> Result<Vec<Lot>, TrackerError> {
        Ok(self.state.read().await.lots.values().cloned().collect())
    }
}
