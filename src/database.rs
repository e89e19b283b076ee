// src/database.rs
//! Spot storage and reconciliation

mod memory;
mod models;

use std::collections::BTreeMap;

use async_trait::async_trait;
use sqlx::{postgres::PgPoolOptions, PgPool};
use tracing::{debug, info, warn};

use crate::{
    config::DatabaseConfig,
    errors::TrackerError,
    models::{LabeledSpot, Lot, Spot, SpotId, SpotObservation, SpotStatus},
};

pub use memory::MemorySpotStore;
use models::{LotRow, SpotRow};

/// Authoritative store of parking spots and lots.
///
/// Spots have two write paths with different semantics:
/// [`apply_observations`](SpotStore::apply_observations) only changes the
/// status of spots that already exist, while
/// [`replace_all_spots`](SpotStore::replace_all_spots) discards the whole
/// spot set. Sensor ingestion must only ever use the former.
#[async_trait]
pub trait SpotStore: Send + Sync {
    /// Write observed statuses to existing spots in one transaction.
    ///
    /// Observations for ids not in the store are ignored. When a spot id
    /// occurs more than once, the last observation in slice order wins.
    /// Returns the number of spots updated.
    async fn apply_observations(
        &self,
        observations: &[SpotObservation],
    ) -> Result<u64, TrackerError>;

    /// Atomically replace every stored spot with `spots`, all available.
    ///
    /// Fails as a whole if any spot has a duplicate id or references a lot
    /// that does not exist. Returns the number of spots inserted.
    async fn replace_all_spots(&self, spots: &[LabeledSpot]) -> Result<usize, TrackerError>;

    /// All spots, ordered by id
    async fn list_spots(&self) -> Result<Vec<Spot>, TrackerError>;

    /// Insert a lot, failing with [`TrackerError::LotExists`] if the name is taken
    async fn create_lot(&self, lot: &Lot) -> Result<(), TrackerError>;

    /// All lots, ordered by name
    async fn list_lots(&self) -> Result<Vec<Lot>, TrackerError>;
}

/// Collapse observations to the final status per spot, ordered by spot id
pub(crate) fn latest_by_spot(observations: &[SpotObservation]) -> BTreeMap<i32, SpotStatus> {
    observations
        .iter()
        .map(|o| (i32::from(o.spot_id), o.status()))
        .collect()
}

/// Log spots a bulk replace stores but sensors can never report on
pub(crate) fn warn_unreachable(spots: &[LabeledSpot]) {
    for spot in spots {
        if spot.location.is_none() {
            warn!(
                spot_id = spot.id,
                "Spot has no location, storing it at (0.0, 0.0)"
            );
        }
        if !spot.is_sensor_addressable() {
            warn!(
                spot_id = spot.id,
                "Spot id is outside the sensor range 1-{}, its status will never update",
                SpotId::MAX
            );
        }
    }
}

/// PostgreSQL-backed spot store
#[derive(Debug, Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Wrap an existing pool. Migrations are expected to be applied.
    pub async fn new(pool: PgPool) -> Result<Self, TrackerError> {
        Ok(Self { pool })
    }

    /// Connect to the database and apply pending migrations
    pub async fn connect(config: &DatabaseConfig) -> Result<Self, TrackerError> {
        info!(
            "Connecting to database: max_connections={}, acquire_timeout={:?}",
            config.max_connections, config.acquire_timeout
        );

        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(config.acquire_timeout)
            .connect(&config.url)
            .await
            .map_err(|e| TrackerError::DatabaseConnectionError(e.to_string()))?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(|e| TrackerError::MigrationError(e.to_string()))?;
        info!("Database migrations applied");

        Self::new(pool).await
    }

    async fn try_apply_observations(
        &self,
        ids: &[i32],
        statuses: &[&str],
    ) -> Result<u64, sqlx::Error> {
        let mut tx = self.pool.begin().await?;

        // Lock in id order so overlapping batches serialize without deadlock
        let existing: Vec<i32> =
            sqlx::query_scalar("SELECT id FROM spots WHERE id = ANY($1) ORDER BY id FOR UPDATE")
                .bind(ids)
                .fetch_all(&mut *tx)
                .await?;

        if existing.is_empty() {
            tx.commit().await?;
            return Ok(0);
        }

        let result = sqlx::query(
            r"
            UPDATE spots SET status = u.status
            FROM UNNEST($1::int4[], $2::text[]) AS u(id, status)
            WHERE spots.id = u.id
            ",
        )
        .bind(ids)
        .bind(statuses)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(result.rows_affected())
    }

    async fn try_replace_all_spots(&self, spots: &[Spot]) -> Result<(), sqlx::Error> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("LOCK TABLE spots IN ACCESS EXCLUSIVE MODE")
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM spots").execute(&mut *tx).await?;

        if !spots.is_empty() {
            let ids: Vec<i32> = spots.iter().map(|s| s.id).collect();
            let latitudes: Vec<f64> = spots.iter().map(|s| s.latitude).collect();
            let longitudes: Vec<f64> = spots.iter().map(|s| s.longitude).collect();
            let lots: Vec<&str> = spots.iter().map(|s| s.parking_lot_name.as_str()).collect();

            sqlx::query(
                r#"
                INSERT INTO spots (id, latitude, longitude, status, "parkingLotName")
                SELECT s.id, s.latitude, s.longitude, $5, s.lot
                FROM UNNEST($1::int4[], $2::float8[], $3::float8[], $4::text[])
                    AS s(id, latitude, longitude, lot)
                "#,
            )
            .bind(&ids)
            .bind(&latitudes)
            .bind(&longitudes)
            .bind(&lots)
            .bind(SpotStatus::Available.as_str())
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await
    }
}

#[async_trait]
impl SpotStore for Database {
    async fn apply_observations(
        &self,
        observations: &[SpotObservation],
    ) -> Result<u64, TrackerError> {
        let latest = latest_by_spot(observations);
        if latest.is_empty() {
            return Ok(0);
        }

        let ids: Vec<i32> = latest.keys().copied().collect();
        let statuses: Vec<&str> = latest.values().map(SpotStatus::as_str).collect();

        let updated = self
            .try_apply_observations(&ids, &statuses)
            .await
            .map_err(|e| TrackerError::reconciliation("apply_observations", e))?;

        debug!(requested = ids.len(), updated, "Applied spot observations");
        Ok(updated)
    }

    async fn replace_all_spots(&self, spots: &[LabeledSpot]) -> Result<usize, TrackerError> {
        warn_unreachable(spots);
        let spots: Vec<Spot> = spots.iter().map(LabeledSpot::to_spot).collect();

        self.try_replace_all_spots(&spots)
            .await
            .map_err(|e| TrackerError::reconciliation("replace_all_spots", e))?;

        info!(count = spots.len(), "Replaced all spots");
        Ok(spots.len())
    }

    async fn list_spots(&self) -> Result<Vec<Spot>, TrackerError> {
        let rows = sqlx::query_as::<_, SpotRow>(
            r#"SELECT id, latitude, longitude, status, "parkingLotName" FROM spots ORDER BY id"#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Spot::try_from).collect()
    }

    async fn create_lot(&self, lot: &Lot) -> Result<(), TrackerError> {
        let result = sqlx::query(
            r#"
            INSERT INTO lots ("parkingLotName", hours, price)
            VALUES ($1, $2, $3)
            ON CONFLICT ("parkingLotName") DO NOTHING
            "#,
        )
        .bind(&lot.parking_lot_name)
        .bind(&lot.hours)
        .bind(&lot.price)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(TrackerError::LotExists(lot.parking_lot_name.clone()));
        }
        info!(lot = %lot.parking_lot_name, "Created parking lot");
        Ok(())
    }

    async fn list_lots(&self) -> Result<Vec<Lot>, TrackerError> {
        let rows = sqlx::query_as::<_, LotRow>(
            r#"SELECT "parkingLotName", hours, price FROM lots ORDER BY "parkingLotName""#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(Lot::from).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn obs(id: u8, occupied: bool) -> SpotObservation {
        SpotObservation::new(SpotId::try_from(id).unwrap(), occupied)
    }

    #[test]
    fn latest_observation_wins() {
        let latest = latest_by_spot(&[obs(5, false), obs(3, true), obs(5, true)]);
        assert_eq!(latest.len(), 2);
        assert_eq!(latest[&5], SpotStatus::Occupied);
        assert_eq!(latest[&3], SpotStatus::Occupied);
    }

    #[test]
    fn latest_is_ordered_by_id() {
        let latest = latest_by_spot(&[obs(9, true), obs(2, false), obs(4, true)]);
        assert_eq!(latest.keys().copied().collect::<Vec<_>>(), vec![2, 4, 9]);
    }
}
