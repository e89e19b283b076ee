// src/database/models.rs
use crate::{
    errors::TrackerError,
    models::{Lot, Spot, SpotStatus},
};

#[derive(Debug, sqlx::FromRow)]
pub(super) struct SpotRow {
    id: i32,
    latitude: f64,
    longitude: f64,
    status: String, // 'available' or 'occupied', enforced by CHECK constraint
    #[sqlx(rename = "parkingLotName")]
    parking_lot_name: String,
}

#[derive(Debug, sqlx::FromRow)]
pub(super) struct LotRow {
    #[sqlx(rename = "parkingLotName")]
    parking_lot_name: String,
    hours: String,
    price: String,
}

impl TryFrom<SpotRow> for Spot {
    type Error = TrackerError;

    fn try_from(row: SpotRow) -> Result<Self, Self::Error> {
        Ok(Spot {
            id: row.id,
            latitude: row.latitude,
            longitude: row.longitude,
            status: SpotStatus::try_from(row.status.as_str())?,
            parking_lot_name: row.parking_lot_name,
        })
    }
}

impl From<LotRow> for Lot {
    fn from(row: LotRow) -> Self {
        Lot {
            parking_lot_name: row.parking_lot_name,
            hours: row.hours,
            price: row.price,
        }
    }
}
