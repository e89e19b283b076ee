//! Data models.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::errors::TrackerError;

/// Identifier of a sensor-reported parking spot.
///
/// Sensors address spots with 7 bits. Id 0 is reserved: it cannot be told
/// apart from payload padding, so it is never a valid observation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SpotId(u8);

impl SpotId {
    pub const MAX: u8 = 127;

    /// Get the raw spot id value
    pub fn value(&self) -> u8 {
        self.0
    }
}

impl TryFrom<u8> for SpotId {
    type Error = TrackerError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        if value == 0 || value > Self::MAX {
            return Err(TrackerError::InvalidSpotId(value.to_string()));
        }
        Ok(Self(value))
    }
}

impl From<SpotId> for i32 {
    fn from(id: SpotId) -> Self {
        i32::from(id.0)
    }
}

impl fmt::Display for SpotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Occupancy status of a parking spot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SpotStatus {
    #[default]
    Available,
    Occupied,
}

impl SpotStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SpotStatus::Available => "available",
            SpotStatus::Occupied => "occupied",
        }
    }
}

impl TryFrom<&str> for SpotStatus {
    type Error = TrackerError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value {
            "available" => Ok(SpotStatus::Available),
            "occupied" => Ok(SpotStatus::Occupied),
            other => Err(TrackerError::InvalidSpotStatus(other.to_string())),
        }
    }
}

/// One decoded sensor reading
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpotObservation {
    pub spot_id: SpotId,
    pub occupied: bool,
}

impl SpotObservation {
    pub fn new(spot_id: SpotId, occupied: bool) -> Self {
        Self { spot_id, occupied }
    }

    /// Status this observation assigns to its spot
    pub fn status(&self) -> SpotStatus {
        if self.occupied {
            SpotStatus::Occupied
        } else {
            SpotStatus::Available
        }
    }
}

/// Persisted parking spot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Spot {
    /// Externally assigned id, shared with the sensor network
    pub id: i32,
    pub latitude: f64,
    pub longitude: f64,
    pub status: SpotStatus,
    #[serde(rename = "parkingLotName")]
    pub parking_lot_name: String,
}

/// Named parking lot with opening hours and pricing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lot {
    #[serde(rename = "parkingLotName")]
    pub parking_lot_name: String,
    pub hours: String,
    pub price: String,
}

impl Lot {
    pub fn validate(&self) -> Result<(), TrackerError> {
        if self.parking_lot_name.trim().is_empty() {
            return Err(TrackerError::InvalidLot(
                "parkingLotName cannot be empty".to_string(),
            ));
        }
        Ok(())
    }
}

/// Geographic placement picked on the map, WGS84 decimal degrees
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub lat: f64,
    pub lng: f64,
}

/// Pixel coordinate on an annotated satellite image
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

/// Spot as produced by the annotation workflow.
///
/// Any `status` the annotator sends is ignored: a bulk replace always
/// resets spots to available.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabeledSpot {
    pub id: i32,
    /// Index of the source image in the annotation session
    #[serde(rename = "imageIndex", default)]
    pub image_index: Option<u32>,
    /// Outline drawn on the source image
    #[serde(default)]
    pub points: Vec<Point>,
    /// None if the spot was outlined but never placed on the map
    #[serde(default)]
    pub location: Option<Location>,
    #[serde(rename = "parkingLotName")]
    pub parking_lot_name: String,
}

impl LabeledSpot {
    /// Whether an uplink can carry this spot's id
    pub fn is_sensor_addressable(&self) -> bool {
        u8::try_from(self.id).is_ok_and(|id| SpotId::try_from(id).is_ok())
    }

    /// Build the spot stored by a bulk replace.
    ///
    /// A missing location becomes `(0.0, 0.0)`.
    pub fn to_spot(&self) -> Spot {
        let (latitude, longitude) = self
            .location
            .map(|location| (location.lat, location.lng))
            .unwrap_or((0.0, 0.0));

        Spot {
            id: self.id,
            latitude,
            longitude,
            status: SpotStatus::Available,
            parking_lot_name: self.parking_lot_name.clone(),
        }
    }
}
