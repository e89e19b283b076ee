//! Sensor uplink decoding and ingestion

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::{
    database::SpotStore,
    errors::TrackerError,
    models::{SpotId, SpotObservation},
};

/// Decode a raw sensor payload into spot observations.
///
/// Each byte packs one reading:
/// - Bits 7-1: spot id, 0-127
/// - Bit 0: occupancy, 1 = occupied, 0 = available
///
/// Readings for reserved spot id 0 are dropped. Every other byte yields one
/// observation in input order, repeats included.
pub fn decode(bytes: &[u8]) -> Vec<SpotObservation> {
    bytes.iter().copied().filter_map(decode_byte).collect()
}

/// Decode a single payload byte, None for reserved spot id 0
pub fn decode_byte(byte: u8) -> Option<SpotObservation> {
    let spot_id = SpotId::try_from(byte >> 1).ok()?;
    Some(SpotObservation::new(spot_id, byte & 1 == 1))
}

/// Uplink message envelope, as forwarded by the LoRaWAN network server
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct UplinkEnvelope {
    #[serde(default)]
    pub end_device_ids: Option<EndDeviceIds>,
    /// Time the network server received the uplink
    #[serde(default)]
    pub received_at: Option<DateTime<Utc>>,
    pub uplink_message: UplinkMessage,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct EndDeviceIds {
    pub device_id: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct UplinkMessage {
    #[serde(default)]
    pub f_port: Option<u8>,
    pub decoded_payload: DecodedPayload,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct DecodedPayload {
    pub bytes: Vec<u8>,
}

impl UplinkEnvelope {
    pub fn from_slice(payload: &[u8]) -> Result<Self, TrackerError> {
        serde_json::from_slice(payload).map_err(|e| TrackerError::MalformedUplink(e.to_string()))
    }

    pub fn from_value(value: Value) -> Result<Self, TrackerError> {
        serde_json::from_value(value).map_err(|e| TrackerError::MalformedUplink(e.to_string()))
    }

    /// Raw sensor payload
    pub fn payload(&self) -> &[u8] {
        &self.uplink_message.decoded_payload.bytes
    }

    pub fn device_id(&self) -> Option<&str> {
        self.end_device_ids
            .as_ref()
            .map(|ids| ids.device_id.as_str())
    }
}

/// Outcome of ingesting one uplink
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IngestReport {
    /// Observations decoded from the payload
    pub observations: usize,
    /// Spot rows whose status was written
    pub updated: u64,
}

/// Decode an uplink and reconcile its observations into the store
pub async fn ingest(
    store: &dyn SpotStore,
    envelope: &UplinkEnvelope,
) -> Result<IngestReport, TrackerError> {
    let payload = envelope.payload();
    let observations = decode(payload);

    debug!(
        device_id = envelope.device_id().unwrap_or("unknown"),
        received_at = ?envelope.received_at,
        bytes = payload.len(),
        observations = observations.len(),
        "Decoded uplink"
    );

    let updated = store.apply_observations(&observations).await?;

    let distinct = observations
        .iter()
        .map(|o| o.spot_id)
        .collect::<BTreeSet<_>>()
        .len() as u64;
    if updated < distinct {
        warn!(
            unknown = distinct - updated,
            "Uplink referenced spots that are not placed yet"
        );
    }

    Ok(IngestReport {
        observations: observations.len(),
        updated,
    })
}
