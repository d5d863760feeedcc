use async_trait::async_trait;
use chrono::Utc;
use roadcast_types::{TelemetrySnapshot, SCHEMA_VERSION};
use serde::Serialize;

use crate::error::RoomError;
use crate::livekit::RoomClient;

/// Receives snapshots that changed.
#[async_trait]
pub trait MetadataPublisher: Send + Sync {
    async fn publish(&self, snapshot: &TelemetrySnapshot) -> Result<(), RoomError>;
}

/// Room metadata document: the snapshot plus a version and a Unix
/// timestamp in seconds.
#[derive(Debug, Serialize)]
pub struct RoomMetadata<'a> {
    pub version: u32,
    pub timestamp: i64,
    #[serde(flatten)]
    pub snapshot: &'a TelemetrySnapshot,
}

impl<'a> RoomMetadata<'a> {
    pub fn new(snapshot: &'a TelemetrySnapshot, timestamp: i64) -> Self {
        Self {
            version: SCHEMA_VERSION,
            timestamp,
            snapshot,
        }
    }

    pub fn now(snapshot: &'a TelemetrySnapshot) -> Self {
        Self::new(snapshot, Utc::now().timestamp())
    }

    pub fn to_json(&self) -> Result<String, RoomError> {
        Ok(serde_json::to_string(self)?)
    }
}

#[async_trait]
impl MetadataPublisher for RoomClient {
    async fn publish(&self, snapshot: &TelemetrySnapshot) -> Result<(), RoomError> {
        let metadata = RoomMetadata::now(snapshot).to_json()?;
        self.update_room_metadata(&metadata).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    #[test]
    fn test_metadata_document_shape() {
        let snapshot = TelemetrySnapshot::builder()
            .tech("LTE")
            .signal(80.0)
            .temperature(23.4)
            .build();
        let metadata = RoomMetadata::new(&snapshot, 1_700_000_000).to_json().unwrap();
        let value: Value = serde_json::from_str(&metadata).unwrap();

        assert_eq!(value["version"], json!(SCHEMA_VERSION));
        assert_eq!(value["timestamp"], json!(1_700_000_000));
        assert_eq!(value["tech"], json!("LTE"));
        assert_eq!(value["signal"], json!(80.0));
        assert_eq!(value["temperature"], json!(23.4));
        assert_eq!(value["longitude"], Value::Null);
    }
}
