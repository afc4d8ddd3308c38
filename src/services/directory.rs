//! Data-access collaborators consumed by the alert pipeline
//!
//! These are the seams to whatever persistence backs a deployment. The
//! pipeline only ever reads topology and occupants, and writes notifications
//! and raw measurements.

use crate::domain::types::{
    BuildingId, Exit, Measurement, Notification, NotificationId, Room, RoomEdge, RoomId, Sensor,
    SensorId, Stair, UserId,
};
use async_trait::async_trait;
use rustc_hash::FxHashMap;

/// Failure reported by a data-access collaborator
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("{0} not found")]
    NotFound(String),

    #[error("store I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Sensor and room lookups
#[async_trait]
pub trait SensorDirectory: Send + Sync {
    async fn sensor(&self, id: SensorId) -> Result<Option<Sensor>, StoreError>;

    async fn room(&self, id: RoomId) -> Result<Option<Room>, StoreError>;
}

/// Read-only topology queries for one building
#[async_trait]
pub trait TopologySource: Send + Sync {
    async fn edges(&self, building: BuildingId) -> Result<Vec<RoomEdge>, StoreError>;

    async fn stairs(&self, building: BuildingId) -> Result<Vec<Stair>, StoreError>;

    async fn exits(&self, building: BuildingId) -> Result<Vec<Exit>, StoreError>;

    async fn room_names(&self, building: BuildingId) -> Result<FxHashMap<RoomId, String>, StoreError>;
}

#[async_trait]
pub trait OccupantDirectory: Send + Sync {
    /// Users registered to a building
    async fn occupants(&self, building: BuildingId) -> Result<Vec<UserId>, StoreError>;
}

/// Durable alert history
#[async_trait]
pub trait NotificationStore: Send + Sync {
    /// Persist a new unread notification for a user
    async fn create(&self, user: UserId, message: String) -> Result<Notification, StoreError>;

    async fn list_for_user(&self, user: UserId) -> Result<Vec<Notification>, StoreError>;

    async fn mark_as_read(&self, id: NotificationId) -> Result<(), StoreError>;
}

/// Raw measurement persistence
#[async_trait]
pub trait MeasurementLog: Send + Sync {
    async fn record(&self, measurement: Measurement) -> Result<(), StoreError>;

    /// Retained measurements of one sensor, oldest first
    async fn for_sensor(&self, sensor: SensorId) -> Result<Vec<Measurement>, StoreError>;
}
