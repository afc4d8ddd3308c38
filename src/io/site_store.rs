//! Site store - TOML-described site backing every directory collaborator
//!
//! The site file declares buildings with their occupants, rooms, room
//! edges, stairs, exits and sensors. Static data is indexed once at load;
//! notifications and measurements live in memory behind short-held locks,
//! with notifications optionally mirrored to a JSONL log.

use crate::domain::types::{
    BuildingId, Exit, Measurement, Notification, NotificationId, Room, RoomEdge, RoomId, Sensor,
    SensorId, Stair, UserId,
};
use crate::io::notification_log::NotificationLog;
use crate::services::directory::{
    MeasurementLog, NotificationStore, OccupantDirectory, SensorDirectory, StoreError,
    TopologySource,
};
use anyhow::{bail, Context};
use async_trait::async_trait;
use parking_lot::Mutex;
use rustc_hash::{FxHashMap, FxHashSet};
use serde::Deserialize;
use std::collections::VecDeque;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tracing::info;

/// Measurements retained in memory before the oldest are evicted
pub const MEASUREMENT_HISTORY: usize = 10_000;

/// Notifications kept in memory; older ones survive only in the JSONL log
pub const NOTIFICATION_HISTORY: usize = 10_000;

#[derive(Debug, Clone, Deserialize)]
pub struct BuildingEntry {
    pub id: BuildingId,
    #[serde(default)]
    pub name: String,
    /// Users registered to the building
    #[serde(default)]
    pub occupants: Vec<UserId>,
}

/// Raw site file layout
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SiteFile {
    #[serde(default)]
    pub buildings: Vec<BuildingEntry>,
    #[serde(default)]
    pub rooms: Vec<Room>,
    #[serde(default)]
    pub edges: Vec<RoomEdge>,
    #[serde(default)]
    pub stairs: Vec<Stair>,
    #[serde(default)]
    pub exits: Vec<Exit>,
    #[serde(default)]
    pub sensors: Vec<Sensor>,
}

#[derive(Debug, Default)]
struct BuildingData {
    edges: Vec<RoomEdge>,
    stairs: Vec<Stair>,
    exits: Vec<Exit>,
    occupants: Vec<UserId>,
    room_names: FxHashMap<RoomId, String>,
}

pub struct SiteStore {
    rooms: FxHashMap<RoomId, Room>,
    sensors: FxHashMap<SensorId, Sensor>,
    buildings: FxHashMap<BuildingId, BuildingData>,
    users: FxHashSet<UserId>,
    notifications: Mutex<VecDeque<Notification>>,
    measurements: Mutex<VecDeque<Measurement>>,
    notification_log: Option<Arc<NotificationLog>>,
}

impl SiteStore {
    /// Load and index a site file
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read site file {}", path.display()))?;
        let store = Self::from_toml_str(&content)
            .with_context(|| format!("Failed to load site file {}", path.display()))?;
        Ok(store)
    }

    pub fn from_toml_str(content: &str) -> anyhow::Result<Self> {
        let site: SiteFile = toml::from_str(content).context("invalid site TOML")?;
        Self::from_site(site)
    }

    /// Index a parsed site, rejecting references to undeclared buildings or rooms
    pub fn from_site(site: SiteFile) -> anyhow::Result<Self> {
        let mut buildings: FxHashMap<BuildingId, BuildingData> = FxHashMap::default();
        let mut users = FxHashSet::default();
        for building in site.buildings {
            users.extend(building.occupants.iter().copied());
            let data = buildings.entry(building.id).or_default();
            data.occupants.extend(building.occupants);
        }

        let mut rooms = FxHashMap::default();
        for room in site.rooms {
            let Some(data) = buildings.get_mut(&room.building_id) else {
                bail!("room {} references unknown building {}", room.id, room.building_id);
            };
            data.room_names.insert(room.id, room.name.clone());
            rooms.insert(room.id, room);
        }

        let building_of = |room: RoomId, what: &str| -> anyhow::Result<BuildingId> {
            match rooms.get(&room) {
                Some(r) => Ok(r.building_id),
                None => bail!("{what} references unknown room {room}"),
            }
        };

        for edge in site.edges {
            let b1 = building_of(edge.room1, "edge")?;
            let b2 = building_of(edge.room2, "edge")?;
            if let Some(data) = buildings.get_mut(&b1) {
                data.edges.push(edge);
            }
            if b2 != b1 {
                if let Some(data) = buildings.get_mut(&b2) {
                    data.edges.push(edge);
                }
            }
        }

        for stair in site.stairs {
            building_of(stair.floor1_room, "stair")?;
            building_of(stair.floor2_room, "stair")?;
            let Some(data) = buildings.get_mut(&stair.building_id) else {
                bail!("stair references unknown building {}", stair.building_id);
            };
            data.stairs.push(stair);
        }

        for exit in site.exits {
            building_of(exit.room_id, "exit")?;
            let Some(data) = buildings.get_mut(&exit.building_id) else {
                bail!("exit references unknown building {}", exit.building_id);
            };
            data.exits.push(exit);
        }

        let mut sensors = FxHashMap::default();
        for sensor in site.sensors {
            building_of(sensor.room_id, "sensor")?;
            sensors.insert(sensor.id, sensor);
        }

        info!(
            buildings = %buildings.len(),
            rooms = %rooms.len(),
            sensors = %sensors.len(),
            users = %users.len(),
            "site_loaded"
        );

        Ok(Self {
            rooms,
            sensors,
            buildings,
            users,
            notifications: Mutex::new(VecDeque::new()),
            measurements: Mutex::new(VecDeque::new()),
            notification_log: None,
        })
    }

    /// Mirror every created notification to a JSONL file
    pub fn with_notification_log(mut self, log: NotificationLog) -> Self {
        self.notification_log = Some(Arc::new(log));
        self
    }

    pub fn building_count(&self) -> usize {
        self.buildings.len()
    }

    pub fn sensor_count(&self) -> usize {
        self.sensors.len()
    }

    fn building(&self, id: BuildingId) -> Result<&BuildingData, StoreError> {
        self.buildings.get(&id).ok_or_else(|| StoreError::NotFound(format!("building {id}")))
    }
}

#[async_trait]
impl SensorDirectory for SiteStore {
    async fn sensor(&self, id: SensorId) -> Result<Option<Sensor>, StoreError> {
        Ok(self.sensors.get(&id).cloned())
    }

    async fn room(&self, id: RoomId) -> Result<Option<Room>, StoreError> {
        Ok(self.rooms.get(&id).cloned())
    }
}

#[async_trait]
impl TopologySource for SiteStore {
    async fn edges(&self, building: BuildingId) -> Result<Vec<RoomEdge>, StoreError> {
        Ok(self.building(building)?.edges.clone())
    }

    async fn stairs(&self, building: BuildingId) -> Result<Vec<Stair>, StoreError> {
        Ok(self.building(building)?.stairs.clone())
    }

    async fn exits(&self, building: BuildingId) -> Result<Vec<Exit>, StoreError> {
        Ok(self.building(building)?.exits.clone())
    }

    async fn room_names(&self, building: BuildingId) -> Result<FxHashMap<RoomId, String>, StoreError> {
        Ok(self.building(building)?.room_names.clone())
    }
}

#[async_trait]
impl OccupantDirectory for SiteStore {
    async fn occupants(&self, building: BuildingId) -> Result<Vec<UserId>, StoreError> {
        Ok(self.building(building)?.occupants.clone())
    }
}

#[async_trait]
impl NotificationStore for SiteStore {
    async fn create(&self, user: UserId, message: String) -> Result<Notification, StoreError> {
        if !self.users.contains(&user) {
            return Err(StoreError::NotFound(format!("user {user}")));
        }

        let notification = Notification::new(user, message);
        if let Some(log) = &self.notification_log {
            let log = log.clone();
            let record = notification.clone();
            tokio::task::spawn_blocking(move || log.append(&record))
                .await
                .map_err(|e| StoreError::Unavailable(format!("notification log task: {e}")))??;
        }

        let mut notifications = self.notifications.lock();
        if notifications.len() >= NOTIFICATION_HISTORY {
            notifications.pop_front();
        }
        notifications.push_back(notification.clone());
        Ok(notification)
    }

    async fn list_for_user(&self, user: UserId) -> Result<Vec<Notification>, StoreError> {
        let mut list: Vec<Notification> =
            self.notifications.lock().iter().filter(|n| n.user_id == user).cloned().collect();
        // Newest first
        list.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(list)
    }

    async fn mark_as_read(&self, id: NotificationId) -> Result<(), StoreError> {
        let mut notifications = self.notifications.lock();
        match notifications.iter_mut().find(|n| n.id == id) {
            Some(notification) => {
                notification.read = true;
                Ok(())
            }
            None => Err(StoreError::NotFound(format!("notification {id}"))),
        }
    }
}

#[async_trait]
impl MeasurementLog for SiteStore {
    async fn record(&self, measurement: Measurement) -> Result<(), StoreError> {
        let mut measurements = self.measurements.lock();
        if measurements.len() >= MEASUREMENT_HISTORY {
            measurements.pop_front();
        }
        measurements.push_back(measurement);
        Ok(())
    }

    async fn for_sensor(&self, sensor: SensorId) -> Result<Vec<Measurement>, StoreError> {
        Ok(self.measurements.lock().iter().filter(|m| m.sensor_id == sensor).cloned().collect())
    }
}
